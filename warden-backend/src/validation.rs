/// Input validation for proxy events and Discord command arguments
use crate::helpers::CODE_DIGITS;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player name cannot be empty")]
    PlayerNameEmpty,

    #[error("Player name too long (max 16 characters, got {0})")]
    PlayerNameTooLong(usize),

    #[error("Player name contains invalid characters (only alphanumeric and underscore allowed)")]
    PlayerNameInvalidChars,

    #[error("Verification code cannot be empty")]
    CodeEmpty,

    #[error("Verification code has invalid format (expected 6 digits)")]
    CodeInvalidFormat,

    #[error("Session list too large (max {max} sessions, got {actual})")]
    SessionListTooLarge { max: usize, actual: usize },

    #[error("Server name cannot be empty")]
    ServerNameEmpty,

    #[error("Server name too long (max 64 characters, got {0})")]
    ServerNameTooLong(usize),

    #[error("Server name contains invalid characters")]
    ServerNameInvalidChars,
}

/// Validates a Minecraft player name
///
/// Rules:
/// - Cannot be empty
/// - Max 16 characters (Minecraft username limit)
/// - Only ASCII alphanumeric characters and underscores
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::PlayerNameEmpty);
    }

    if name.len() > 16 {
        return Err(ValidationError::PlayerNameTooLong(name.len()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::PlayerNameInvalidChars);
    }

    Ok(())
}

/// Validates a backend server name as registered with the proxy
///
/// Rules:
/// - Cannot be empty
/// - Max 64 characters
/// - No whitespace or control characters
pub fn validate_server_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::ServerNameEmpty);
    }

    if name.len() > 64 {
        return Err(ValidationError::ServerNameTooLong(name.len()));
    }

    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::ServerNameInvalidChars);
    }

    Ok(())
}

/// Validates a verification code
///
/// Rules:
/// - Cannot be empty
/// - Exactly six ASCII digits
pub fn validate_code(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() {
        return Err(ValidationError::CodeEmpty);
    }

    if code.len() != CODE_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::CodeInvalidFormat);
    }

    Ok(())
}

/// Validates the size of a session sync batch
///
/// Max 1000 sessions per request (prevents DOS). Individual entries are
/// validated by the caller.
pub fn validate_session_count(count: usize) -> Result<(), ValidationError> {
    const MAX_SESSIONS: usize = 1000;

    if count > MAX_SESSIONS {
        return Err(ValidationError::SessionListTooLarge {
            max: MAX_SESSIONS,
            actual: count,
        });
    }

    Ok(())
}
