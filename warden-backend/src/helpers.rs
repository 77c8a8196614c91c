use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of digits in a verification code.
pub const CODE_DIGITS: usize = 6;

/// Draw a zero-padded six digit verification code.
pub fn generate_code() -> String {
  format!("{:06}", rng().random_range(0..1_000_000u32))
}

pub fn hash_api_key(key: &str) -> String {
  format!("{:x}", Sha256::digest(key.as_bytes()))
}

pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}

/// Render a duration in seconds as the coarsest useful unit ("3h", "12m", "40s").
pub fn format_duration(seconds: i64) -> String {
  let seconds = seconds.max(0);
  if seconds >= 3600 {
    format!("{}h", seconds / 3600)
  } else if seconds >= 60 {
    format!("{}m", seconds / 60)
  } else {
    format!("{}s", seconds)
  }
}
