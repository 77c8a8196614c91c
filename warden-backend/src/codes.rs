use scc::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::helpers::generate_code;

/// Re-roll budget for a single issuance. A million code space makes this
/// unreachable unless the generator is broken or the registry is saturated.
const MAX_ISSUE_ATTEMPTS: usize = 64;

pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    #[error("could not draw an unused verification code after {0} attempts")]
    Exhausted(usize),
}

#[derive(Debug, Clone)]
struct PendingCode {
    player: Uuid,
    expires_at: Instant,
    /// Identifies this issuance; a scheduled expiry only removes its own.
    generation: u64,
}

struct Inner {
    codes: scc::HashMap<String, PendingCode>,
    next_generation: AtomicU64,
    ttl_ms: AtomicU64,
    generator: CodeGenerator,
}

/// Outstanding one-time verification codes.
///
/// A code is valid while it is present and `now < expires_at`. Expiry is
/// checked on redemption, so a late expiry task never makes an old code
/// usable. Each code is removed either by a successful redemption or by
/// the expiry task of the same issuance, whichever happens first.
#[derive(Clone)]
pub struct CodeRegistry {
    inner: Arc<Inner>,
}

impl CodeRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self::with_generator(ttl, Arc::new(generate_code))
    }

    /// Registry with a custom code source.
    pub fn with_generator(ttl: Duration, generator: CodeGenerator) -> Self {
        Self {
            inner: Arc::new(Inner {
                codes: scc::HashMap::new(),
                next_generation: AtomicU64::new(1),
                ttl_ms: AtomicU64::new(duration_ms(ttl)),
                generator,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.inner.ttl_ms.load(Ordering::Relaxed))
    }

    /// Applies to codes issued from now on.
    pub fn set_ttl(&self, ttl: Duration) {
        self.inner.ttl_ms.store(duration_ms(ttl), Ordering::Relaxed);
    }

    /// Number of codes currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Issue a code for `player` that no other live issuance holds.
    pub async fn issue(&self, player: Uuid) -> Result<String, CodeError> {
        let ttl = self.ttl();

        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let code = (self.inner.generator)();
            let now = Instant::now();
            let pending = PendingCode {
                player,
                expires_at: now + ttl,
                generation: self.inner.next_generation.fetch_add(1, Ordering::Relaxed),
            };

            match self.inner.codes.entry_async(code.clone()).await {
                Entry::Occupied(mut entry) => {
                    if now < entry.get().expires_at {
                        // Live collision, draw again
                        continue;
                    }
                    *entry.get_mut() = pending.clone();
                }
                Entry::Vacant(entry) => {
                    entry.insert_entry(pending.clone());
                }
            }

            self.schedule_expiry(code.clone(), &pending);
            debug!(%player, code, ttl_secs = ttl.as_secs(), "verification code issued");
            return Ok(code);
        }

        Err(CodeError::Exhausted(MAX_ISSUE_ATTEMPTS))
    }

    /// Consume `code`. At most one caller observes `Some` for an issuance.
    pub async fn redeem(&self, code: &str) -> Option<Uuid> {
        let (_, pending) = self.inner.codes.remove_async(code).await?;

        if Instant::now() >= pending.expires_at {
            debug!(code, "verification code redeemed after expiry");
            return None;
        }

        debug!(code, player = %pending.player, "verification code redeemed");
        Some(pending.player)
    }

    fn schedule_expiry(&self, code: String, pending: &PendingCode) {
        let inner = Arc::downgrade(&self.inner);
        let generation = pending.generation;
        let deadline = pending.expires_at;

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            expire(&inner, &code, generation).await;
        });
    }

    /// Insert an issuance as-is, without scheduling its expiry.
    #[cfg(test)]
    async fn store(&self, code: &str, player: Uuid, expires_at: Instant) -> u64 {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let pending = PendingCode {
            player,
            expires_at,
            generation,
        };
        let _ = self.inner.codes.remove_async(code).await;
        let _ = self.inner.codes.insert_async(code.to_string(), pending).await;
        generation
    }
}

/// Removes `code` only if it still belongs to issuance `generation`.
async fn expire(inner: &Weak<Inner>, code: &str, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    if inner
        .codes
        .remove_if_async(code, |pending| pending.generation == generation)
        .await
        .is_some()
    {
        debug!(code, "verification code expired");
    }
}

fn duration_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}
