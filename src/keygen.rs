//! Globally-unique debtor id generation.
//!
//! Debtor ids double as sharding keys: cryptographically random integers in
//! `(0, 2^63)`. Each allocation attempt inserts the candidate debtor row
//! inside a savepoint, so a primary-key collision rolls back only that
//! attempt and never the caller's enclosing unit of work.

use rand::RngCore;
use rand::rngs::OsRng;
use sqlx::Acquire;

use crate::db::PgTx;
use crate::error::{LedgerError, is_unique_violation};

/// Insert attempts before giving up. With a 2^63 keyspace this bound is
/// unreachable unless the random source is broken.
pub const DEFAULT_KEY_TRIES: u32 = 50;

/// Mask keeping the low 63 bits of a random draw.
const KEY_MASK: u64 = (1 << 63) - 1;

type KeySource = Box<dyn Fn() -> u64 + Send + Sync>;

pub struct KeyGenerator {
    tries: u32,
    source: KeySource,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self {
            tries: DEFAULT_KEY_TRIES,
            source: Box::new(|| OsRng.next_u64()),
        }
    }

    /// Replace the random source and try bound. Tests use this to force
    /// collisions deterministically.
    pub fn with_source(tries: u32, source: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            tries,
            source: Box::new(source),
        }
    }

    /// Allocate a fresh debtor id, persisting the debtor row that carries it.
    ///
    /// The row is inserted with default columns; the caller fills in rates
    /// and satellite rows afterwards, inside the same atomic unit.
    pub async fn generate(&self, tx: &mut PgTx) -> Result<i64, LedgerError> {
        for _ in 0..self.tries {
            let key = ((self.source)() & KEY_MASK) as i64;
            if key == 0 {
                // Zero is outside the id range; the draw still counts as a try.
                continue;
            }

            let mut savepoint = tx.begin().await?;
            let inserted = sqlx::query("INSERT INTO debtors (debtor_id) VALUES ($1)")
                .bind(key)
                .execute(&mut *savepoint)
                .await;

            match inserted {
                Ok(_) => {
                    savepoint.commit().await?;
                    tracing::debug!(debtor_id = key, "allocated debtor id");
                    return Ok(key);
                }
                Err(e) if is_unique_violation(&e) => {
                    savepoint.rollback().await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::KeySpaceExhausted { tries: self.tries })
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mask_range() {
        assert_eq!(u64::MAX & KEY_MASK, i64::MAX as u64);
        // Masked draws always fit a positive i64.
        for draw in [0u64, 1, u64::MAX, 1 << 63, (1 << 63) + 17] {
            let key = (draw & KEY_MASK) as i64;
            assert!(key >= 0);
        }
    }

    #[test]
    fn test_custom_source_is_used() {
        let generator = KeyGenerator::with_source(3, || 42);
        assert_eq!((generator.source)(), 42);
        assert_eq!(generator.tries, 3);
    }
}
