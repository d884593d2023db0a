//! Demurrage accrual policy.
//!
//! The exact accrual formula is an economic decision owned by whoever runs
//! the node; the ledger only requires that accrual is non-negative and
//! non-decreasing in elapsed time. Stored account columns advance at
//! settlement; between settlements the accrual since `last_transfer_ts` is
//! computed lazily on top of them.

use chrono::{DateTime, Utc};

use super::models::{Account, Debtor};

pub trait DemurragePolicy: Send + Sync {
    /// Demurrage accrued on `balance` over `elapsed_secs` seconds at `rate`
    /// (fraction of the balance per year).
    ///
    /// Must be `>= 0` and non-decreasing in `elapsed_secs`.
    fn accrued(&self, balance: i64, elapsed_secs: f64, rate: f64) -> i64;
}

/// Default policy: no demurrage ever accrues.
pub struct NoDemurrage;

impl DemurragePolicy for NoDemurrage {
    fn accrued(&self, _balance: i64, _elapsed_secs: f64, _rate: f64) -> i64 {
        0
    }
}

/// Simple linear accrual: `balance * rate * years`, truncated, never more
/// than the balance itself.
pub struct LinearDemurrage;

const SECS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

impl DemurragePolicy for LinearDemurrage {
    fn accrued(&self, balance: i64, elapsed_secs: f64, rate: f64) -> i64 {
        if balance <= 0 || rate <= 0.0 || elapsed_secs <= 0.0 {
            return 0;
        }
        let accrued = balance as f64 * rate * (elapsed_secs / SECS_PER_YEAR);
        accrued.min(balance as f64) as i64
    }
}

/// Effective rate for an account: the tightest of the per-account discount
/// cap and the debtor-wide rate and ceiling. The per-account default is
/// `+inf` (uncapped); the ROOT issuance account is pinned to `0`.
pub fn effective_rate(account: &Account, debtor: &Debtor) -> f64 {
    account
        .discount_demurrage_rate
        .min(debtor.demurrage_rate)
        .min(debtor.demurrage_rate_ceiling)
}

/// Accrual since the account's last settlement, under the bounded rate.
pub fn accrued_since_last_transfer(
    policy: &dyn DemurragePolicy,
    account: &Account,
    debtor: &Debtor,
    now: DateTime<Utc>,
) -> i64 {
    let elapsed_secs = (now - account.last_transfer_ts).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.0 {
        return 0;
    }
    policy
        .accrued(account.balance, elapsed_secs, effective_rate(account, debtor))
        .max(0)
}
