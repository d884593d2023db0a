//! The account ledger: debtor partitions, per-creditor balance rows, and the
//! organizational rows (branches, operators, coordinators) scoped to them.

pub mod demurrage;
pub mod ledger;
pub mod models;
pub mod org;

pub use demurrage::{DemurragePolicy, LinearDemurrage, NoDemurrage};
pub use ledger::{AccountLedger, DebtorRegistry};
pub use models::{
    Account, Branch, Coordinator, DEFAULT_BRANCH_ID, DEFAULT_COORDINATOR_ID, Debtor, Operator,
    ROOT_CREDITOR_ID,
};
pub use org::{Branches, Coordinators, Operators};
