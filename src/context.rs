//! Process context: the explicit replacement for global store/session
//! singletons. Built once at startup via [`ContextBuilder`] (register the
//! collaborators up front, bind them in one place) and threaded through
//! every procedure call.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::accounts::demurrage::{DemurragePolicy, NoDemurrage};
use crate::atomic::Session;
use crate::db::Database;
use crate::keygen::KeyGenerator;
use crate::withdrawal::Withdrawal;

/// Time source. Procedures never read the wall clock directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Extension point fired inside the committing unit when a withdrawal
/// settles, carrying the terminal record. Message-bus delivery is the
/// caller's concern; the default implementation just logs.
#[async_trait::async_trait]
pub trait SettlementHook: Send + Sync {
    async fn on_withdrawal_settled(&self, withdrawal: &Withdrawal);
}

pub struct LogSettlementHook;

#[async_trait::async_trait]
impl SettlementHook for LogSettlementHook {
    async fn on_withdrawal_settled(&self, withdrawal: &Withdrawal) {
        tracing::info!(
            debtor_id = withdrawal.debtor_id,
            creditor_id = withdrawal.creditor_id,
            seqnum = withdrawal.seqnum,
            amount = withdrawal.amount,
            "withdrawal settled"
        );
    }
}

pub struct Context {
    db: Database,
    clock: Arc<dyn Clock>,
    demurrage: Arc<dyn DemurragePolicy>,
    settlement_hook: Arc<dyn SettlementHook>,
    keygen: KeyGenerator,
}

impl Context {
    pub fn builder(db: Database) -> ContextBuilder {
        ContextBuilder {
            db,
            clock: None,
            demurrage: None,
            settlement_hook: None,
            keygen: None,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Check out a fresh session. Atomic units cannot nest within one.
    pub fn session(&self) -> Session<'_> {
        Session::new(&self.db)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn demurrage(&self) -> &dyn DemurragePolicy {
        self.demurrage.as_ref()
    }

    pub fn settlement_hook(&self) -> &dyn SettlementHook {
        self.settlement_hook.as_ref()
    }

    pub fn keygen(&self) -> &KeyGenerator {
        &self.keygen
    }
}

pub struct ContextBuilder {
    db: Database,
    clock: Option<Arc<dyn Clock>>,
    demurrage: Option<Arc<dyn DemurragePolicy>>,
    settlement_hook: Option<Arc<dyn SettlementHook>>,
    keygen: Option<KeyGenerator>,
}

impl ContextBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn demurrage_policy(mut self, policy: Arc<dyn DemurragePolicy>) -> Self {
        self.demurrage = Some(policy);
        self
    }

    pub fn settlement_hook(mut self, hook: Arc<dyn SettlementHook>) -> Self {
        self.settlement_hook = Some(hook);
        self
    }

    pub fn keygen(mut self, keygen: KeyGenerator) -> Self {
        self.keygen = Some(keygen);
        self
    }

    pub fn build(self) -> Context {
        Context {
            db: self.db,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            demurrage: self.demurrage.unwrap_or_else(|| Arc::new(NoDemurrage)),
            settlement_hook: self
                .settlement_hook
                .unwrap_or_else(|| Arc::new(LogSettlementHook)),
            keygen: self.keygen.unwrap_or_default(),
        }
    }
}
