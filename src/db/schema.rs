//! Schema bootstrap for the debtor store.
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` statements. A managed migration
//! pipeline is deployment tooling and lives outside this crate; this module
//! only guarantees a fresh database is usable.
//!
//! The CHECK constraints mirror the legality rules enforced in Rust: exactly
//! one of the kind-specific field groups may be set on a prepared transfer,
//! and demurrage columns can never go negative.

use sqlx::PgPool;

/// Create all tables and indexes the core needs.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for stmt in [
        CREATE_DEBTORS,
        CREATE_ACCOUNTS,
        CREATE_COORDINATORS,
        CREATE_BRANCHES,
        CREATE_OPERATORS,
        CREATE_PREPARED_TRANSFERS,
        CREATE_WITHDRAWAL_REQUESTS,
        CREATE_WITHDRAWALS,
        CREATE_WITHDRAWAL_LINK_INDEX,
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    tracing::info!("debtor store schema initialized");
    Ok(())
}

// Debtor ids are 63-bit random sharding keys; the sequence counters back the
// per-partition seqnums handed to prepared transfers and withdrawal requests.
const CREATE_DEBTORS: &str = r#"
CREATE TABLE IF NOT EXISTS debtors (
    debtor_id                 BIGINT PRIMARY KEY CHECK (debtor_id > 0),
    demurrage_rate            DOUBLE PRECISION NOT NULL DEFAULT 0.0 CHECK (demurrage_rate >= 0),
    demurrage_rate_ceiling    DOUBLE PRECISION NOT NULL DEFAULT 0.0 CHECK (demurrage_rate_ceiling >= 0),
    prepared_transfer_seqnum  BIGINT NOT NULL DEFAULT 0,
    withdrawal_request_seqnum BIGINT NOT NULL DEFAULT 0,
    created_at                TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    debtor_id               BIGINT NOT NULL REFERENCES debtors(debtor_id),
    creditor_id             BIGINT NOT NULL,
    balance                 BIGINT NOT NULL DEFAULT 0,
    avl_balance             BIGINT NOT NULL DEFAULT 0,
    demurrage               BIGINT NOT NULL DEFAULT 0 CHECK (demurrage >= 0),
    discount_demurrage_rate DOUBLE PRECISION NOT NULL DEFAULT 'Infinity'
                            CHECK (discount_demurrage_rate >= 0),
    last_transfer_ts        TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (debtor_id, creditor_id)
)
"#;

const CREATE_COORDINATORS: &str = r#"
CREATE TABLE IF NOT EXISTS coordinators (
    debtor_id      BIGINT NOT NULL REFERENCES debtors(debtor_id),
    coordinator_id BIGINT NOT NULL,
    PRIMARY KEY (debtor_id, coordinator_id)
)
"#;

const CREATE_BRANCHES: &str = r#"
CREATE TABLE IF NOT EXISTS branches (
    debtor_id BIGINT NOT NULL REFERENCES debtors(debtor_id),
    branch_id INTEGER NOT NULL,
    info      JSONB NOT NULL DEFAULT '{}',
    PRIMARY KEY (debtor_id, branch_id)
)
"#;

const CREATE_OPERATORS: &str = r#"
CREATE TABLE IF NOT EXISTS operators (
    debtor_id    BIGINT NOT NULL,
    branch_id    INTEGER NOT NULL,
    user_id      BIGINT NOT NULL,
    alias        TEXT NOT NULL,
    profile      JSONB NOT NULL DEFAULT '{}',
    can_withdraw BOOLEAN NOT NULL DEFAULT FALSE,
    can_deposit  BOOLEAN NOT NULL DEFAULT FALSE,
    can_audit    BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (debtor_id, branch_id, user_id),
    FOREIGN KEY (debtor_id, branch_id) REFERENCES branches (debtor_id, branch_id)
)
"#;

// transfer_type: 1 -- circular, 2 -- direct, 3 -- third-party.
// A withdrawal link is only legal on a direct transfer; there is no foreign
// key to withdrawal_requests because commit replaces the request with its
// terminal record while the transfer row is still being resolved.
const CREATE_PREPARED_TRANSFERS: &str = r#"
CREATE TABLE IF NOT EXISTS prepared_transfers (
    debtor_id                 BIGINT NOT NULL,
    seqnum                    BIGINT NOT NULL,
    transfer_type             SMALLINT NOT NULL,
    sender_creditor_id        BIGINT NOT NULL,
    recipient_creditor_id     BIGINT NOT NULL,
    amount                    BIGINT NOT NULL CHECK (amount >= 0),
    sender_locked_amount      BIGINT NOT NULL CHECK (sender_locked_amount >= 0),
    coordinator_id            BIGINT,
    withdrawal_request_seqnum BIGINT,
    third_party_debtor_id     BIGINT,
    third_party_amount        BIGINT,
    prepared_at               TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (debtor_id, seqnum),
    FOREIGN KEY (debtor_id, sender_creditor_id) REFERENCES accounts (debtor_id, creditor_id),
    FOREIGN KEY (debtor_id, coordinator_id) REFERENCES coordinators (debtor_id, coordinator_id),
    CHECK ((transfer_type = 1) = (coordinator_id IS NOT NULL)),
    CHECK ((transfer_type = 3) = (third_party_debtor_id IS NOT NULL AND third_party_amount IS NOT NULL)),
    CHECK (withdrawal_request_seqnum IS NULL OR transfer_type = 2)
)
"#;

const CREATE_WITHDRAWAL_REQUESTS: &str = r#"
CREATE TABLE IF NOT EXISTS withdrawal_requests (
    debtor_id          BIGINT NOT NULL,
    creditor_id        BIGINT NOT NULL,
    seqnum             BIGINT NOT NULL,
    amount             BIGINT NOT NULL CHECK (amount > 0),
    deadline_ts        TIMESTAMPTZ NOT NULL,
    details            JSONB NOT NULL DEFAULT '{}',
    operator_branch_id INTEGER NOT NULL,
    operator_user_id   BIGINT NOT NULL,
    created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (debtor_id, creditor_id, seqnum),
    FOREIGN KEY (debtor_id, operator_branch_id, operator_user_id)
        REFERENCES operators (debtor_id, branch_id, user_id)
)
"#;

// Terminal audit records; a withdrawal keeps the seqnum of the request it
// closed, so request and record never coexist.
const CREATE_WITHDRAWALS: &str = r#"
CREATE TABLE IF NOT EXISTS withdrawals (
    debtor_id          BIGINT NOT NULL,
    creditor_id        BIGINT NOT NULL,
    seqnum             BIGINT NOT NULL,
    amount             BIGINT NOT NULL CHECK (amount > 0),
    details            JSONB NOT NULL DEFAULT '{}',
    operator_branch_id INTEGER NOT NULL,
    operator_user_id   BIGINT NOT NULL,
    closing_ts         TIMESTAMPTZ NOT NULL,
    closing_comment    JSONB NOT NULL DEFAULT '{}',
    PRIMARY KEY (debtor_id, creditor_id, seqnum)
)
"#;

// At most one prepared transfer may be linked to a given withdrawal request;
// racing `prepare_withdrawal` calls collide here and get retried.
const CREATE_WITHDRAWAL_LINK_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS prepared_transfers_withdrawal_link_idx
ON prepared_transfers (debtor_id, sender_creditor_id, withdrawal_request_seqnum)
WHERE withdrawal_request_seqnum IS NOT NULL
"#;
