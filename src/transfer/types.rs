//! Prepared-transfer row types.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::accounts::ROOT_CREDITOR_ID;
use crate::error::LedgerError;

/// Transfer-type discriminants as stored in `prepared_transfers.transfer_type`.
pub mod transfer_type {
    pub const CIRCULAR: i16 = 1;
    pub const DIRECT: i16 = 2;
    pub const THIRD_PARTY: i16 = 3;
}

/// What kind of transfer a prepared row represents, carrying exactly the
/// fields that kind owns. Decoding validates the exactly-one rules, so a
/// corrupt row cannot masquerade as another kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Part of a multi-party clearing cycle, attributed to its coordinator.
    Circular { coordinator_id: i64 },
    /// Point-to-point transfer, optionally linked to a withdrawal request.
    Direct { withdrawal_request_seqnum: Option<i64> },
    /// Transfer denominated against another debtor. Unfinished extension
    /// point: structurally supported, no dedicated prepare procedure yet.
    ThirdParty { debtor_id: i64, amount: i64 },
}

impl TransferKind {
    pub fn type_id(&self) -> i16 {
        match self {
            TransferKind::Circular { .. } => transfer_type::CIRCULAR,
            TransferKind::Direct { .. } => transfer_type::DIRECT,
            TransferKind::ThirdParty { .. } => transfer_type::THIRD_PARTY,
        }
    }

    pub fn coordinator_id(&self) -> Option<i64> {
        match self {
            TransferKind::Circular { coordinator_id } => Some(*coordinator_id),
            _ => None,
        }
    }

    pub fn withdrawal_request_seqnum(&self) -> Option<i64> {
        match self {
            TransferKind::Direct {
                withdrawal_request_seqnum,
            } => *withdrawal_request_seqnum,
            _ => None,
        }
    }

    pub fn third_party_debtor_id(&self) -> Option<i64> {
        match self {
            TransferKind::ThirdParty { debtor_id, .. } => Some(*debtor_id),
            _ => None,
        }
    }

    pub fn third_party_amount(&self) -> Option<i64> {
        match self {
            TransferKind::ThirdParty { amount, .. } => Some(*amount),
            _ => None,
        }
    }

    /// Reassemble a kind from its stored columns, enforcing that exactly the
    /// fields of the recorded type are present.
    pub fn from_columns(
        type_id: i16,
        coordinator_id: Option<i64>,
        withdrawal_request_seqnum: Option<i64>,
        third_party_debtor_id: Option<i64>,
        third_party_amount: Option<i64>,
    ) -> Result<Self, LedgerError> {
        let third_party = third_party_debtor_id.is_some() || third_party_amount.is_some();
        match type_id {
            transfer_type::CIRCULAR => match coordinator_id {
                Some(coordinator_id) if withdrawal_request_seqnum.is_none() && !third_party => {
                    Ok(TransferKind::Circular { coordinator_id })
                }
                _ => Err(illegal_columns(type_id)),
            },
            transfer_type::DIRECT => {
                if coordinator_id.is_none() && !third_party {
                    Ok(TransferKind::Direct {
                        withdrawal_request_seqnum,
                    })
                } else {
                    Err(illegal_columns(type_id))
                }
            }
            transfer_type::THIRD_PARTY => {
                match (third_party_debtor_id, third_party_amount) {
                    (Some(debtor_id), Some(amount))
                        if coordinator_id.is_none() && withdrawal_request_seqnum.is_none() =>
                    {
                        Ok(TransferKind::ThirdParty { debtor_id, amount })
                    }
                    _ => Err(illegal_columns(type_id)),
                }
            }
            _ => Err(LedgerError::Inconsistency(format!(
                "unknown transfer type {type_id}"
            ))),
        }
    }
}

fn illegal_columns(type_id: i16) -> LedgerError {
    LedgerError::Inconsistency(format!(
        "prepared transfer columns do not match transfer type {type_id}"
    ))
}

/// An in-flight prepared transfer. Owned by the sender account: its
/// `sender_locked_amount` is held out of that account's spendable balance
/// until the row is resolved.
#[derive(Debug, Clone)]
pub struct PreparedTransfer {
    pub debtor_id: i64,
    pub seqnum: i64,
    pub sender_creditor_id: i64,
    pub recipient_creditor_id: i64,
    pub amount: i64,
    pub sender_locked_amount: i64,
    pub kind: TransferKind,
    pub prepared_at: DateTime<Utc>,
}

impl PreparedTransfer {
    pub(crate) fn from_row(row: &PgRow) -> Result<Self, LedgerError> {
        let kind = TransferKind::from_columns(
            row.get("transfer_type"),
            row.get("coordinator_id"),
            row.get("withdrawal_request_seqnum"),
            row.get("third_party_debtor_id"),
            row.get("third_party_amount"),
        )?;

        Ok(PreparedTransfer {
            debtor_id: row.get("debtor_id"),
            seqnum: row.get("seqnum"),
            sender_creditor_id: row.get("sender_creditor_id"),
            recipient_creditor_id: row.get("recipient_creditor_id"),
            amount: row.get("amount"),
            sender_locked_amount: row.get("sender_locked_amount"),
            kind,
            prepared_at: row.get("prepared_at"),
        })
    }

    /// Structural authorization: the claimed role must match the recorded
    /// type/owner fields. Capability policy was checked upstream by the
    /// caller; this is the only check the core re-does.
    pub fn check_role(&self, role: CommitRole) -> Result<(), LedgerError> {
        let matches = match role {
            CommitRole::Coordinator { coordinator_id } => matches!(
                self.kind,
                TransferKind::Circular { coordinator_id: c } if c == coordinator_id
            ),
            CommitRole::Creditor { creditor_id } => {
                self.sender_creditor_id == creditor_id
                    && matches!(self.kind, TransferKind::Direct { .. })
            }
            CommitRole::Debtor => {
                self.sender_creditor_id == ROOT_CREDITOR_ID
                    && matches!(self.kind, TransferKind::Direct { .. })
            }
            CommitRole::Guarantor => matches!(self.kind, TransferKind::ThirdParty { .. }),
        };

        if matches {
            Ok(())
        } else {
            Err(LedgerError::InvalidPreparedTransfer)
        }
    }
}

/// The role a caller claims when committing or cancelling a transfer.
#[derive(Debug, Clone, Copy)]
pub enum CommitRole {
    /// Commits circular transfers it coordinates.
    Coordinator { coordinator_id: i64 },
    /// Commits direct transfers and withdrawals from its own account.
    Creditor { creditor_id: i64 },
    /// Commits deposits out of the ROOT issuance account.
    Debtor,
    /// Commits third-party transfers.
    Guarantor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(sender: i64, link: Option<i64>) -> PreparedTransfer {
        PreparedTransfer {
            debtor_id: 1,
            seqnum: 1,
            sender_creditor_id: sender,
            recipient_creditor_id: 888,
            amount: 100,
            sender_locked_amount: 100,
            kind: TransferKind::Direct {
                withdrawal_request_seqnum: link,
            },
            prepared_at: Utc::now(),
        }
    }

    #[test]
    fn test_kind_from_columns_legal() {
        assert_eq!(
            TransferKind::from_columns(1, Some(5), None, None, None).unwrap(),
            TransferKind::Circular { coordinator_id: 5 }
        );
        assert_eq!(
            TransferKind::from_columns(2, None, None, None, None).unwrap(),
            TransferKind::Direct {
                withdrawal_request_seqnum: None
            }
        );
        assert_eq!(
            TransferKind::from_columns(2, None, Some(3), None, None).unwrap(),
            TransferKind::Direct {
                withdrawal_request_seqnum: Some(3)
            }
        );
        assert_eq!(
            TransferKind::from_columns(3, None, None, Some(9), Some(40)).unwrap(),
            TransferKind::ThirdParty {
                debtor_id: 9,
                amount: 40
            }
        );
    }

    #[test]
    fn test_kind_from_columns_illegal() {
        // Circular without a coordinator.
        assert!(TransferKind::from_columns(1, None, None, None, None).is_err());
        // Direct with a coordinator.
        assert!(TransferKind::from_columns(2, Some(5), None, None, None).is_err());
        // Third-party with only half its fields.
        assert!(TransferKind::from_columns(3, None, None, Some(9), None).is_err());
        // Third-party fields on a circular row.
        assert!(TransferKind::from_columns(1, Some(5), None, Some(9), Some(1)).is_err());
        // Unknown discriminant.
        assert!(TransferKind::from_columns(0, None, None, None, None).is_err());
    }

    #[test]
    fn test_kind_accessors() {
        let kind = TransferKind::Circular { coordinator_id: 7 };
        assert_eq!(kind.type_id(), 1);
        assert_eq!(kind.coordinator_id(), Some(7));
        assert_eq!(kind.withdrawal_request_seqnum(), None);

        let kind = TransferKind::ThirdParty {
            debtor_id: 2,
            amount: 50,
        };
        assert_eq!(kind.type_id(), 3);
        assert_eq!(kind.third_party_debtor_id(), Some(2));
        assert_eq!(kind.third_party_amount(), Some(50));
    }

    #[test]
    fn test_role_checks() {
        let transfer = direct(777, None);
        assert!(transfer
            .check_role(CommitRole::Creditor { creditor_id: 777 })
            .is_ok());
        assert!(transfer
            .check_role(CommitRole::Creditor { creditor_id: 778 })
            .is_err());
        assert!(transfer
            .check_role(CommitRole::Coordinator { coordinator_id: 1 })
            .is_err());
        assert!(transfer.check_role(CommitRole::Debtor).is_err());
        assert!(transfer.check_role(CommitRole::Guarantor).is_err());

        // Deposits: direct out of the ROOT account.
        let deposit = direct(ROOT_CREDITOR_ID, None);
        assert!(deposit.check_role(CommitRole::Debtor).is_ok());

        let circular = PreparedTransfer {
            kind: TransferKind::Circular { coordinator_id: 4 },
            ..direct(777, None)
        };
        assert!(circular
            .check_role(CommitRole::Coordinator { coordinator_id: 4 })
            .is_ok());
        assert!(circular
            .check_role(CommitRole::Coordinator { coordinator_id: 5 })
            .is_err());
        assert!(circular
            .check_role(CommitRole::Creditor { creditor_id: 777 })
            .is_err());
    }
}
