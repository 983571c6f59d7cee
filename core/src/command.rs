use crate::types::{Cents, UserId};
use serde::{Deserialize, Serialize};

/// Intake commands, as replayed from a JSON-lines file.
/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum LedgerCommand {
    Register {
        user_id:     UserId,
        #[serde(default)]
        ancestor_id: Option<UserId>,
    },
    Place {
        ancestor_id:   UserId,
        descendant_id: UserId,
    },
    /// The user's subscription became active.
    Eligible {
        user_id: UserId,
    },
    Withdraw {
        user_id: UserId,
        amount:  Cents,
    },
}

impl LedgerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Place { .. }    => "place",
            Self::Eligible { .. } => "eligible",
            Self::Withdraw { .. } => "withdraw",
        }
    }
}
