use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::role::Role;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorityId(pub String);

/// Maximum order amount a role may approve on its own.
///
/// At most one active row exists per role; the registry enforces this on write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAuthority {
    pub id: AuthorityId,
    pub role: Role,
    pub max_amount: Decimal,
    pub description: Option<String>,
    pub active: bool,
    pub can_direct_approve: bool,
    pub direct_approve_limit: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalAuthority {
    pub fn from_draft(id: AuthorityId, draft: AuthorityDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role: draft.role,
            max_amount: draft.max_amount,
            description: draft.description,
            active: draft.active,
            can_direct_approve: draft.can_direct_approve,
            direct_approve_limit: draft.direct_approve_limit,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn covers(&self, amount: Decimal) -> bool {
        self.active && amount <= self.max_amount
    }
}

/// Administrative input for creating or updating an authority row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityDraft {
    pub role: Role,
    pub max_amount: Decimal,
    pub description: Option<String>,
    pub active: bool,
    pub can_direct_approve: bool,
    pub direct_approve_limit: Option<Decimal>,
}

impl AuthorityDraft {
    pub fn new(role: Role, max_amount: Decimal) -> Self {
        Self {
            role,
            max_amount,
            description: None,
            active: true,
            can_direct_approve: false,
            direct_approve_limit: None,
        }
    }
}
