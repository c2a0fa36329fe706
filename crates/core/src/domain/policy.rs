use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::order::{CompanyId, UserId};
use crate::domain::role::Role;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Direct,
    Staged,
}

impl ApprovalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Staged => "staged",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalMode {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "staged" => Ok(Self::Staged),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported approval mode `{other}` (expected direct|staged)"
            ))),
        }
    }
}

/// Company-wide approval configuration. One active row per company.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPolicy {
    pub id: PolicyId,
    pub company_id: CompanyId,
    pub approval_mode: ApprovalMode,
    pub direct_approval_roles: Vec<Role>,
    pub require_all_stages: bool,
    pub skip_lower_stages: bool,
    pub active: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowPolicy {
    pub fn allows_direct_approval(&self, role: Role) -> bool {
        self.direct_approval_roles.contains(&role)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDraft {
    pub company_id: CompanyId,
    pub approval_mode: ApprovalMode,
    pub direct_approval_roles: Vec<Role>,
    pub require_all_stages: bool,
    pub skip_lower_stages: bool,
    pub created_by: Option<UserId>,
}

impl PolicyDraft {
    pub fn staged(company_id: CompanyId) -> Self {
        Self {
            company_id,
            approval_mode: ApprovalMode::Staged,
            direct_approval_roles: Vec::new(),
            require_all_stages: true,
            skip_lower_stages: false,
            created_by: None,
        }
    }

    pub fn direct(company_id: CompanyId, roles: Vec<Role>) -> Self {
        Self {
            approval_mode: ApprovalMode::Direct,
            direct_approval_roles: roles,
            ..Self::staged(company_id)
        }
    }

    pub fn into_policy(
        self,
        id: PolicyId,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> WorkflowPolicy {
        let mut roles = self.direct_approval_roles;
        roles.sort();
        roles.dedup();

        WorkflowPolicy {
            id,
            company_id: self.company_id,
            approval_mode: self.approval_mode,
            direct_approval_roles: roles,
            require_all_stages: self.require_all_stages,
            skip_lower_stages: self.skip_lower_stages,
            active: true,
            created_by: self.created_by,
            created_at,
            updated_at: now,
        }
    }
}
