use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Organizational role of an acting user or the role a step requires.
///
/// Variants are declared in ascending order of authority, so the derived
/// ordering matches [`Role::rank`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    FieldWorker,
    ProjectManager,
    HqManagement,
    Executive,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] =
        [Self::FieldWorker, Self::ProjectManager, Self::HqManagement, Self::Executive, Self::Admin];

    pub fn rank(self) -> u8 {
        match self {
            Self::FieldWorker => 0,
            Self::ProjectManager => 1,
            Self::HqManagement => 2,
            Self::Executive => 3,
            Self::Admin => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FieldWorker => "field_worker",
            Self::ProjectManager => "project_manager",
            Self::HqManagement => "hq_management",
            Self::Executive => "executive",
            Self::Admin => "admin",
        }
    }

    /// Whether a holder of this role may act on a step that requires `required`.
    pub fn can_act_for(self, required: Role) -> bool {
        self == Self::Admin || self.rank() >= required.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "field_worker" => Ok(Self::FieldWorker),
            "project_manager" => Ok(Self::ProjectManager),
            "hq_management" => Ok(Self::HqManagement),
            "executive" => Ok(Self::Executive),
            "admin" => Ok(Self::Admin),
            other => Err(DomainError::UnknownRole(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;
    use crate::errors::DomainError;

    #[test]
    fn parses_snake_case_and_round_trips_display() {
        for role in Role::ALL {
            let parsed: Role = role.as_str().parse().expect("known role");
            assert_eq!(parsed, role);
            assert_eq!(parsed.to_string(), role.as_str());
        }
        assert_eq!(" HQ_Management ".parse::<Role>(), Ok(Role::HqManagement));
    }

    #[test]
    fn unknown_role_is_a_typed_error() {
        assert_eq!(
            "superuser".parse::<Role>(),
            Err(DomainError::UnknownRole("superuser".to_owned()))
        );
    }

    #[test]
    fn higher_roles_can_act_for_lower_steps_but_not_the_reverse() {
        assert!(Role::HqManagement.can_act_for(Role::ProjectManager));
        assert!(Role::ProjectManager.can_act_for(Role::ProjectManager));
        assert!(!Role::FieldWorker.can_act_for(Role::ProjectManager));
        assert!(Role::Admin.can_act_for(Role::Executive));
        assert!(Role::Executive > Role::HqManagement);
    }
}
