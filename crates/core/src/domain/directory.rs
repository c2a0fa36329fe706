use serde::{Deserialize, Serialize};

use crate::domain::order::UserId;
use crate::domain::role::Role;

/// A user as seen by the approval workflow: only identity and role matter here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}
