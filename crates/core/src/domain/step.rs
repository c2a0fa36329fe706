use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderId, UserId};
use crate::domain::role::Role;
use crate::domain::template::{StepTemplate, StepTemplateId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepInstanceId(pub String);

impl fmt::Display for StepInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Approved and skipped steps count as progress; a rejection does not.
    pub fn counts_as_completed(self) -> bool {
        matches!(self, Self::Approved | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            other => other.parse::<StepDecision>().map(StepDecision::status),
        }
    }
}

/// Terminal outcome an actor may apply to a pending step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDecision {
    Approved,
    Rejected,
    Skipped,
}

impl StepDecision {
    pub fn status(self) -> StepStatus {
        match self {
            Self::Approved => StepStatus::Approved,
            Self::Rejected => StepStatus::Rejected,
            Self::Skipped => StepStatus::Skipped,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.status().as_str()
    }
}

impl FromStr for StepDecision {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "skipped" => Ok(Self::Skipped),
            other => Err(DomainError::UnrecognizedDecision(other.to_owned())),
        }
    }
}

/// Free-text fields recorded alongside a decision. Empty values are not persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNote {
    pub comments: Option<String>,
    pub rejection_reason: Option<String>,
}

impl StepNote {
    pub fn comments(comments: impl Into<String>) -> Self {
        Self { comments: Some(comments.into()), rejection_reason: None }
    }

    pub fn rejection(reason: impl Into<String>) -> Self {
        Self { comments: None, rejection_reason: Some(reason.into()) }
    }

    pub fn normalized(self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value.filter(|text| !text.trim().is_empty())
        }
        Self { comments: keep(self.comments), rejection_reason: keep(self.rejection_reason) }
    }
}

/// A step template materialized for one order.
///
/// `step_order` and `required_role` are copied from the template at creation time so
/// later template revisions never reach an in-flight order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInstance {
    pub id: StepInstanceId,
    pub order_id: OrderId,
    pub template_id: Option<StepTemplateId>,
    pub step_order: u32,
    pub required_role: Role,
    pub assigned_user_id: Option<UserId>,
    pub status: StepStatus,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub comments: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StepInstance {
    pub fn pending_from_template(
        id: StepInstanceId,
        order_id: OrderId,
        template: &StepTemplate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id,
            template_id: Some(template.id.clone()),
            step_order: template.step_order,
            required_role: template.required_role,
            assigned_user_id: None,
            status: StepStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            comments: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }

    /// Applies a decision to a pending instance. Stores must call this only after
    /// their compare-and-swap on `status` succeeded.
    pub fn apply_decision(
        &mut self,
        decision: StepDecision,
        acting_user_id: &UserId,
        note: &StepNote,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidTransition {
                instance_id: self.id.0.clone(),
                current: self.status,
            });
        }

        self.status = decision.status();
        self.approved_by = Some(acting_user_id.clone());
        self.approved_at = Some(at);
        if let Some(comments) = &note.comments {
            self.comments = Some(comments.clone());
        }
        if let Some(reason) = &note.rejection_reason {
            self.rejection_reason = Some(reason.clone());
        }
        self.updated_at = at;
        Ok(())
    }
}
