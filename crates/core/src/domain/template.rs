use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::CompanyId;
use crate::domain::role::Role;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepTemplateId(pub String);

/// One step of a named, company-scoped approval sequence.
///
/// Rows are never edited once instances reference them: a revision deactivates
/// the row and inserts a replacement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub id: StepTemplateId,
    pub company_id: CompanyId,
    pub template_name: String,
    pub step_order: u32,
    pub required_role: Role,
    pub min_amount: Decimal,
    /// `None` means the step applies to every amount above `min_amount`.
    pub max_amount: Option<Decimal>,
    pub is_optional: bool,
    pub can_skip: bool,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StepTemplate {
    pub fn from_draft(id: StepTemplateId, draft: StepTemplateDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            company_id: draft.company_id,
            template_name: draft.template_name,
            step_order: draft.step_order,
            required_role: draft.required_role,
            min_amount: draft.min_amount,
            max_amount: draft.max_amount,
            is_optional: draft.is_optional,
            can_skip: draft.can_skip,
            description: draft.description,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount-range match used for routing: `min <= amount` and, when bounded, `amount <= max`.
    pub fn covers(&self, amount: Decimal) -> bool {
        if amount < self.min_amount {
            return false;
        }
        match self.max_amount {
            Some(max_amount) => amount <= max_amount,
            None => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplateDraft {
    pub company_id: CompanyId,
    pub template_name: String,
    pub step_order: u32,
    pub required_role: Role,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
    pub is_optional: bool,
    pub can_skip: bool,
    pub description: Option<String>,
}

impl StepTemplateDraft {
    pub fn new(
        company_id: CompanyId,
        template_name: impl Into<String>,
        step_order: u32,
        required_role: Role,
    ) -> Self {
        Self {
            company_id,
            template_name: template_name.into(),
            step_order,
            required_role,
            min_amount: Decimal::ZERO,
            max_amount: None,
            is_optional: false,
            can_skip: false,
            description: None,
        }
    }

    pub fn with_range(mut self, min_amount: Decimal, max_amount: Option<Decimal>) -> Self {
        self.min_amount = min_amount;
        self.max_amount = max_amount;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn skippable(mut self) -> Self {
        self.can_skip = true;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.template_name.trim().is_empty() {
            return Err("template_name must not be empty".to_owned());
        }
        if self.step_order == 0 {
            return Err("step_order must be a positive integer".to_owned());
        }
        if self.min_amount < Decimal::ZERO {
            return Err("min_amount must not be negative".to_owned());
        }
        if let Some(max_amount) = self.max_amount {
            if max_amount < self.min_amount {
                return Err(format!(
                    "max_amount {max_amount} must not be below min_amount {}",
                    self.min_amount
                ));
            }
        }
        Ok(())
    }
}
