pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use domain::authority::{ApprovalAuthority, AuthorityDraft, AuthorityId};
pub use domain::directory::DirectoryUser;
pub use domain::order::{CompanyId, OrderId, UserId};
pub use domain::policy::{ApprovalMode, PolicyDraft, PolicyId, WorkflowPolicy};
pub use domain::role::Role;
pub use domain::step::{StepDecision, StepInstance, StepInstanceId, StepNote, StepStatus};
pub use domain::template::{StepTemplate, StepTemplateDraft, StepTemplateId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use workflow::{
    Actor, ApprovalOutcome, ApprovalProgress, ApprovalRouter, InMemoryWorkflowStore, Priority,
    RouteContext, RouteDecision, RouterSettings, StepTracker, WorkflowAdmin, WorkflowStore,
};
