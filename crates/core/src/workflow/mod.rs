//! Approval routing and step tracking over pluggable stores.

pub mod admin;
pub mod memory;
pub mod router;
pub mod store;
pub mod tracker;

pub use admin::WorkflowAdmin;
pub use memory::InMemoryWorkflowStore;
pub use router::{
    ApprovalRouter, Priority, RouteBasis, RouteContext, RouteDecision, RouterSettings,
};
pub use store::{
    AuthorityRegistry, PolicyStore, StepInstanceStore, StoreError, TemplateCatalog, UserDirectory,
    WorkflowStore,
};
pub use tracker::{Actor, ApprovalOutcome, ApprovalProgress, StepTracker};
