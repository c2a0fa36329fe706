pub mod authority;
pub mod directory;
pub mod order;
pub mod policy;
pub mod role;
pub mod step;
pub mod template;
