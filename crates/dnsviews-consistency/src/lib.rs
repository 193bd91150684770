pub mod collab;
pub mod engine;
pub mod hierarchy;
pub mod impact;
pub mod records;
pub mod workflow;

pub use collab::{MemberScope, PrefixHierarchy, RecordConsistency, ViewRegistry};
pub use engine::ConsistencyEngine;
pub use records::RecordReconciler;
pub use workflow::ViewEditor;
