// Workflow lifecycle state machine
//
// Status definitions with the fixed transition table, the immutable transition
// record appended to every workflow's audit trail, and the persistence hook used
// to mirror workflow snapshots into an external store.

pub mod persistence;
pub mod states;
pub mod transition;

pub use persistence::{InMemoryStateStore, JsonFileStateStore, StateStore};
pub use states::WorkflowStatus;
pub use transition::StateTransition;
