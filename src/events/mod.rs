pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishError};
pub use types::{PublishedEvent, WorkflowEvent};
