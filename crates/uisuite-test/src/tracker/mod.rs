pub mod api;
pub mod publisher;
pub mod zephyr;

pub use api::{CycleEntry, ProjectVersion, TrackerApi};
pub use publisher::{CycleRef, ExternalExecutionRef, PublishSummary, TrackerPublisher};
pub use zephyr::ZephyrClient;
