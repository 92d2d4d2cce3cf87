pub mod aggregator;
pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod runner;

pub use aggregator::{OutcomeCounts, ResultAggregator, TicketOutcome, TicketState};
pub use coordinator::{Collaborators, PlatformReport, RunContext, RunCoordinator, RunReport};
pub use events::{TestEvent, TestResult, TestState};
pub use pipeline::{Pipeline, PipelineStage};
pub use runner::{CommandTestRunner, RunnerContext, TestRunner};
