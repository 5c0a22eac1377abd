pub mod progress;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod tracker;

pub use progress::{BufferSink, TracingSink};
pub use registry::{CommandHandler, CommandRegistry};
pub use report::BatchReporter;
pub use scheduler::BatchScheduler;
pub use stats::StatsAggregator;
pub use tracker::{NodeTracker, TerminalOutcome, TrackerEvent};
