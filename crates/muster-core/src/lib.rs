pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod traits;
pub mod types;

pub use config::RunConfig;
pub use error::{MusterError, Result};
pub use event::{BatchEvent, EventBus};
pub use filter::NodeFilter;
pub use types::*;
