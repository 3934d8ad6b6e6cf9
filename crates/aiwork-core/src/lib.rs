pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use context::Context;
pub use error::{AiworkError, Result};
pub use event::{EventBus, WorkflowSubscription};
pub use traits::MetricsSink;
pub use types::*;
