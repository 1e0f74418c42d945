//! Interfaces of the block-execution component: the application boundary,
//! the event bus carrying committed-block notifications, and the error type.

#![warn(unused_crate_dependencies)]

mod application;
mod error;
mod event;

pub use application::Application;
pub use error::{ExecutionError, ExecutionResult};
pub use event::{ConsensusEvent, EventBus, EventReceiver, DEFAULT_EVENT_CAPACITY};
