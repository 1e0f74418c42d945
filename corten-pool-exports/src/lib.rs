//! Interfaces of the pool component: the transaction pool and evidence pool
//! controller surfaces, their configuration, and the channel bundle.

#![warn(unused_crate_dependencies)]

mod channels;
mod config;
mod controller_traits;
mod error;

pub use channels::PoolChannels;
pub use config::PoolConfig;
pub use controller_traits::{
    EvidencePoolController, PostcheckFn, PrecheckFn, TxPoolController,
};
pub use error::{PoolError, PoolResult};
