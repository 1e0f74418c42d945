//! Trace instrumentation shared by the worker crates.
//!
//! Workers emit one trace line per observed protocol event: a dotted
//! `component.action` event name plus the identifiers that locate it
//! (heights, rounds, peers, hashes) as structured fields. Everything is
//! emitted under the `corten` target, so a deployment can raise or silence
//! engine tracing with a single filter directive.

#![warn(missing_docs)]

pub use tracing;

/// Trace one protocol event under the `corten` target.
///
/// The first argument is the dotted event name; the rest are `tracing`
/// structured fields (`key = value`, `key = %display`, `key = ?debug`).
///
/// ```
/// corten_logging::corten_trace!("consensus.enter_round", height = 4, round = 1);
/// ```
#[macro_export]
macro_rules! corten_trace {
    ($event:expr) => {
        $crate::tracing::trace!(target: "corten", event = $event);
    };
    ($event:expr, $($fields:tt)+) => {
        $crate::tracing::trace!(target: "corten", event = $event, $($fields)+);
    };
}
