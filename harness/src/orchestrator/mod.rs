// File: harness/src/orchestrator/mod.rs
//
// Run Context
//
// Time, cancellation and nonce state are constructed per run and passed into
// each component explicitly, so scenarios stay isolated and can run in
// parallel.

/// Clock abstractions for deterministic time control in tests
pub mod clock;
/// Run-level cancellation signal
pub mod cancel;
mod nonce;

pub use cancel::{CancelSignal, CancelToken};
pub use clock::{Clock, PausedClock, SystemClock};
pub use nonce::NonceTracker;
