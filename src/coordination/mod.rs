//! Coordination for the long-running loop: cooperative shutdown and signal
//! handling.

pub mod shutdown;

pub use shutdown::{install_signal_handlers, GracefulShutdown, ShutdownSignal, ShutdownToken};
