pub mod adapters;
pub mod agent;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod narratives;
pub mod runtime;
pub mod services;
pub mod signing;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal, ShutdownToken};
pub use error::{Result, WalterError};
pub use services::{CycleRunner, Scheduler};
pub use signing::Wallet;
