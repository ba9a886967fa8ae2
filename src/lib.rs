//! # ballotflow
//!
//! Streams votes from a source into a durable queue, counts them in memory
//! and periodically adds the counts to a poll store.
//!
//! - `vote_publisher` binary: [`runtime::run_publisher`]
//! - `vote_counter` binary: [`runtime::run_counter`]
//! - `poll_admin` binary: create polls and read results

pub mod config;
pub mod pipeline;
pub mod runtime;
pub mod shutdown;
pub mod source;
pub mod sqlite_pragma;
pub mod store;
pub mod transport;

pub use config::{ConfigError, PipelineConfig, SourceKind};
pub use shutdown::{ShutdownCoordinator, ShutdownReason, ShutdownState};

/// Install the env_logger backend, writing to stderr
///
/// `RUST_LOG` wins over `default_filter`.
pub fn init_logging(default_filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .try_init();
}
