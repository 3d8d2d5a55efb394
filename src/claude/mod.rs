//! Everything that talks to the `claude` CLI: argument construction,
//! process supervision, stream parsing and on-disk session lookup.

pub mod command;
pub mod resolver;
pub mod runner;
pub mod stream;

pub use command::{InvocationRequest, Resumption};
pub use resolver::SessionResolver;
pub use runner::ClaudeRunner;
pub use stream::{InvocationResult, PermissionDenial};

/// Why an invocation could not start.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The session already has a process in flight.
    #[error("a claude process is already running in {0}")]
    Busy(String),
    /// The executable could not be launched.
    #[error("failed to launch `{cli}`: {source}")]
    Spawn {
        cli: String,
        #[source]
        source: std::io::Error,
    },
}
