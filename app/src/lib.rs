pub mod cli;
pub mod commands;
pub mod render;

pub use cli::{Cli, Command};
pub use commands::{run, Client};

use talksense_core::ClientError;

/// A failure the command already showed; only the exit status is left.
#[derive(Debug, thiserror::Error)]
#[error("reply failed")]
pub struct AlreadyReported;

/// User-facing text for a failed command. Client errors are reduced to their
/// non-leaking message; anything else is shown as is.
pub fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ClientError>() {
        Some(client_error) => client_error.user_message(),
        None => err.to_string(),
    }
}
