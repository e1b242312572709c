//! Error taxonomy for the assistant.
//!
//! Every fallible operation returns an explicit [`Result`]; callers branch
//! on the variant instead of relying on propagation side channels:
//!
//! - [`Error::Backend`] ends the current generation attempt (exit 1).
//! - [`Error::Parse`] is recovered inside the tool selector and never
//!   reaches the lifecycle loop.
//! - [`Error::Execution`] is reported with a nonzero exit code.
//! - [`Error::Interrupted`] is always terminal (exit 130).
//! - [`Error::Config`] is fatal at startup.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Network, auth, or model failure from the remote backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Malformed tool-selection response. Recovered locally via defaults.
    #[error("unparseable tool selection: {0}")]
    Parse(String),

    /// Child process spawn or runtime failure.
    #[error("execution error: {0}")]
    Execution(String),

    /// User cancel (Ctrl+C) at any await point.
    #[error("operation cancelled by user")]
    Interrupted,

    /// Invalid configuration, fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Process exit code for this error when it terminates the session.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_maps_to_130() {
        assert_eq!(Error::Interrupted.exit_code(), 130);
        assert_eq!(Error::Backend("down".into()).exit_code(), 1);
        assert_eq!(Error::Config("bad yaml".into()).exit_code(), 1);
    }

    #[test]
    fn display_includes_detail() {
        let err = Error::Backend("HTTP 500".into());
        assert!(err.to_string().contains("HTTP 500"));
    }
}
