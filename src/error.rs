use std::io;
use thiserror::Error;

/// Reason why the connection to the analysis tool stopped working.
///
/// The session keeps the first reason it observes and consults it on the
/// next command to decide between a transparent reopen and a hard error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokenReason {
    /// Writing the command line into the tool stdin failed.
    WriteFailed,
    /// Reading the response from the tool stdout failed.
    ReadFailed,
    /// The response never completed within the configured read budget.
    ReadTimeout,
    /// The tool closed its side of the pipe (EOF before the sentinel).
    ClosedByTool,
    /// The session owner closed the session deliberately.
    Shutdown,
}

impl BrokenReason {
    /// Whether the session is allowed to spawn a fresh tool process the
    /// next time a command arrives. A deliberate shutdown must stay closed.
    pub fn should_reopen(self) -> bool {
        !matches!(self, BrokenReason::Shutdown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BrokenReason::WriteFailed => "write failed",
            BrokenReason::ReadFailed => "read failed",
            BrokenReason::ReadTimeout => "read timeout",
            BrokenReason::ClosedByTool => "closed by tool",
            BrokenReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for BrokenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // tool process lifecycle
    #[error("tool executable not found: {0}")]
    ToolNotFound(#[from] which::Error),
    #[error("tool spawn: {0}")]
    Spawn(io::Error),
    #[error("tool stdio endpoint unavailable")]
    Stdio,
    #[error("pipe is broken ({0})")]
    PipeBroken(BrokenReason),
    #[error("session is closed")]
    Closed,

    // command exchange
    #[error("analysis pipeline is busy")]
    Busy,
    #[error("unexpected response to `{command}`: {details}")]
    UnexpectedResponse {
        command: String,
        details: String,
    },
    #[error("invalid json response: {0}")]
    Json(#[from] serde_json::Error),

    // target memory access
    #[error("no mappable region for address {0}")]
    RegionUnavailable(crate::address::Addr),
    #[error("target process memory access: {0}")]
    MemoryAccess(io::Error),

    // environment
    #[error("configuration: {0}")]
    Config(String),
    #[error("io operation: {0}")]
    Io(#[from] io::Error),
    #[error("channel disconnected")]
    Disconnected,
}

impl Error {
    /// Whether the error ends the session for good. Non-fatal errors leave
    /// the session usable for further commands.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ToolNotFound(_) | Error::Spawn(_) | Error::Stdio | Error::Closed => true,
            Error::PipeBroken(reason) => !reason.should_reopen(),
            _ => false,
        }
    }
}

/// Consume and log an unsuccessful result, returning `Option`.
#[macro_export]
macro_rules! weak_error {
    ($res:expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "r2bridge", "{:#}", e);
                None
            }
        }
    };
}
