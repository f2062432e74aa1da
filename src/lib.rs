//! Bridge to a radare2 style analysis tool running as a subprocess.
//!
//! The tool speaks a line oriented protocol over stdio: one command per
//! line in, a zero byte terminated response out. This crate wraps one
//! such subprocess into a [`session::Session`] that serializes commands
//! from concurrent callers, follows the seek, maps target memory into
//! the tool on demand and runs function analysis in a background
//! pipeline with results cached per function entry.

pub mod address;
pub mod analysis;
pub mod arch;
pub mod cache;
pub mod config;
pub mod error;
pub mod mapping;
pub mod memory;
pub mod pipe;
mod pipeline;
pub mod remote;
pub mod session;
pub mod version;

pub use address::Addr;
pub use analysis::{AnalysisOutcome, FunctionInfo};
pub use config::Config;
pub use error::{BrokenReason, Error};
pub use session::{Session, SessionBuilder, SessionHook};
