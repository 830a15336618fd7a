//! 🧵 Workers: the ones who actually do the work while the Supervisor takes
//! all the credit in the sprint retro.
//!
//! 🚀 This module is like a factory floor, except instead of hard hats
//! we wear `#[derive(Debug)]` and instead of OSHA violations
//! we have borrow checker violations. 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

mod object_worker;
pub(in crate::supervisors) use object_worker::ObjectWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" — Seinfeld, on Rust
pub(in crate::supervisors) trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify.
    fn start(self) -> JoinHandle<Result<()>>;
}
