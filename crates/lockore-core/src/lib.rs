//! lockore-core: shared types for the lockore record vault
//!
//! - `error`: the error taxonomy every lockore crate returns
//! - `config`: TOML configuration schema (`lockore.toml`)
//! - `cancel`: cooperative cancellation flag shared with background work
//! - `worker`: one-shot background worker with a join point
//! - `logging`: tracing-subscriber initialisation for binaries

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod worker;

pub use cancel::CancelToken;
pub use error::{LockoreError, LockoreResult};
pub use worker::BackgroundTask;
