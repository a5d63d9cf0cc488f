//! `worker` crate: contracts for the isolated units that run workflows.
//!
//! The orchestrator in the `engine` crate talks to workers only through
//! [`WorkerPool`], receives their progress as [`WorkerEvent`]s, and folds any
//! failure into a [`RunError`] whose [`Severity`] decides the unit's fate.

pub mod error;
pub mod events;
pub mod mock;
pub mod traits;

pub use error::{ErrorKind, RunError, Severity, TimeoutCause};
pub use events::{event_channel, EventReceiver, EventSender, LogMessage, WorkerEvent};
pub use traits::{Autoinstaller, Compiler, WorkerCall, WorkerPool, RUN_OPERATION};
