//! The auto-commit daemon: watcher + timers + per-repository workers +
//! socket server, all driven from one control loop.

pub mod engine;
mod error;
pub mod logging;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;
mod watcher;
mod worker;

pub use engine::{Engine, EngineEvent, PendingReply};
pub use error::DaemonError;
pub use protocol::{
    request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, serve, start_blocking};
pub use scheduler::{Scheduler, TimerKind};
pub use watcher::RepoWatcher;
