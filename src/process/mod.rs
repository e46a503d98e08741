//! Process supervision.
//!
//! ## Contents
//! - [`ProcessSupervisor`] start / stop / wait, liveness source for process checks
//! - [`ServiceProcess`], [`ExitReport`], [`ProcessStatus`] runtime record of one launch
//! - [`LineHandler`], [`OutputStream`], [`TracingLines`] output line delivery
//! - [`Environment`], [`service_urls`] explicit child environment

mod env;
mod handler;
mod os;
mod service;
mod supervisor;

pub use env::{Environment, service_urls};
pub use handler::{HandlerError, LineHandler, OutputStream, TracingLines};
pub use os::pid_alive;
pub use service::{ExitReport, ProcessStatus, ServiceProcess};
pub use supervisor::ProcessSupervisor;
