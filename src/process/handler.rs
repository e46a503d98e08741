use std::error::Error;
use std::fmt;

use tracing::{info, warn};

/// Which pipe a line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        })
    }
}

/// Error type returned by a [`LineHandler`].
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// # Consumer of child output lines.
///
/// Called from the reader task of each pipe, one line at a time, without the
/// trailing newline. A returned error is logged by the supervisor and the
/// reader moves on to the next line: a failing consumer never stalls or
/// aborts the child's output stream.
pub trait LineHandler: Send + Sync + 'static {
    fn on_line(&self, service: &str, stream: OutputStream, line: &str) -> Result<(), HandlerError>;
}

impl<F> LineHandler for F
where
    F: Fn(&str, OutputStream, &str) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn on_line(&self, service: &str, stream: OutputStream, line: &str) -> Result<(), HandlerError> {
        self(service, stream, line)
    }
}

/// Default handler: forwards lines to `tracing` (stdout at info, stderr at warn).
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLines;

impl LineHandler for TracingLines {
    fn on_line(&self, service: &str, stream: OutputStream, line: &str) -> Result<(), HandlerError> {
        match stream {
            OutputStream::Stdout => info!(target: "devvisor::output", service, "{line}"),
            OutputStream::Stderr => warn!(target: "devvisor::output", service, "{line}"),
        }
        Ok(())
    }
}
