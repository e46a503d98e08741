//! OS-level signalling and process-table queries.
//!
//! Children are spawned as leaders of their own process group, so a
//! termination request reaches the whole tree a dev command tends to create
//! (`npm run dev` → node → esbuild). Non-unix targets fall back to killing the
//! direct child.

use std::io;

use tokio::process::Child;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Requests graceful termination (SIGINT to the process group).
#[cfg(unix)]
pub(crate) fn interrupt(child: &mut Child) -> io::Result<()> {
    signal_group(child, Signal::SIGINT)
}

/// Forces termination (SIGKILL to the process group, then the child itself).
#[cfg(unix)]
pub(crate) fn force_kill(child: &mut Child) -> io::Result<()> {
    signal_group(child, Signal::SIGKILL)?;
    match child.start_kill() {
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

/// Interrupts whatever is left of the group led by `pgid`.
///
/// Works after the leader has been reaped, for descendants it left behind.
#[cfg(unix)]
pub(crate) fn interrupt_group(pgid: u32) -> io::Result<()> {
    signal_pgid(pgid, Signal::SIGINT)
}

/// Kills whatever is left of the group led by `pgid`.
#[cfg(unix)]
pub(crate) fn kill_group(pgid: u32) -> io::Result<()> {
    signal_pgid(pgid, Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(child: &Child, sig: Signal) -> io::Result<()> {
    match child.id() {
        Some(pid) => signal_pgid(pid, sig),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn signal_pgid(pgid: u32, sig: Signal) -> io::Result<()> {
    let Ok(raw) = i32::try_from(pgid) else {
        return Ok(());
    };
    match signal::killpg(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Whether `pid` is still listed in the OS process table.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    matches!(signal::kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
pub(crate) fn interrupt(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(not(unix))]
pub(crate) fn force_kill(child: &mut Child) -> io::Result<()> {
    match child.start_kill() {
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

#[cfg(not(unix))]
pub(crate) fn interrupt_group(_pgid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn kill_group(_pgid: u32) -> io::Result<()> {
    Ok(())
}

/// Whether `pid` is still listed in the OS process table.
///
/// Not queried on this platform; the supervisor's lifecycle state is authoritative.
#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}
