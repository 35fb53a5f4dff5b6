// src/lock/mod.rs

//! Cross-process advisory locks
//!
//! Locks are taken on a file descriptor and only exclude other processes that
//! ask for the same lock; they say nothing about threads of one process,
//! and callers are assumed to be single-threaded. Which lock guards which
//! resource (the registry file, a port's build directory, ...) is the
//! caller's convention.
//!
//! A blocking request is turned into a bounded poll: a one-second SIGALRM
//! interrupts the wait, pending events get a chance to run (and to abort the
//! wait), then the request is retried.
//!
//! Two implementations sit behind [`LockBackend`]: `flock(2)` where the
//! platform has it, and a `lockf(3)` emulation otherwise. The choice is made
//! once per build by [`Backend::native`].

mod alarm;
#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
mod flock;
mod lockf;

#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
pub use flock::Flock;
pub use lockf::Lockf;

pub use crate::error::LockError;

use alarm::AlarmGuard;
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// What to do with the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    Unlock,
}

/// Whether to wait for a conflicting holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking {
    Wait,
    NoWait,
}

/// Switch-style request, as received from a command line or script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockFlags {
    pub shared: bool,
    pub exclusive: bool,
    pub unlock: bool,
    pub no_block: bool,
}

impl LockFlags {
    /// Validate the switches into a mode and blocking behaviour.
    ///
    /// Exactly one of shared, exclusive and unlock must be set, and
    /// `no_block` cannot be combined with unlock.
    pub fn request(&self) -> Result<(LockMode, Blocking), LockError> {
        let mode = match (self.shared, self.exclusive, self.unlock) {
            (true, false, false) => LockMode::Shared,
            (false, true, false) => LockMode::Exclusive,
            (false, false, true) => LockMode::Unlock,
            _ => {
                return Err(LockError::InvalidArgument(
                    "use one of shared, exclusive, or unlock, and optionally no_block",
                ));
            }
        };
        let blocking = if self.no_block {
            Blocking::NoWait
        } else {
            Blocking::Wait
        };
        check_request(mode, blocking)?;
        Ok((mode, blocking))
    }
}

/// An OS locking primitive over a raw descriptor
///
/// Implementations return the raw errno; translation into [`LockError`]
/// happens in one place for all of them.
pub trait LockBackend {
    fn lock(&self, fd: RawFd, mode: LockMode, blocking: Blocking) -> Result<(), Errno>;

    /// Whether shared locks are really shared rather than exclusive.
    fn supports_shared(&self) -> bool;
}

/// Available backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    #[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
    Flock,
    Lockf,
}

impl Backend {
    /// The preferred backend for this platform
    pub const fn native() -> Self {
        #[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
        {
            Backend::Flock
        }
        #[cfg(any(target_os = "solaris", target_os = "illumos"))]
        {
            Backend::Lockf
        }
    }

    fn implementation(self) -> &'static dyn LockBackend {
        match self {
            #[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
            Backend::Flock => &Flock,
            Backend::Lockf => &Lockf,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::native()
    }
}

/// Tuning for [`acquire_with`]
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Seconds a blocking call may wait before pending events are checked
    pub tick_secs: u32,
    pub backend: Backend,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            tick_secs: 1,
            backend: Backend::native(),
        }
    }
}

/// Deferred work that may run while a blocking acquire waits
///
/// `ready` is polled each time the wait is interrupted by the timer; if it
/// returns true `invoke` runs, and an error from it aborts the acquire.
pub trait EventQueue {
    fn ready(&self) -> bool;
    fn invoke(&mut self) -> Result<(), String>;
}

/// No pending work; blocking acquires wait until they get the lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl EventQueue for NoEvents {
    fn ready(&self) -> bool {
        false
    }

    fn invoke(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// A shareable cancellation switch, e.g. set from a SIGINT handler
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl EventQueue for CancelFlag {
    fn ready(&self) -> bool {
        self.is_cancelled()
    }

    fn invoke(&mut self) -> Result<(), String> {
        Err("cancelled while waiting for lock".to_string())
    }
}

/// Take, share or release the advisory lock on `fd` with default options.
pub fn acquire(fd: impl AsFd, mode: LockMode, blocking: Blocking) -> Result<(), LockError> {
    acquire_with(fd, mode, blocking, LockOptions::default(), &mut NoEvents)
}

/// [`acquire`] driven by switch-style flags.
pub fn acquire_flags(fd: impl AsFd, flags: LockFlags) -> Result<(), LockError> {
    let (mode, blocking) = flags.request()?;
    acquire(fd, mode, blocking)
}

/// Take, share or release the advisory lock on `fd`.
///
/// `NoWait` together with `Unlock` is rejected before any system call. A
/// blocking request is retried every `options.tick_secs` until it succeeds,
/// fails for a reason other than the timer, or `events` aborts it.
pub fn acquire_with(
    fd: impl AsFd,
    mode: LockMode,
    blocking: Blocking,
    options: LockOptions,
    events: &mut dyn EventQueue,
) -> Result<(), LockError> {
    let fd = fd.as_fd().as_raw_fd();
    lock_fd(
        options.backend.implementation(),
        fd,
        mode,
        blocking,
        options.tick_secs,
        events,
    )
}

fn check_request(mode: LockMode, blocking: Blocking) -> Result<(), LockError> {
    if mode == LockMode::Unlock && blocking == Blocking::NoWait {
        return Err(LockError::InvalidArgument(
            "no_block cannot be used with unlock",
        ));
    }
    Ok(())
}

fn lock_fd(
    backend: &dyn LockBackend,
    fd: RawFd,
    mode: LockMode,
    blocking: Blocking,
    tick_secs: u32,
    events: &mut dyn EventQueue,
) -> Result<(), LockError> {
    check_request(mode, blocking)?;

    if mode == LockMode::Shared && !backend.supports_shared() {
        debug!("shared lock on fd {} is taken as exclusive by this backend", fd);
    }

    if mode == LockMode::Unlock || blocking == Blocking::NoWait {
        return backend.lock(fd, mode, blocking).map_err(translate);
    }

    let timer = AlarmGuard::install(tick_secs)?;
    loop {
        // A tick that expires before the call starts is not retried; accepted.
        timer.arm();
        let result = backend.lock(fd, mode, blocking);
        timer.disarm();

        match result {
            Ok(()) => return Ok(()),
            Err(Errno::EINTR) if timer.fired() => {
                debug!("lock wait on fd {} interrupted by timer, retrying", fd);
                run_pending(events)?;
            }
            Err(errno) => return Err(translate(errno)),
        }
    }
}

fn run_pending(events: &mut dyn EventQueue) -> Result<(), LockError> {
    if events.ready() {
        events.invoke().map_err(LockError::Aborted)?;
    }
    Ok(())
}

fn translate(errno: Errno) -> LockError {
    match errno {
        Errno::EAGAIN => LockError::WouldBlock,
        Errno::EBADF => LockError::BadDescriptor,
        Errno::EINVAL => LockError::InvalidArgument("rejected by the operating system"),
        Errno::EOPNOTSUPP => LockError::Unsupported,
        other => LockError::Os(other.desc().to_string()),
    }
}

/// A lock held on an open file, released when dropped
#[derive(Debug)]
pub struct FileLock {
    file: File,
    mode: LockMode,
}

impl FileLock {
    /// Lock an already open file.
    pub fn new(file: File, mode: LockMode, blocking: Blocking) -> Result<Self, LockError> {
        Self::new_with(file, mode, blocking, &mut NoEvents)
    }

    /// Lock an already open file, letting `events` abort a blocking wait.
    pub fn new_with(
        file: File,
        mode: LockMode,
        blocking: Blocking,
        events: &mut dyn EventQueue,
    ) -> Result<Self, LockError> {
        if mode == LockMode::Unlock {
            return Err(LockError::InvalidArgument("a held lock needs shared or exclusive"));
        }
        acquire_with(&file, mode, blocking, LockOptions::default(), events)?;
        Ok(Self { file, mode })
    }

    /// Open (creating if needed) `path` and lock it.
    pub fn open(path: impl AsRef<Path>, mode: LockMode, blocking: Blocking) -> crate::Result<Self> {
        Self::open_with(path, mode, blocking, &mut NoEvents)
    }

    /// [`FileLock::open`] with a pending-event queue for blocking waits.
    pub fn open_with(
        path: impl AsRef<Path>,
        mode: LockMode,
        blocking: Blocking,
        events: &mut dyn EventQueue,
    ) -> crate::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        debug!("Locking {} ({:?}, {:?})", path.display(), mode, blocking);
        Ok(Self::new_with(file, mode, blocking, events)?)
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = acquire(&self.file, LockMode::Unlock, Blocking::Wait) {
            warn!("Failed to release advisory lock: {}", e);
        }
    }
}
