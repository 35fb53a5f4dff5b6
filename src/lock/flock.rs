// src/lock/flock.rs

//! Native whole-file locks via flock(2)

use super::{Blocking, LockBackend, LockMode};
use nix::errno::Errno;
use std::os::fd::RawFd;

/// flock(2): real shared and exclusive locks, with native non-blocking mode
#[derive(Debug, Clone, Copy, Default)]
pub struct Flock;

impl LockBackend for Flock {
    fn lock(&self, fd: RawFd, mode: LockMode, blocking: Blocking) -> Result<(), Errno> {
        let mut operation = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
            LockMode::Unlock => libc::LOCK_UN,
        };
        if blocking == Blocking::NoWait {
            operation |= libc::LOCK_NB;
        }

        // SAFETY: flock only reads its integer arguments; a bad fd yields EBADF.
        let ret = unsafe { libc::flock(fd, operation) };
        Errno::result(ret).map(drop)
    }

    fn supports_shared(&self) -> bool {
        true
    }
}
