// src/lock/lockf.rs

//! Emulated whole-file locks via lockf(3)
//!
//! lockf has no shared mode, so shared requests take an exclusive lock. It
//! also locks from the current offset onward; the offset is moved to 0 for
//! the call and restored afterwards so the whole file is covered and the
//! caller's position is untouched.

use super::{Blocking, LockBackend, LockMode};
use nix::errno::Errno;
use std::os::fd::RawFd;

/// lockf(3) record locks standing in for flock
#[derive(Debug, Clone, Copy, Default)]
pub struct Lockf;

fn seek(fd: RawFd, offset: libc::off_t, whence: libc::c_int) -> Result<libc::off_t, Errno> {
    // SAFETY: lseek only reads its integer arguments.
    let pos = unsafe { libc::lseek(fd, offset, whence) };
    Errno::result(pos)
}

impl LockBackend for Lockf {
    fn lock(&self, fd: RawFd, mode: LockMode, blocking: Blocking) -> Result<(), Errno> {
        let function = match (mode, blocking) {
            (LockMode::Unlock, _) => libc::F_ULOCK,
            (_, Blocking::NoWait) => libc::F_TLOCK,
            (_, Blocking::Wait) => libc::F_LOCK,
        };

        let saved = seek(fd, 0, libc::SEEK_CUR)?;
        seek(fd, 0, libc::SEEK_SET)?;
        // SAFETY: lockf only reads its integer arguments; len 0 means "to EOF and beyond".
        let ret = unsafe { libc::lockf(fd, function, 0) };
        let result = Errno::result(ret).map(drop);
        seek(fd, saved, libc::SEEK_SET)?;

        result.map_err(|errno| match (mode, blocking, errno) {
            (LockMode::Unlock, _, e) => e,
            // POSIX allows either for a held lock under F_TLOCK.
            (_, Blocking::NoWait, Errno::EACCES) => Errno::EAGAIN,
            (_, _, Errno::EINVAL) => Errno::EOPNOTSUPP,
            (_, _, e) => e,
        })
    }

    fn supports_shared(&self) -> bool {
        false
    }
}
