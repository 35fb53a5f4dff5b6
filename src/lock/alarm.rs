// src/lock/alarm.rs

//! One-shot SIGALRM timer used to interrupt blocking lock calls
//!
//! While the guard lives, SIGALRM is routed to a handler that only sets an
//! atomic flag, installed without `SA_RESTART` so a pending `flock`/`lockf`
//! returns `EINTR`. Dropping the guard cancels the timer and puts back the
//! previous handler and any alarm that was pending when it was installed.

use crate::error::LockError;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::alarm;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

static FIRED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_: libc::c_int) {
    FIRED.store(true, Ordering::SeqCst);
}

pub(crate) struct AlarmGuard {
    previous: SigAction,
    pending: Option<u32>,
    installed_at: Instant,
    tick_secs: u32,
}

impl AlarmGuard {
    pub(crate) fn install(tick_secs: u32) -> Result<Self, LockError> {
        let action = SigAction::new(
            SigHandler::Handler(on_alarm),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        let previous = unsafe { sigaction(Signal::SIGALRM, &action) }
            .map_err(|e| LockError::Os(format!("cannot install SIGALRM handler: {}", e.desc())))?;
        let pending = alarm::cancel();

        Ok(Self {
            previous,
            pending,
            installed_at: Instant::now(),
            tick_secs: tick_secs.max(1),
        })
    }

    /// Clear the flag and start a fresh tick.
    pub(crate) fn arm(&self) {
        FIRED.store(false, Ordering::SeqCst);
        alarm::set(self.tick_secs);
    }

    pub(crate) fn disarm(&self) {
        alarm::cancel();
    }

    /// Whether the current tick expired.
    pub(crate) fn fired(&self) -> bool {
        FIRED.load(Ordering::SeqCst)
    }
}

impl Drop for AlarmGuard {
    fn drop(&mut self) {
        alarm::cancel();
        // SAFETY: restores the disposition that was in place before `install`.
        unsafe {
            let _ = sigaction(Signal::SIGALRM, &self.previous);
        }
        if let Some(secs) = self.pending {
            let elapsed = u32::try_from(self.installed_at.elapsed().as_secs()).unwrap_or(u32::MAX);
            alarm::set(secs.saturating_sub(elapsed).max(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restores_previous_handler() {
        let _serial = crate::lock::tests::SIGNALS.lock().unwrap_or_else(|e| e.into_inner());

        let before = unsafe {
            sigaction(
                Signal::SIGALRM,
                &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
            )
        }
        .unwrap();

        {
            let guard = AlarmGuard::install(1).unwrap();
            guard.arm();
            guard.disarm();
            assert!(!guard.fired());
        }

        let after = unsafe { sigaction(Signal::SIGALRM, &before) }.unwrap();
        assert_eq!(after.handler(), SigHandler::SigIgn);
    }

    #[test]
    fn test_fires_after_tick() {
        let _serial = crate::lock::tests::SIGNALS.lock().unwrap_or_else(|e| e.into_inner());

        let guard = AlarmGuard::install(1).unwrap();
        guard.arm();
        // Wait out the tick without relying on which thread gets the signal.
        let start = Instant::now();
        while !guard.fired() && start.elapsed().as_secs() < 5 {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(guard.fired());
    }
}
