//! SIGINT/SIGTERM handling for a clean stop.
//!
//! The handlers only set a static atomic; the main loop checks it once per
//! tick through [`ShutdownSignal`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);

/// Shutdown request raised by a signal or by the daemon itself.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSignal {
    _private: (),
}

impl ShutdownSignal {
    /// Install the SIGINT and SIGTERM handlers.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        register_unix_handlers()?;
        Ok(Self { _private: () })
    }

    /// True once a stop was requested.
    #[inline]
    pub fn requested(&self) -> bool {
        SHUTDOWN_FLAG.load(Ordering::Relaxed)
    }

    /// Request a stop from inside the daemon.
    pub fn request(&self) {
        info!("Shutdown requested");
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }

    /// Signals received so far.
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn on_signal(_: c_int) {
        SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }

    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only touches atomics, which is async-signal-safe.
        let previous = unsafe { libc::signal(signal, on_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    debug!("Signal handlers registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_request_is_observed() {
        let signal = ShutdownSignal::install().unwrap();
        signal.request();
        assert!(signal.requested());
        SHUTDOWN_FLAG.store(false, Ordering::Relaxed);
    }
}
