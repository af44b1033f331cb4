use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};

// signal handlers can only reach static storage; the token is a view onto it
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// cancellation token threaded through long-running operations
///
/// components call [`CancelToken::check`] at i/o boundaries; once a
/// termination signal fires, the next check unwinds with
/// [`Error::Interrupted`] and the staging guard reclaims scratch space.
#[derive(Clone, Copy, Debug, Default)]
pub struct CancelToken;

impl CancelToken {
    /// token that is never cancelled (tests, library callers)
    pub fn new() -> Self {
        CancelToken
    }

    /// install SIGINT/SIGTERM handlers that cancel this token
    pub fn install() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for sig in [Signal::SIGINT, Signal::SIGTERM] {
            unsafe { signal::sigaction(sig, &action) }.map_err(|errno| Error::Io {
                path: "<signal>".into(),
                source: std::io::Error::from_raw_os_error(errno as i32),
            })?;
        }
        Ok(CancelToken)
    }

    /// whether a termination signal has fired
    pub fn is_cancelled(&self) -> bool {
        INTERRUPTED.load(Ordering::SeqCst)
    }

    /// error out if a termination signal has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // single test: the backing flag is shared process state
    #[test]
    fn test_token_observes_flag() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        INTERRUPTED.store(true, Ordering::SeqCst);
        assert!(matches!(token.check(), Err(Error::Interrupted)));
        INTERRUPTED.store(false, Ordering::SeqCst);
    }
}
