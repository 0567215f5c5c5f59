//! Narrow trait boundary between the allocator's search logic and the real
//! ioctl edge: the allocator is written against
//! [`KernelProbe`], [`crate::device::Device`] implements it against real
//! ioctls, and tests implement it against a scripted fake — no kernel
//! required to exercise the search.

use crate::atomic_request::AtomicRequest;
use crate::error::Error;
use crate::fb::FbInfo;

/// Result of one test-only atomic commit, after transient retry and
/// feasibility/fatal classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Feasible,
    Infeasible,
}

pub trait KernelProbe {
    /// Ask the kernel whether `req` would succeed, without applying it.
    fn test_commit(&mut self, req: &AtomicRequest) -> Result<ProbeOutcome, Error>;

    /// Fetch current width/height/format/modifier for `fb_id`, or `None` if
    /// the kernel reports no such framebuffer.
    fn get_fb(&mut self, fb_id: u32) -> Result<Option<FbInfo>, Error>;
}

/// Shared retry-forever-on-transient / classify-the-rest loop. `raw` performs exactly one kernel attempt and returns the errno
/// it observed, if any.
pub(crate) fn retry_test_commit(
    mut raw: impl FnMut() -> std::io::Result<()>,
) -> Result<ProbeOutcome, Error> {
    loop {
        match raw() {
            Ok(()) => return Ok(ProbeOutcome::Feasible),
            Err(io_err) => {
                let Some(errno) = io_err.raw_os_error() else {
                    return Err(Error::Device(io_err));
                };
                if Error::is_transient_errno(errno) {
                    continue;
                }
                return match Error::from_test_commit_errno(errno) {
                    Error::Einval | Error::Erange | Error::Enospc => Ok(ProbeOutcome::Infeasible),
                    other => Err(other),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_on_eagain_then_succeeds() {
        let attempts = Cell::new(0);
        let outcome = retry_test_commit(|| {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(std::io::Error::from_raw_os_error(rustix::io::Errno::AGAIN.raw_os_error()))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(outcome, ProbeOutcome::Feasible);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn einval_is_infeasible_not_fatal() {
        let outcome = retry_test_commit(|| {
            Err(std::io::Error::from_raw_os_error(rustix::io::Errno::INVAL.raw_os_error()))
        })
        .unwrap();
        assert_eq!(outcome, ProbeOutcome::Infeasible);
    }

    #[test]
    fn enomem_is_fatal() {
        let result = retry_test_commit(|| {
            Err(std::io::Error::from_raw_os_error(rustix::io::Errno::NOMEM.raw_os_error()))
        });
        assert!(matches!(result, Err(Error::Enomem)));
    }
}
