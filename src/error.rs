//! Crate-wide error type and the classification the allocator's search
//! switches on (feasibility / transient / fatal / programmer).

use std::fmt;

/// Errors surfaced by this crate.
///
/// Variant names mirror the kernel's own errno taxonomy:
/// callers that have debugged DRM atomic commits before will recognize them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid argument: a rejected property value, or the kernel's own
    /// `EINVAL` from a test commit.
    #[error("invalid argument")]
    Einval,
    /// Coordinate or value out of the range the kernel will accept.
    #[error("value out of range")]
    Erange,
    /// Source rectangle (or similar) the kernel considers unsatisfiable.
    #[error("no space left (invalid source coordinates)")]
    Enospc,
    /// Allocation failure, ours or the kernel's.
    #[error("out of memory")]
    Enomem,
    /// Attempted to register a plane/object that already exists.
    #[error("already exists")]
    Eexist,
    /// Referenced object (property, plane, framebuffer...) does not exist.
    #[error("no such object")]
    Enoent,
    /// Misuse of the API that is never a function of driver state: setting
    /// `CRTC_ID` on a layer, registering a duplicate plane id, etc. Not
    /// meaningful to retry.
    #[error("programmer error: {0}")]
    Programmer(&'static str),
    /// An I/O or ioctl failure that doesn't map onto the kinds above.
    #[error("device I/O error: {0}")]
    Device(#[source] std::io::Error),
}

/// The classification this crate defines over [`Error`] variants. The allocator's
/// search only ever matches on this, never on the raw variant, so that new
/// passthrough variants don't have to be taught to every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// "This branch is not viable" — absorbed locally by the search.
    Feasibility,
    /// `EINTR`/`EAGAIN` from a test commit — the caller loops until resolved.
    Transient,
    /// Surfaced to the caller; search is aborted and cursors unwound.
    Fatal,
    /// Caller misuse, returned unchanged, never retried.
    Programmer,
}

impl Error {
    /// Classify this error into the four buckets the search and the device
    /// wrapper switch on. `Device` carries any I/O failure that isn't one of
    /// the other, more specific variants.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Einval | Error::Erange | Error::Enospc => ErrorKind::Feasibility,
            Error::Enomem | Error::Eexist | Error::Enoent | Error::Device(_) => ErrorKind::Fatal,
            Error::Programmer(_) => ErrorKind::Programmer,
        }
    }

    /// True if `errno` is one the device wrapper should retry forever on.
    pub(crate) fn is_transient_errno(errno: i32) -> bool {
        errno == rustix::io::Errno::INTR.raw_os_error() || errno == rustix::io::Errno::AGAIN.raw_os_error()
    }

    /// Map a raw kernel errno from a test commit into the matching
    /// [`Error`] variant.
    pub(crate) fn from_test_commit_errno(errno: i32) -> Error {
        use rustix::io::Errno;
        match errno {
            e if e == Errno::INVAL.raw_os_error() => Error::Einval,
            e if e == Errno::RANGE.raw_os_error() => Error::Erange,
            e if e == Errno::NOSPC.raw_os_error() => Error::Enospc,
            e if e == Errno::NOMEM.raw_os_error() => Error::Enomem,
            _ => Error::Device(std::io::Error::from_raw_os_error(errno)),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Feasibility => "feasibility",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Programmer => "programmer",
        };
        f.write_str(s)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
