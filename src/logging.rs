//! Pluggable diagnostics sink.
//!
//! The crate always logs through `tracing`; this module additionally lets an
//! embedding application install a handler closure, mirroring the
//! priority-setter/handler-setter pair the client API requires. A `None`
//! handler is the default and leaves `tracing` as the only sink ("null
//! handler restores stderr default", once the embedder installs a
//! `tracing_subscriber::fmt` subscriber).

use std::fmt;
use std::sync::{OnceLock, RwLock};

use tracing::Level;

type Handler = dyn Fn(Level, &str) + Send + Sync;

static PRIORITY: OnceLock<RwLock<Level>> = OnceLock::new();
static HANDLER: OnceLock<RwLock<Option<Box<Handler>>>> = OnceLock::new();

fn priority_lock() -> &'static RwLock<Level> {
    PRIORITY.get_or_init(|| RwLock::new(Level::INFO))
}

fn handler_lock() -> &'static RwLock<Option<Box<Handler>>> {
    HANDLER.get_or_init(|| RwLock::new(None))
}

/// Set the minimum level this crate's own log events are forwarded to the
/// handler at. Has no effect on `tracing`'s own subscriber filtering.
pub fn set_priority(level: Level) {
    *priority_lock().write().unwrap() = level;
}

/// Install (or, with `None`, remove) a handler closure that receives a copy
/// of every log event this crate emits at or above [`set_priority`]'s level.
pub fn set_handler(handler: Option<Box<Handler>>) {
    *handler_lock().write().unwrap() = handler;
}

/// Emit one log event: always through `tracing`, and through the installed
/// handler (if any, and if `level` passes the configured priority).
pub(crate) fn emit(level: Level, args: fmt::Arguments<'_>) {
    let msg = args.to_string();
    match level {
        Level::ERROR => tracing::error!("{msg}"),
        Level::WARN => tracing::warn!("{msg}"),
        Level::INFO => tracing::info!("{msg}"),
        Level::DEBUG => tracing::debug!("{msg}"),
        Level::TRACE => tracing::trace!("{msg}"),
    }
    if level <= *priority_lock().read().unwrap() {
        if let Some(handler) = handler_lock().read().unwrap().as_ref() {
            handler(level, &msg);
        }
    }
}

macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::logging::emit($level, format_args!($($arg)*))
    };
}

pub(crate) use log;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn handler_receives_events_above_priority() {
        set_priority(Level::DEBUG);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        set_handler(Some(Box::new(move |level, msg| {
            seen2.lock().unwrap().push((level, msg.to_string()));
        })));

        log!(Level::DEBUG, "hello {}", 1);
        log!(Level::TRACE, "should not be forwarded");

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "hello 1");

        set_handler(None);
        set_priority(Level::INFO);
    }
}
