use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

static TRACE_HOOK: Once = Once::new();

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Render an error's `source()` chain, outermost cause first.
///
/// The error itself is not included; its message travels separately.
pub(crate) fn error_trace(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut trace = Vec::new();
    let mut cause = error.source();
    while let Some(e) = cause {
        trace.push(e.to_string());
        cause = e.source();
    }
    trace
}

/// Best-effort message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_owned()
    }
}

/// Run `f`, catching a panic as its message and the stack frames it was raised from.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, (String, Vec<String>)> {
    install_trace_hook();
    PANIC_TRACE.with(|trace| trace.borrow_mut().clear());

    let was_capturing = CAPTURING.with(|capturing| capturing.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|capturing| capturing.set(was_capturing));

    outcome.map_err(|payload| {
        let trace = PANIC_TRACE.with(|trace| trace.take());
        (panic_message(payload.as_ref()), trace)
    })
}

/// Chains onto the current panic hook. Frames are only recorded inside [`catch_panic`].
fn install_trace_hook() {
    TRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.try_with(Cell::get).unwrap_or(false) {
                let frames = backtrace_frames(&Backtrace::force_capture());
                PANIC_TRACE.try_with(|trace| *trace.borrow_mut() = frames).ok();
            }
            previous(info);
        }));
    });
}

fn backtrace_frames(backtrace: &Backtrace) -> Vec<String> {
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    backtrace
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::{Display, Formatter};

    #[derive(Debug)]
    struct Outer(Inner);

    #[derive(Debug)]
    struct Inner;

    impl Display for Outer {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "outer")
        }
    }

    impl Display for Inner {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "inner")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    impl StdError for Inner {}

    #[test]
    fn test_error_trace_walks_sources() {
        assert_eq!(error_trace(&Outer(Inner)), vec!["inner".to_string()]);
        assert!(error_trace(&Inner).is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }

    #[test]
    fn test_catch_panic_records_frames() {
        assert_eq!(catch_panic(|| 6).unwrap(), 6);

        let (message, trace) = catch_panic(|| panic!("caught")).unwrap_err();
        assert_eq!(message, "caught");
        assert!(!trace.is_empty());

        let (_, again) = catch_panic(|| panic!("caught again")).unwrap_err();
        assert!(!again.is_empty());
        assert!(catch_panic(|| ()).is_ok());
    }
}
