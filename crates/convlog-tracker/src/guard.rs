//! Error isolation for client callbacks.
//!
//! Callbacks run on the client's dispatch threads. An error or panic escaping
//! one would unwind into code we do not own, so every callback handed to the
//! client is built through [`guard`].

use convlog_client::Handler;
use convlog_core::ConvlogResult;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Wrap a fallible handler into a callback that never fails.
///
/// An `Err` or a panic from `handler` produces exactly one `error` log entry,
/// tagged with `label`, and is then dropped.
pub fn guard<E, F>(label: &'static str, handler: F) -> Handler<E>
where
    E: 'static,
    F: Fn(E) -> ConvlogResult<()> + Send + Sync + 'static,
{
    Arc::new(move |event: E| {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(handler = label, error = %e, "Event handler failed"),
            Err(payload) => error!(
                handler = label,
                panic = %panic_message(payload.as_ref()),
                "Event handler panicked"
            ),
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use convlog_core::ConvlogError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ok_handler_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handler = guard("count", move |n: usize| {
            seen.fetch_add(n, Ordering::SeqCst);
            Ok(())
        });
        handler(2);
        handler(3);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_error_is_suppressed() {
        let handler = guard("fails", |_: ()| Err(ConvlogError::Handler("boom".into())));
        handler(());
    }

    #[test]
    fn test_panic_is_suppressed() {
        let handler = guard("panics", |n: u32| -> ConvlogResult<()> {
            if n > 0 {
                panic!("bad input {n}");
            }
            Ok(())
        });
        handler(1);
        handler(0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
