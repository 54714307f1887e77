//! At-most-once delivery of an association's establishment outcome.
//!
//! An application may register a pair of handlers:
//! one for the negotiated outcome and one for failure.
//! Whichever outcome is reported first is delivered,
//! and every later report for the same association is discarded.
use std::sync::{Arc, Mutex};

use tracing::debug;

type Handler<T> = Box<dyn FnOnce(T) + Send>;

struct Handlers<S, E> {
    on_success: Option<Handler<S>>,
    on_error: Option<Handler<E>>,
    delivered: bool,
}

/// A mutex-guarded table of establishment handlers.
///
/// Clones share the same table,
/// so the outcome may be reported from any of them
/// and is still delivered only once.
pub struct EstablishmentHandlers<S, E> {
    inner: Arc<Mutex<Handlers<S, E>>>,
}

impl<S, E> Clone for EstablishmentHandlers<S, E> {
    fn clone(&self) -> Self {
        EstablishmentHandlers {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, E> std::fmt::Debug for EstablishmentHandlers<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishmentHandlers")
            .field("delivered", &self.is_delivered())
            .finish()
    }
}

impl<S, E> Default for EstablishmentHandlers<S, E> {
    fn default() -> Self {
        EstablishmentHandlers {
            inner: Arc::new(Mutex::new(Handlers {
                on_success: None,
                on_error: None,
                delivered: false,
            })),
        }
    }
}

impl<S, E> EstablishmentHandlers<S, E> {
    pub fn new<F, G>(on_success: F, on_error: G) -> Self
    where
        F: FnOnce(S) + Send + 'static,
        G: FnOnce(E) + Send + 'static,
    {
        EstablishmentHandlers {
            inner: Arc::new(Mutex::new(Handlers {
                on_success: Some(Box::new(on_success)),
                on_error: Some(Box::new(on_error)),
                delivered: false,
            })),
        }
    }

    /// Whether an outcome was already delivered.
    pub fn is_delivered(&self) -> bool {
        match self.inner.lock() {
            Ok(handlers) => handlers.delivered,
            Err(poisoned) => poisoned.into_inner().delivered,
        }
    }

    /// Report a successful establishment.
    /// Returns whether the handler was called.
    pub fn succeed(&self, value: S) -> bool {
        let handler = self.take(|h| h.on_success.take());
        match handler {
            Some(handler) => {
                handler(value);
                true
            }
            None => false,
        }
    }

    /// Report a failed establishment.
    /// Returns whether the handler was called.
    pub fn fail(&self, error: E) -> bool {
        let handler = self.take(|h| h.on_error.take());
        match handler {
            Some(handler) => {
                handler(error);
                true
            }
            None => false,
        }
    }

    /// Mark the table as delivered and take the chosen handler.
    /// The other handler is dropped.
    /// The lock is released before the handler runs.
    fn take<T>(&self, pick: impl FnOnce(&mut Handlers<S, E>) -> Option<T>) -> Option<T> {
        let mut handlers = match self.inner.lock() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if handlers.delivered {
            debug!("Establishment outcome already delivered");
            return None;
        }
        handlers.delivered = true;
        let handler = pick(&mut *handlers);
        handlers.on_success = None;
        handlers.on_error = None;
        handler
    }
}

#[cfg(test)]
mod tests {
    use super::EstablishmentHandlers;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting() -> (
        EstablishmentHandlers<u32, &'static str>,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
    ) {
        let ok = Arc::new(AtomicUsize::new(0));
        let err = Arc::new(AtomicUsize::new(0));
        let (ok2, err2) = (Arc::clone(&ok), Arc::clone(&err));
        let handlers = EstablishmentHandlers::new(
            move |_| {
                ok2.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                err2.fetch_add(1, Ordering::SeqCst);
            },
        );
        (handlers, ok, err)
    }

    #[test]
    fn first_outcome_wins() {
        let (handlers, ok, err) = counting();
        assert!(handlers.succeed(1));
        assert!(!handlers.fail("late"));
        assert!(!handlers.succeed(2));
        assert_eq!(ok.load(Ordering::SeqCst), 1);
        assert_eq!(err.load(Ordering::SeqCst), 0);
        assert!(handlers.is_delivered());
    }

    #[test]
    fn error_then_success_is_dropped() {
        let (handlers, ok, err) = counting();
        assert!(handlers.fail("reset"));
        assert!(!handlers.succeed(1));
        assert_eq!(ok.load(Ordering::SeqCst), 0);
        assert_eq!(err.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_threads_deliver_once() {
        let (handlers, ok, err) = counting();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let handlers = handlers.clone();
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        handlers.succeed(i);
                    } else {
                        handlers.fail("closed");
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(ok.load(Ordering::SeqCst) + err.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_table_delivers_nothing() {
        let handlers: EstablishmentHandlers<u32, u32> = Default::default();
        assert!(!handlers.succeed(1));
        assert!(handlers.is_delivered());
    }
}
