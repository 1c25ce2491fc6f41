//! Subscriber callbacks and best-effort fan-out.
//!
//! Callbacks are invoked outside of any entity lock, on a snapshot of the
//! subscriber list. A failing callback is logged and collected; delivery to
//! the remaining subscribers continues.

use std::sync::Arc;

use tracing::warn;

/// Callback invoked with one structured notification.
pub type Callback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure into a [`Callback`].
pub fn callback<T, F>(f: F) -> Callback<T>
where
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A callback that returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    /// Subscriber the callback belongs to.
    pub subscriber: String,
    /// Rendered error.
    pub error: String,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Number of callbacks that completed successfully.
    pub delivered: usize,
    /// Callbacks that failed.
    pub failures: Vec<CallbackFailure>,
}

impl FanoutReport {
    /// Returns `true` if no callback failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Invokes every callback with `event`, collecting failures.
///
/// # Arguments
/// * `component` - Component name used in log records
/// * `subscribers` - `(subscriber id, callback)` pairs
/// * `event` - Notification passed to each callback
pub fn fan_out<T>(
    component: &str,
    subscribers: &[(String, Callback<T>)],
    event: &T,
) -> FanoutReport {
    let mut report = FanoutReport::default();

    for (subscriber, callback) in subscribers {
        match callback(event) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(
                    component = %component,
                    worker_id = %subscriber,
                    error = %e,
                    "Subscriber callback failed"
                );
                report
                    .failures
                    .push(CallbackFailure { subscriber: subscriber.clone(), error: e.to_string() });
            }
        }
    }

    report
}
