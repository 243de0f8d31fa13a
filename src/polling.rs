//! Fixed-interval chain polling.
//!
//! Browsers have no push channel to an RPC node, so the few values that
//! must stay fresh on screen (the smart-account balance, chiefly) are
//! re-read on a timer. A [`Poller`] owns one background task and exposes
//! the latest successfully produced value.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use ethers::types::U256;

use crate::context::SessionContext;
use crate::contracts::ChainReader;
use crate::error::Result;

/// How often the smart-account balance is re-read.
pub const DEFAULT_BALANCE_INTERVAL: Duration = Duration::from_secs(5);

/// A background polling task and its most recent value.
///
/// The producer decides the task's fate each tick: `Ok(Some(v))` stores a
/// fresh value, `Ok(None)` means the polled subject no longer exists and
/// stops the task for good, `Err` keeps the previous value on screen.
pub struct Poller<T> {
    value: Arc<RwLock<Option<T>>>,
    handle: JoinHandle<()>,
}

impl<T: Clone + Send + Sync + 'static> Poller<T> {
    /// Spawn a poller that invokes `producer` every `period` until the
    /// context shuts down, the poller is stopped, or the producer reports
    /// the subject gone.
    pub fn spawn<F, Fut>(
        ctx: &SessionContext,
        period: Duration,
        mut producer: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        let value = Arc::new(RwLock::new(None));
        let store = value.clone();
        let mut shutdown = ctx.shutdown_signal();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => match producer().await {
                        Ok(Some(v)) => {
                            *store.write() = Some(v);
                        }
                        Ok(None) => {
                            tracing::debug!("Polled subject is gone, stopping");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("Poll failed, keeping previous value: {}", e);
                        }
                    },
                    _ = shutdown.recv() => {
                        tracing::trace!("Stopping poller on shutdown");
                        break;
                    }
                }
            }
        });
        Self { value, handle }
    }

    /// The most recent successfully produced value.
    pub fn latest(&self) -> Option<T> {
        self.value.read().clone()
    }

    /// Abort the background task. The last value remains readable.
    pub fn stop(&self) {
        self.handle.abort();
    }

    /// Whether the background task has finished, for any reason.
    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        // the task must not outlive its handle.
        self.handle.abort();
    }
}

/// Poll the selected smart account's native balance. Stops on its own if
/// the selection disappears (logout, chain switch).
pub fn spawn_safe_balance(
    ctx: Arc<SessionContext>,
    reader: Arc<dyn ChainReader>,
) -> Poller<U256> {
    let producer_ctx = ctx.clone();
    Poller::spawn(&ctx, DEFAULT_BALANCE_INTERVAL, move || {
        let ctx = producer_ctx.clone();
        let reader = reader.clone();
        async move {
            let Some(safe) = ctx.selected_safe() else {
                return Ok(None);
            };
            let balance = reader.native_balance(safe.address).await?;
            Ok(Some(balance))
        }
    })
}
