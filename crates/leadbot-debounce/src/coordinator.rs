use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use leadbot_core::config::{BufferBackend, DebounceConfig};
use leadbot_store::KeyValueCache;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{CacheListBuffer, FragmentBuffer, MemoryBuffer};
use crate::error::{DebounceError, Result};
use crate::timer::{Timer, TokioTimer};

/// What a caller of [`DebounceCoordinator::accept_fragment`] gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceOutcome {
    /// The window closed; this caller owns the consolidated turn.
    Consolidated(String),
    /// A newer fragment for the same key took over the result. The caller
    /// has nothing further to do.
    Superseded,
    /// The fragment (or the whole batch) was blank.
    Empty,
}

impl DebounceOutcome {
    pub fn into_text(self) -> Option<String> {
        match self {
            DebounceOutcome::Consolidated(text) => Some(text),
            _ => None,
        }
    }
}

type Waiter = oneshot::Sender<Result<DebounceOutcome>>;

struct Pending {
    cancel: CancellationToken,
    waiter: Waiter,
}

/// Per-key bookkeeping. `generation` increases with every accepted
/// fragment; a timer only finalizes the generation it was started for.
#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<Pending>,
    /// Set once the window closed and the slot left the map. An accept that
    /// still holds the old `Arc` must start over with a fresh slot.
    retired: bool,
}

struct Inner {
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    buffer: Arc<dyn FragmentBuffer>,
    timer: Arc<dyn Timer>,
    separator: String,
}

/// Coalesces bursts of fragments per conversation key into one turn.
///
/// Cheap to clone; clones share the same bookkeeping.
#[derive(Clone)]
pub struct DebounceCoordinator {
    inner: Arc<Inner>,
}

impl DebounceCoordinator {
    pub fn new(
        buffer: Arc<dyn FragmentBuffer>,
        timer: Arc<dyn Timer>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                buffer,
                timer,
                separator: separator.into(),
            }),
        }
    }

    /// Build from config, using the shared cache as buffer when configured.
    pub fn from_config(cfg: &DebounceConfig, cache: Arc<dyn KeyValueCache>) -> Self {
        let buffer: Arc<dyn FragmentBuffer> = match cfg.buffer {
            BufferBackend::Memory => Arc::new(MemoryBuffer::new()),
            BufferBackend::Cache => Arc::new(CacheListBuffer::new(cache)),
        };
        info!(backend = ?cfg.buffer, separator = %cfg.separator, "debounce coordinator ready");
        Self::new(buffer, Arc::new(TokioTimer), cfg.separator.clone())
    }

    /// Number of keys with an open window.
    pub fn pending(&self) -> usize {
        self.inner.slots.len()
    }

    /// Add `fragment` to the window for `key` and wait for the window to
    /// close.
    ///
    /// Each call restarts the window. Only the call holding the most recent
    /// fragment receives [`DebounceOutcome::Consolidated`] with every
    /// fragment of the window joined in arrival order; earlier calls resolve
    /// as [`DebounceOutcome::Superseded`] as soon as they are displaced.
    /// If that last caller is gone when the window closes, the fragments
    /// stay buffered and are delivered with the next window for `key`.
    pub async fn accept_fragment(
        &self,
        key: &str,
        fragment: &str,
        window: Duration,
    ) -> Result<DebounceOutcome> {
        if fragment.trim().is_empty() {
            debug!(key, "blank fragment ignored");
            return Ok(DebounceOutcome::Empty);
        }

        let rx = loop {
            let slot = self.inner.slots.entry(key.to_string()).or_default().clone();
            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }

            if let Err(e) = self.inner.buffer.append(key, fragment).await {
                warn!(key, error = %e, "failed to buffer fragment, dropping it");
            }

            guard.generation += 1;
            let generation = guard.generation;

            if let Some(prev) = guard.pending.take() {
                prev.cancel.cancel();
                let _ = prev.waiter.send(Ok(DebounceOutcome::Superseded));
                debug!(key, generation, "debounce window restarted");
            }

            let (tx, rx) = oneshot::channel();
            let cancel = CancellationToken::new();
            guard.pending = Some(Pending {
                cancel: cancel.clone(),
                waiter: tx,
            });
            drop(guard);

            self.spawn_timer(key.to_string(), slot, generation, cancel, window);
            break rx;
        };

        rx.await.map_err(|_| DebounceError::Abandoned {
            key: key.to_string(),
        })?
    }

    fn spawn_timer(
        &self,
        key: String,
        slot: Arc<Mutex<Slot>>,
        generation: u64,
        cancel: CancellationToken,
        window: Duration,
    ) {
        let inner = self.inner.clone();
        let sleep = inner.timer.sleep(window);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %key, generation, "debounce timer cancelled");
                }
                _ = sleep => {
                    inner.finalize(&key, &slot, generation).await;
                }
            }
        });
    }
}

impl Inner {
    async fn finalize(&self, key: &str, slot: &Arc<Mutex<Slot>>, generation: u64) {
        let mut guard = slot.lock().await;
        if guard.retired || guard.generation != generation {
            // A fragment arrived between expiry and acquiring the slot.
            debug!(key, generation, "stale debounce timer");
            return;
        }
        let Some(pending) = guard.pending.take() else {
            // Leave the buffer in place so the next window delivers it.
            error!(key, generation, "debounce invariant violated: window closed with no waiter");
            return;
        };

        if pending.waiter.is_closed() {
            // Nobody to hand the batch to. The fragments stay buffered and
            // join the next window for this key.
            warn!(key, generation, "caller went away before the window closed, fragments kept");
            guard.retired = true;
            self.slots.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
            return;
        }

        let outcome = match self.buffer.drain(key).await {
            Ok(fragments) => {
                let count = fragments.len();
                let text = fragments.join(&self.separator).trim().to_string();
                info!(key, count, "debounce window closed");
                Ok(if text.is_empty() {
                    DebounceOutcome::Empty
                } else {
                    DebounceOutcome::Consolidated(text)
                })
            }
            Err(e) => {
                error!(key, error = %e, "failed to drain fragment buffer");
                Err(DebounceError::from(e))
            }
        };

        guard.retired = true;
        self.slots.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
        drop(guard);

        if let Err(Ok(DebounceOutcome::Consolidated(text))) = pending.waiter.send(outcome) {
            warn!(key, "caller went away while the window closed, batch re-buffered");
            if let Err(e) = self.buffer.append(key, &text).await {
                error!(key, error = %e, "failed to re-buffer undelivered batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::BoxFuture;
    use tokio::sync::{watch, OwnedMutexGuard};
    use tokio::task::JoinHandle;

    use super::*;

    const W: Duration = Duration::from_secs(10);

    fn coordinator() -> DebounceCoordinator {
        DebounceCoordinator::new(Arc::new(MemoryBuffer::new()), Arc::new(TokioTimer), ", ")
    }

    fn accept(
        c: &DebounceCoordinator,
        key: &'static str,
        fragment: &'static str,
    ) -> JoinHandle<Result<DebounceOutcome>> {
        let c = c.clone();
        tokio::spawn(async move { c.accept_fragment(key, fragment, W).await })
    }

    /// Let spawned tasks run up to their next suspension point.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_fragment_resolves_after_window() {
        let c = coordinator();
        let h = accept(&c, "k", "oi");
        settle().await;
        assert_eq!(c.pending(), 1);
        tokio::time::advance(W).await;
        assert_eq!(
            h.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("oi".into())
        );
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_yields_one_result_in_order() {
        let c = coordinator();
        let first = accept(&c, "k", "oi");
        settle().await;
        tokio::time::advance(Duration::from_secs(4)).await;
        let second = accept(&c, "k", "tudo bem?");
        settle().await;
        tokio::time::advance(Duration::from_secs(9)).await;
        let third = accept(&c, "k", "quero um orçamento");
        settle().await;

        assert_eq!(first.await.unwrap().unwrap(), DebounceOutcome::Superseded);
        assert_eq!(second.await.unwrap().unwrap(), DebounceOutcome::Superseded);

        tokio::time::advance(W).await;
        assert_eq!(
            third.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("oi, tudo bem?, quero um orçamento".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fragment_after_window_starts_new_session() {
        let c = coordinator();
        let first = accept(&c, "k", "primeira");
        settle().await;
        tokio::time::advance(W + Duration::from_secs(1)).await;
        assert_eq!(
            first.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("primeira".into())
        );

        let second = accept(&c, "k", "segunda");
        settle().await;
        tokio::time::advance(W).await;
        assert_eq!(
            second.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("segunda".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let c = coordinator();
        let a = accept(&c, "a", "from a");
        let b = accept(&c, "b", "from b");
        settle().await;
        assert_eq!(c.pending(), 2);
        tokio::time::advance(W).await;
        assert_eq!(
            a.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("from a".into())
        );
        assert_eq!(
            b.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("from b".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blank_fragment_is_ignored() {
        let c = coordinator();
        let out = c.accept_fragment("k", "   ", W).await.unwrap();
        assert_eq!(out, DebounceOutcome::Empty);
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn consolidated_text_is_trimmed() {
        let c = coordinator();
        let h = accept(&c, "k", "  oi  ");
        settle().await;
        tokio::time::advance(W).await;
        assert_eq!(
            h.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("oi".into())
        );
    }

    /// Rejects any fragment equal to "lost".
    struct LossyBuffer(MemoryBuffer);

    #[async_trait::async_trait]
    impl FragmentBuffer for LossyBuffer {
        async fn append(&self, key: &str, fragment: &str) -> leadbot_store::Result<()> {
            if fragment == "lost" {
                return Err(leadbot_store::StoreError::Cache("write refused".into()));
            }
            self.0.append(key, fragment).await
        }

        async fn drain(&self, key: &str) -> leadbot_store::Result<Vec<String>> {
            self.0.drain(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_write_failure_drops_only_that_fragment() {
        let c = DebounceCoordinator::new(
            Arc::new(LossyBuffer(MemoryBuffer::new())),
            Arc::new(TokioTimer),
            ", ",
        );
        let _a = accept(&c, "k", "um");
        settle().await;
        let _b = accept(&c, "k", "lost");
        settle().await;
        let last = accept(&c, "k", "três");
        settle().await;
        tokio::time::advance(W).await;
        assert_eq!(
            last.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("um, três".into())
        );
    }

    /// Timer whose sleeps finish only once the gate is opened.
    struct GateTimer(watch::Sender<bool>);

    impl Timer for GateTimer {
        fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
            let mut rx = self.0.subscribe();
            Box::pin(async move {
                let _ = rx.wait_for(|open| *open).await;
            })
        }
    }

    #[tokio::test]
    async fn injected_timer_controls_expiry() {
        let (gate, _) = watch::channel(false);
        let timer = Arc::new(GateTimer(gate));
        let c = DebounceCoordinator::new(Arc::new(MemoryBuffer::new()), timer.clone(), " | ");

        let first = accept(&c, "k", "a");
        settle().await;
        let second = accept(&c, "k", "b");
        settle().await;
        assert_eq!(first.await.unwrap().unwrap(), DebounceOutcome::Superseded);
        assert!(!second.is_finished());

        timer.0.send_replace(true);
        assert_eq!(
            second.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("a | b".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_window_carries_fragments_into_next_one() {
        let c = coordinator();
        let first = accept(&c, "k", "meu nome é ana");
        settle().await;
        let second = accept(&c, "k", "tenho 30 anos");
        settle().await;
        assert_eq!(first.await.unwrap().unwrap(), DebounceOutcome::Superseded);

        second.abort();
        settle().await;
        tokio::time::advance(W + Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(c.pending(), 0);

        let third = accept(&c, "k", "oi?");
        settle().await;
        tokio::time::advance(W).await;
        assert_eq!(
            third.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("meu nome é ana, tenho 30 anos, oi?".into())
        );
    }

    /// Hold the slot lock for `key`, as an in-flight accept or finalize would.
    async fn hold_slot(c: &DebounceCoordinator, key: &str) -> OwnedMutexGuard<Slot> {
        let slot = c.inner.slots.get(key).map(|s| s.clone()).unwrap();
        slot.lock_owned().await
    }

    #[tokio::test]
    async fn fragment_at_expiry_joins_the_closing_batch() {
        let (gate, _) = watch::channel(false);
        let timer = Arc::new(GateTimer(gate));
        let c = DebounceCoordinator::new(Arc::new(MemoryBuffer::new()), timer.clone(), ", ");

        let first = accept(&c, "k", "a");
        settle().await;

        // the new fragment queues on the slot before the expired timer does
        let held = hold_slot(&c, "k").await;
        let second = accept(&c, "k", "b");
        settle().await;
        timer.0.send_replace(true);
        settle().await;
        drop(held);

        assert_eq!(first.await.unwrap().unwrap(), DebounceOutcome::Superseded);
        assert_eq!(
            second.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("a, b".into())
        );
        settle().await;
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn fragment_after_finalize_starts_fresh_session() {
        let (gate, _) = watch::channel(false);
        let timer = Arc::new(GateTimer(gate));
        let c = DebounceCoordinator::new(Arc::new(MemoryBuffer::new()), timer.clone(), ", ");

        let first = accept(&c, "k", "a");
        settle().await;

        // the expired timer queues on the slot before the new fragment does
        let held = hold_slot(&c, "k").await;
        timer.0.send_replace(true);
        settle().await;
        let second = accept(&c, "k", "b");
        settle().await;
        drop(held);

        assert_eq!(
            first.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("a".into())
        );
        assert_eq!(
            second.await.unwrap().unwrap(),
            DebounceOutcome::Consolidated("b".into())
        );
        settle().await;
        assert_eq!(c.pending(), 0);
    }
}
