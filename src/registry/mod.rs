//! Observer registry keyed by message kind.
//!
//! Observers are kept per kind in registration order. Dispatch snapshots the
//! matching lists and re-checks each entry's `active` flag right before each
//! call. Once `unsubscribe` (or `clear`) has returned, no dispatch that starts
//! afterwards invokes the observer, and neither does the rest of a dispatch
//! on the same thread. A call already running on another thread is not
//! waited for, so an observer may still be mid-call when removal returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;

use crate::metrics::ObserverMetrics;
use crate::websocket::InboundMessage;

/// Reserved kind receiving every application message
pub const WILDCARD_KIND: &str = "all";

/// Callback invoked with each matching message
pub type Observer = dyn Fn(&InboundMessage) + Send + Sync;

struct ObserverEntry {
    observer: Arc<Observer>,
    active: AtomicBool,
}

impl ObserverEntry {
    fn is(&self, observer: &Arc<Observer>) -> bool {
        same_observer(&self.observer, observer)
    }
}

fn same_observer(a: &Arc<Observer>, b: &Arc<Observer>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Outcome of delivering one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Observers that returned normally
    pub delivered: usize,
    /// Observers that panicked
    pub failed: usize,
}

pub struct SubscriptionRegistry {
    /// kind -> observers in registration order
    observers: DashMap<String, Vec<Arc<ObserverEntry>>>,
    /// Bumped by `clear`; handles from an older generation are inert
    generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            observers: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Register `observer` under `kind`, returning a handle that removes it
    pub fn subscribe(self: &Arc<Self>, kind: &str, observer: Arc<Observer>) -> Subscription {
        let entry = Arc::new(ObserverEntry {
            observer: observer.clone(),
            active: AtomicBool::new(true),
        });

        // The generation is read under the shard lock: a concurrent clear
        // either finished with this shard before the insert (and the handle
        // sees its generation) or removes the entry after it.
        let generation = {
            let mut entries = self.observers.entry(kind.to_string()).or_default();
            let generation = self.generation.load(Ordering::Acquire);
            entries.push(entry);
            generation
        };
        ObserverMetrics::record_registered();

        tracing::debug!(kind = %kind, "Observer registered");

        Subscription {
            registry: Arc::downgrade(self),
            kind: kind.to_string(),
            observer,
            generation,
            removed: AtomicBool::new(false),
        }
    }

    /// Remove every registration of `observer` under `kind`
    fn remove(&self, kind: &str, observer: &Arc<Observer>, generation: u64) -> usize {
        if self.generation.load(Ordering::Acquire) != generation {
            return 0;
        }

        let mut removed = 0;
        if let Some(mut entries) = self.observers.get_mut(kind) {
            entries.retain(|entry| {
                if entry.is(observer) {
                    entry.active.store(false, Ordering::Release);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.observers.remove_if(kind, |_, entries| entries.is_empty());

        if removed > 0 {
            ObserverMetrics::record_removed(removed);
            tracing::debug!(kind = %kind, removed = removed, "Observer removed");
        }
        removed
    }

    /// Drop every registration and invalidate all outstanding handles
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut removed = 0;
        self.observers.retain(|_, entries| {
            for entry in entries.iter() {
                entry.active.store(false, Ordering::Release);
            }
            removed += entries.len();
            false
        });

        if removed > 0 {
            ObserverMetrics::record_removed(removed);
        }
        tracing::debug!(removed = removed, "Subscription registry cleared");
    }

    /// Deliver `message` to its kind's observers, then to wildcard observers.
    ///
    /// Lifecycle events only reach observers of their exact kind. Each
    /// invocation is isolated: a panicking observer is logged and counted and
    /// the remaining observers still run.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let mut targets = self.snapshot(message.kind());
        if !message.is_lifecycle() && message.kind() != WILDCARD_KIND {
            targets.extend(self.snapshot(WILDCARD_KIND));
        }

        let mut report = DispatchReport::default();
        for entry in targets {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            let observer = &entry.observer;
            match catch_unwind(AssertUnwindSafe(|| observer(message))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    ObserverMetrics::record_failure();
                    tracing::error!(
                        kind = %message.kind(),
                        panic = %panic_message(&*panic),
                        "Observer panicked during dispatch"
                    );
                }
            }
        }

        tracing::debug!(
            kind = %message.kind(),
            delivered = report.delivered,
            failed = report.failed,
            "Message dispatched"
        );

        report
    }

    fn snapshot(&self, kind: &str) -> Vec<Arc<ObserverEntry>> {
        self.observers
            .get(kind)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Number of observers registered under `kind`
    pub fn observer_count(&self, kind: &str) -> usize {
        self.observers.get(kind).map(|entries| entries.len()).unwrap_or(0)
    }

    /// Number of observers across all kinds
    pub fn total_observers(&self) -> usize {
        self.observers.iter().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_observers() == 0
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Removal capability returned by `subscribe`.
///
/// Dropping the handle keeps the observer registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it. Removal is idempotent and
/// becomes a no-op once the registry has been cleared by `disconnect`.
pub struct Subscription {
    registry: Weak<SubscriptionRegistry>,
    kind: String,
    observer: Arc<Observer>,
    generation: u64,
    removed: AtomicBool,
}

impl Subscription {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Remove this observer (every registration of the same observer under
    /// the same kind)
    pub fn unsubscribe(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.kind, &self.observer, self.generation);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .field("removed", &self.removed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Messages of one kind as a stream; the subscription is removed on drop
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    subscription: Subscription,
}

impl MessageStream {
    pub(crate) fn subscribe(registry: &Arc<SubscriptionRegistry>, kind: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer: Arc<Observer> = Arc::new(move |message: &InboundMessage| {
            // receiver gone: the subscription is removed when the stream drops
            let _ = tx.send(message.clone());
        });
        let subscription = registry.subscribe(kind, observer);
        Self { rx, subscription }
    }

    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// A message already delivered, without waiting
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }

    pub fn kind(&self) -> &str {
        self.subscription.kind()
    }
}

impl Stream for MessageStream {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
