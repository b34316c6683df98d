//! Event dispatcher.
//!
//! Each engine hook owns a [`HookList`] of subscribers. Firing a hook never
//! waits for its subscribers: every persistent subscriber has its own FIFO
//! queue drained by a worker task, so the engine only pays for an enqueue.
//!
//! ```text
//!   TimerEngine ──run(event)──▶ HookList ──queue──▶ worker ──▶ handler.handle()
//!                                  │
//!                                  └── once handlers ──▶ spawned task
//! ```
//!
//! A subscription may span several hooks ([`Hooks::subscribe`]); it then
//! shares one queue, so the subscriber sees events in engine order across
//! all of those hooks.
//!
//! # Backpressure
//!
//! A queue holds at most [`SUBSCRIBER_QUEUE`] items. Once it is full, new
//! events go to an overflow backlog where consecutive events collapse into
//! the latest one. Events carry whole snapshots, so a lagging subscriber
//! skips intermediate states but still ends on the newest one, in order.
//!
//! # Checkpoints
//!
//! [`Hooks::checkpoint`] places a marker in subscriber queues at the current
//! point of the event order. [`Checkpoint::reached`] resolves once every
//! worker has handled everything queued before the marker, and keeps the
//! workers parked there until the returned guard is dropped.
//!
//! `run_sync` is the exception to fire-and-forget: it awaits every handler
//! in turn and is used for the `quit` hook during shutdown.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use pomo_core::{EventKind, TimerEvent};

/// Queue capacity of one subscriber before events start to coalesce
pub const SUBSCRIBER_QUEUE: usize = 256;

// ============================================================================
// Handler trait
// ============================================================================

/// A subscriber to engine events.
///
/// Handlers receive a copy of the event; failures must be handled (logged)
/// inside the handler, nothing propagates back into the engine.
#[async_trait]
pub trait HookHandler: Send + Sync + 'static {
    async fn handle(&self, event: TimerEvent);
}

/// Adapter turning a plain closure into a [`HookHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> HookHandler for FnHandler<F>
where
    F: Fn(TimerEvent) + Send + Sync + 'static,
{
    async fn handle(&self, event: TimerEvent) {
        (self.0)(event)
    }
}

/// Wraps a synchronous closure as a handler.
pub fn from_fn<F>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(TimerEvent) + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Releases a parked worker when dropped.
type Resume = oneshot::Sender<()>;

enum Queued {
    Event(TimerEvent),
    Marker(oneshot::Sender<Resume>),
}

/// Items that did not fit in the queue, oldest first.
#[derive(Default)]
struct Backlog {
    items: VecDeque<Queued>,
    coalesced: u64,
}

impl Backlog {
    fn push(&mut self, item: Queued) {
        if let (Queued::Event(event), Some(Queued::Event(last))) = (&item, self.items.back_mut()) {
            *last = *event;
            self.coalesced += 1;
            return;
        }
        self.items.push_back(item);
    }
}

/// A persistent subscriber: the handler plus the queue feeding its worker.
#[derive(Clone)]
pub struct Subscription {
    handler: Arc<dyn HookHandler>,
    queue: mpsc::Sender<Queued>,
    backlog: Arc<Mutex<Backlog>>,
}

impl Subscription {
    /// Spawns the worker task draining this subscription's queue.
    ///
    /// The worker exits once every clone of the subscription is dropped.
    /// Must be called from within a tokio runtime.
    pub fn spawn(handler: Arc<dyn HookHandler>) -> Self {
        let (queue, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let backlog = Arc::new(Mutex::new(Backlog::default()));
        tokio::spawn(Self::work(Arc::clone(&handler), rx, Arc::clone(&backlog)));
        Self {
            handler,
            queue,
            backlog,
        }
    }

    async fn work(
        handler: Arc<dyn HookHandler>,
        mut rx: mpsc::Receiver<Queued>,
        backlog: Arc<Mutex<Backlog>>,
    ) {
        loop {
            let item = match rx.try_recv() {
                Ok(item) => item,
                Err(TryRecvError::Empty) => {
                    let pending = Self::take_backlog(&backlog);
                    if !pending.is_empty() {
                        for item in pending {
                            Self::deliver(handler.as_ref(), item).await;
                        }
                        continue;
                    }
                    match rx.recv().await {
                        Some(item) => item,
                        None => break,
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    for item in Self::take_backlog(&backlog) {
                        Self::deliver(handler.as_ref(), item).await;
                    }
                    break;
                }
            };
            Self::deliver(handler.as_ref(), item).await;
        }
    }

    fn take_backlog(backlog: &Mutex<Backlog>) -> VecDeque<Queued> {
        let Ok(mut backlog) = backlog.lock() else {
            return VecDeque::new();
        };
        if backlog.coalesced > 0 {
            warn!(skipped = backlog.coalesced, "Hook subscriber fell behind, skipped stale events");
            backlog.coalesced = 0;
        }
        std::mem::take(&mut backlog.items)
    }

    async fn deliver(handler: &dyn HookHandler, item: Queued) {
        match item {
            Queued::Event(event) => handler.handle(event).await,
            Queued::Marker(reached) => {
                let (resume, parked) = oneshot::channel();
                if reached.send(resume).is_ok() {
                    // resolves when the guard holding `resume` is dropped
                    let _ = parked.await;
                }
            }
        }
    }

    /// Queues `item`, or appends it to the backlog while the queue is full
    /// or the backlog is non-empty. Returns false once the worker is gone.
    fn push(&self, item: Queued) -> bool {
        let Ok(mut backlog) = self.backlog.lock() else {
            return false;
        };
        if !backlog.items.is_empty() {
            backlog.push(item);
            return true;
        }
        match self.queue.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                backlog.push(item);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn enqueue(&self, event: TimerEvent) -> bool {
        self.push(Queued::Event(event))
    }

    fn same_queue(&self, other: &Self) -> bool {
        self.queue.same_channel(&other.queue)
    }
}

/// Markers placed by [`Hooks::checkpoint`], one per subscriber.
#[derive(Debug)]
pub struct Checkpoint {
    markers: Vec<oneshot::Receiver<Resume>>,
}

impl Checkpoint {
    /// Waits until every subscriber has handled all events fired before the
    /// checkpoint. The workers stay parked until the guard is dropped.
    ///
    /// A subscriber whose worker died is skipped.
    pub async fn reached(self) -> CheckpointGuard {
        let mut parked = Vec::with_capacity(self.markers.len());
        for marker in self.markers {
            if let Ok(resume) = marker.await {
                parked.push(resume);
            }
        }
        CheckpointGuard { _parked: parked }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Keeps the workers of a reached [`Checkpoint`] parked.
#[must_use = "workers resume as soon as the guard is dropped"]
pub struct CheckpointGuard {
    _parked: Vec<Resume>,
}

/// Subscribers of a single hook.
#[derive(Default)]
pub struct HookList {
    subscribers: Vec<Subscription>,
    once: Vec<Arc<dyn HookHandler>>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a persistent subscriber with its own worker.
    pub fn append(&mut self, handler: Arc<dyn HookHandler>) {
        self.subscribers.push(Subscription::spawn(handler));
    }

    /// Adds an existing subscription (possibly shared with other hooks).
    pub fn append_subscription(&mut self, subscription: Subscription) {
        self.subscribers.push(subscription);
    }

    /// Adds a subscriber that is dropped after its first invocation.
    pub fn append_once(&mut self, handler: Arc<dyn HookHandler>) {
        self.once.push(handler);
    }

    /// Returns true if at least one handler would run on the next fire.
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty() || !self.once.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len() + self.once.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_subscribers()
    }

    /// Schedules every handler and returns immediately.
    ///
    /// Returns whether at least one handler existed. Once-handlers are
    /// consumed. A subscriber whose worker has died is dropped.
    pub fn run(&mut self, event: TimerEvent) -> bool {
        let fired = self.has_subscribers();

        let before = self.subscribers.len();
        self.subscribers.retain(|sub| sub.enqueue(event));
        if self.subscribers.len() != before {
            debug!(
                event = event.name(),
                dropped = before - self.subscribers.len(),
                "Dropped subscribers with a dead worker"
            );
        }

        for handler in std::mem::take(&mut self.once) {
            tokio::spawn(async move {
                handler.handle(event).await;
            });
        }

        fired
    }

    /// Runs every handler to completion, in registration order, before returning.
    pub async fn run_sync(&mut self, event: TimerEvent) -> bool {
        let fired = self.has_subscribers();

        for sub in &self.subscribers {
            sub.handler.handle(event).await;
        }
        for handler in std::mem::take(&mut self.once) {
            handler.handle(event).await;
        }

        fired
    }
}

// ============================================================================
// Hook registry
// ============================================================================

/// One [`HookList`] per engine hook.
#[derive(Default)]
pub struct Hooks {
    init: HookList,
    change: HookList,
    mode_start: HookList,
    mode_end: HookList,
    pause: HookList,
    quit: HookList,
    set: HookList,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: EventKind) -> &HookList {
        match kind {
            EventKind::Init => &self.init,
            EventKind::Change => &self.change,
            EventKind::ModeStart => &self.mode_start,
            EventKind::ModeEnd => &self.mode_end,
            EventKind::Pause => &self.pause,
            EventKind::Quit => &self.quit,
            EventKind::Set => &self.set,
        }
    }

    pub fn get_mut(&mut self, kind: EventKind) -> &mut HookList {
        match kind {
            EventKind::Init => &mut self.init,
            EventKind::Change => &mut self.change,
            EventKind::ModeStart => &mut self.mode_start,
            EventKind::ModeEnd => &mut self.mode_end,
            EventKind::Pause => &mut self.pause,
            EventKind::Quit => &mut self.quit,
            EventKind::Set => &mut self.set,
        }
    }

    /// Subscribes one handler to several hooks through a single ordered queue.
    pub fn subscribe(&mut self, kinds: &[EventKind], handler: Arc<dyn HookHandler>) {
        let subscription = Subscription::spawn(handler);
        for kind in kinds {
            self.get_mut(*kind).append_subscription(subscription.clone());
        }
    }

    /// Places a marker in the queue of every subscriber of `kinds`, once per
    /// subscriber even when it spans several of those hooks.
    pub fn checkpoint(&self, kinds: &[EventKind]) -> Checkpoint {
        let mut seen: Vec<&Subscription> = Vec::new();
        for kind in kinds {
            for sub in &self.get(*kind).subscribers {
                if !seen.iter().any(|known| known.same_queue(sub)) {
                    seen.push(sub);
                }
            }
        }

        let markers = seen
            .into_iter()
            .filter_map(|sub| {
                let (reached, marker) = oneshot::channel();
                sub.push(Queued::Marker(reached)).then_some(marker)
            })
            .collect();
        Checkpoint { markers }
    }

    /// Waits until every subscriber has handled everything fired so far.
    pub async fn flush(&self) {
        let guard = self.checkpoint(&EventKind::ALL).reached().await;
        drop(guard);
        debug!("Hook queues drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pomo_core::{TimerConfig, TimerSnapshot, TimerState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    fn event(kind: EventKind, completed_sessions: u32) -> TimerEvent {
        let state = TimerState {
            completed_sessions,
            ..Default::default()
        };
        TimerEvent::new(kind, TimerSnapshot::new(state, &TimerConfig::default()))
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<TimerEvent>) -> TimerEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for handler")
            .expect("handler channel closed")
    }

    #[tokio::test]
    async fn test_run_reports_whether_anything_fired() {
        let mut list = HookList::new();
        assert!(!list.run(event(EventKind::Set, 0)));

        list.append(from_fn(|_| {}));
        assert!(list.run(event(EventKind::Set, 0)));
    }

    #[tokio::test]
    async fn test_persistent_subscriber_sees_fifo_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut list = HookList::new();
        list.append(from_fn(move |ev| {
            let _ = tx.send(ev);
        }));

        for i in 0..20 {
            list.run(event(EventKind::Change, i));
        }
        for i in 0..20 {
            assert_eq!(recv(&mut rx).await.snapshot().state.completed_sessions, i);
        }
    }

    #[tokio::test]
    async fn test_once_handler_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut list = HookList::new();
        let counter = Arc::clone(&count);
        list.append_once(from_fn(move |ev| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(ev);
        }));
        assert!(list.has_subscribers());

        assert!(list.run(event(EventKind::Pause, 1)));
        assert!(!list.run(event(EventKind::Pause, 2)));
        assert!(!list.has_subscribers());

        assert_eq!(recv(&mut rx).await.snapshot().state.completed_sessions, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_sync_completes_before_returning() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut list = HookList::new();
        for _ in 0..3 {
            let counter = Arc::clone(&count);
            list.append(from_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(list.run_sync(event(EventKind::Quit, 0)).await);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shared_subscription_keeps_cross_hook_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hooks = Hooks::new();
        hooks.subscribe(
            &[EventKind::Change, EventKind::ModeStart],
            from_fn(move |ev| {
                let _ = tx.send(ev);
            }),
        );

        hooks.get_mut(EventKind::Change).run(event(EventKind::Change, 0));
        hooks.get_mut(EventKind::ModeStart).run(event(EventKind::ModeStart, 1));
        hooks.get_mut(EventKind::Change).run(event(EventKind::Change, 2));

        assert_eq!(recv(&mut rx).await.kind(), EventKind::Change);
        assert_eq!(recv(&mut rx).await.kind(), EventKind::ModeStart);
        assert_eq!(recv(&mut rx).await.kind(), EventKind::Change);
        assert!(!hooks.get(EventKind::Set).has_subscribers());
    }

    /// Records completed-session numbers, waiting for a permit per event.
    struct Gated {
        gate: Arc<Semaphore>,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl HookHandler for Gated {
        async fn handle(&self, event: TimerEvent) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.seen.lock().unwrap().push(event.snapshot().state.completed_sessions);
        }
    }

    type Seen = Arc<Mutex<Vec<u32>>>;

    fn gated(permits: usize) -> (Arc<dyn HookHandler>, Arc<Semaphore>, Seen) {
        let gate = Arc::new(Semaphore::new(permits));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(Gated {
            gate: Arc::clone(&gate),
            seen: Arc::clone(&seen),
        });
        (handler, gate, seen)
    }

    async fn wait_for_len(seen: &Mutex<Vec<u32>>, len: usize) {
        timeout(Duration::from_secs(1), async {
            while seen.lock().unwrap().len() < len {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("handler never caught up");
    }

    #[tokio::test]
    async fn test_lagging_subscriber_coalesces_to_latest() {
        let (handler, gate, seen) = gated(0);
        let mut list = HookList::new();
        list.append(handler);

        let total = SUBSCRIBER_QUEUE as u32 + 100;
        for i in 1..=total {
            assert!(list.run(event(EventKind::Change, i)));
        }
        gate.add_permits(Semaphore::MAX_PERMITS / 2);

        timeout(Duration::from_secs(1), async {
            while seen.lock().unwrap().last() != Some(&total) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("latest event never delivered");

        let seen = seen.lock().unwrap().clone();
        assert!(seen.len() <= SUBSCRIBER_QUEUE + 2, "{} events delivered", seen.len());
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "out of order: {seen:?}");
    }

    #[tokio::test]
    async fn test_checkpoint_splits_the_event_order() {
        let (handler, gate, seen) = gated(Semaphore::MAX_PERMITS / 2);
        let mut hooks = Hooks::new();
        hooks.subscribe(&[EventKind::Change, EventKind::Pause], handler);
        drop(gate);

        hooks.get_mut(EventKind::Change).run(event(EventKind::Change, 1));
        hooks.get_mut(EventKind::Pause).run(event(EventKind::Pause, 2));
        let checkpoint = hooks.checkpoint(&[EventKind::Change, EventKind::Pause]);
        assert_eq!(checkpoint.len(), 1);
        hooks.get_mut(EventKind::Change).run(event(EventKind::Change, 3));

        let guard = timeout(Duration::from_secs(1), checkpoint.reached())
            .await
            .expect("checkpoint never reached");
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        // parked until the guard goes away
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.lock().unwrap().len(), 2);

        drop(guard);
        wait_for_len(&seen, 3).await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_events() {
        let (handler, gate, seen) = gated(0);
        let mut hooks = Hooks::new();
        hooks.subscribe(&[EventKind::Change], handler);

        for i in 0..10 {
            hooks.get_mut(EventKind::Change).run(event(EventKind::Change, i));
        }
        gate.add_permits(10);
        timeout(Duration::from_secs(1), hooks.flush())
            .await
            .expect("flush never returned");
        assert_eq!(seen.lock().unwrap().len(), 10);
    }
}
