//! The timer state machine.
//!
//! `TimerEngine` owns the `TimerState` and is only ever driven from one task
//! (the timer actor). Every mutation fires hooks with a copied snapshot, so
//! subscribers never observe a later state than the one they were fired for.
//!
//! # Set interception
//!
//! A mutation first fires `set`. If `set` has subscribers (satellite mode),
//! the natural hook (`change`, `pause`, `mode-start`) is suppressed; the
//! remote authority echoes the change back through [`TimerOp::Mirror`].
//! Otherwise the natural hook fires right away.
//!
//! # Deferred mode-start
//!
//! A mode that begins while paused has not really started. `reset()` then
//! records a pending mode-start which the next unpause delivers.

use std::sync::Arc;

use chrono::TimeDelta;
use tracing::debug;

use pomo_core::{EventKind, TimerConfig, TimerEvent, TimerMode, TimerSnapshot, TimerState};
use pomo_protocol::TimerUpdate;

use super::commands::TimerOp;
use crate::hooks::Hooks;

/// The state machine plus its hooks and configuration.
pub struct TimerEngine {
    config: Arc<TimerConfig>,
    hooks: Hooks,
    state: TimerState,
    mode_start_pending: bool,
}

impl TimerEngine {
    /// Creates an engine with a zero state. Call [`init`](Self::init) or
    /// restore a state before running it.
    pub fn new(config: Arc<TimerConfig>, hooks: Hooks) -> Self {
        Self::with_state(config, hooks, TimerState::default())
    }

    /// Creates an engine that resumes `state` verbatim, without firing anything.
    pub fn with_state(config: Arc<TimerConfig>, hooks: Hooks, state: TimerState) -> Self {
        Self {
            config,
            hooks,
            state,
            mode_start_pending: false,
        }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn config(&self) -> &Arc<TimerConfig> {
        &self.config
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Returns true when an unpause will announce the current mode.
    pub fn mode_start_pending(&self) -> bool {
        self.mode_start_pending
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot::new(self.state, &self.config)
    }

    /// Consumes the engine, keeping only its state (used across generations).
    pub fn into_state(self) -> TimerState {
        self.state
    }

    // ========================================================================
    // Hook firing
    // ========================================================================

    fn fire(&mut self, kind: EventKind) -> bool {
        let event = TimerEvent::new(kind, self.snapshot());
        self.hooks.get_mut(kind).run(event)
    }

    /// Fires `set`; returns true if the natural hook should be suppressed.
    fn intercepted(&mut self) -> bool {
        self.fire(EventKind::Set)
    }

    fn fire_gated(&mut self, kind: EventKind) {
        if !self.intercepted() {
            self.fire(kind);
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Starts a fresh cycle: Work, no completed sessions.
    pub fn init(&mut self) {
        self.state.mode = TimerMode::Work;
        self.state.completed_sessions = 0;
        self.state.paused = self.config.initially_paused;
        self.reset();
        self.fire(EventKind::Init);
    }

    /// Re-seeds the remaining time from the current mode's duration.
    pub fn reset(&mut self) {
        self.state.remaining = self.config.duration_of(self.state.mode);
        debug!(
            mode = %self.state.mode,
            remaining = %pomo_core::format_duration(self.state.remaining),
            "Timer reset"
        );

        if self.intercepted() {
            return;
        }
        self.fire(EventKind::Change);

        if self.state.paused {
            self.mode_start_pending = true;
        } else {
            self.mode_start_pending = false;
            self.fire(EventKind::ModeStart);
        }
    }

    /// Advances to the next mode. Leaving a long break restarts the cycle.
    pub fn switch_next(&mut self) {
        match self.state.mode {
            TimerMode::Work => {
                self.state.completed_sessions = self.state.completed_sessions.saturating_add(1);
                let cycle_done = self.state.completed_sessions >= self.config.sessions_per_cycle;
                self.state.mode = if cycle_done {
                    TimerMode::LongBreak
                } else {
                    TimerMode::ShortBreak
                };
            }
            TimerMode::ShortBreak => self.state.mode = TimerMode::Work,
            TimerMode::LongBreak => {
                self.init();
                return;
            }
        }
        self.reset();
    }

    /// Goes back one mode; the inverse of [`switch_next`](Self::switch_next).
    pub fn switch_prev(&mut self) {
        match self.state.mode {
            TimerMode::Work if self.state.completed_sessions == 0 => {
                self.state.completed_sessions = self.config.sessions_per_cycle;
                self.state.mode = TimerMode::LongBreak;
            }
            TimerMode::Work => self.state.mode = TimerMode::ShortBreak,
            TimerMode::ShortBreak | TimerMode::LongBreak => {
                self.state.completed_sessions = self.state.completed_sessions.saturating_sub(1);
                self.state.mode = TimerMode::Work;
            }
        }
        self.reset();
    }

    pub fn pause(&mut self, paused: bool) {
        self.state.paused = paused;
        if self.intercepted() {
            return;
        }
        self.fire(EventKind::Pause);

        if !paused && self.mode_start_pending {
            self.mode_start_pending = false;
            self.fire(EventKind::ModeStart);
        }
    }

    pub fn toggle_pause(&mut self) {
        self.pause(!self.state.paused);
    }

    /// Sets the remaining time. Negative values are accepted as-is.
    pub fn seek_to(&mut self, remaining: TimeDelta) {
        self.state.remaining = remaining;
        self.fire_gated(EventKind::Change);
    }

    /// Moves the remaining time by `delta`, never below zero.
    pub fn seek_add(&mut self, delta: TimeDelta) {
        let target = match self.state.remaining.checked_add(&delta) {
            Some(sum) => sum.max(TimeDelta::zero()),
            None if delta < TimeDelta::zero() => TimeDelta::zero(),
            None => TimeDelta::MAX,
        };
        self.seek_to(target);
    }

    pub fn set_completed_sessions(&mut self, completed_sessions: u32) {
        self.state.completed_sessions = completed_sessions;
        self.fire_gated(EventKind::Change);
    }

    /// Merges an HTTP update into the state and fires one gated `change`.
    ///
    /// A different `mode` re-seeds the remaining time and wins over
    /// `remaining_ms`.
    pub fn apply_update(&mut self, update: TimerUpdate) {
        let mode_changed = update.mode.is_some_and(|mode| mode != self.state.mode);

        if let Some(mode) = update.mode {
            self.state.mode = mode;
        }
        if let Some(completed_sessions) = update.completed_sessions {
            self.state.completed_sessions = completed_sessions;
        }
        if let Some(paused) = update.paused {
            self.state.paused = paused;
        }

        if mode_changed {
            self.state.remaining = self.config.duration_of(self.state.mode);
        } else if let Some(millis) = update.remaining_ms {
            self.state.remaining =
                TimeDelta::try_milliseconds(millis).unwrap_or(self.state.remaining);
        }

        self.fire_gated(EventKind::Change);
    }

    /// Adopts a state pushed by a remote authority and fires `kind` locally.
    ///
    /// Never fires `set`: the change already happened upstream.
    pub fn mirror(&mut self, kind: EventKind, state: TimerState) {
        self.state = state;
        self.mode_start_pending = false;
        self.fire(kind);
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Ends the current mode if its time ran out.
    ///
    /// `mode-end` carries the snapshot of the mode that ended.
    pub fn before_tick(&mut self) -> bool {
        if !self.state.is_expired() {
            return false;
        }
        self.fire(EventKind::ModeEnd);
        self.switch_next();
        true
    }

    /// Counts one tick down. A paused timer does not move and fires nothing.
    pub fn tick(&mut self) -> bool {
        if self.state.paused {
            return false;
        }
        self.state.remaining = self
            .state
            .remaining
            .checked_sub(&self.config.tick_delta())
            .unwrap_or(TimeDelta::MIN);
        self.fire(EventKind::Change);
        true
    }

    /// Drains every subscriber queue, then runs the `quit` hook to completion.
    pub async fn quit(&mut self) {
        self.hooks.flush().await;
        let event = TimerEvent::new(EventKind::Quit, self.snapshot());
        self.hooks.get_mut(EventKind::Quit).run_sync(event).await;
    }

    /// Applies one operation.
    pub fn apply(&mut self, op: TimerOp) {
        match op {
            TimerOp::Init => self.init(),
            TimerOp::Reset => self.reset(),
            TimerOp::Next => self.switch_next(),
            TimerOp::Prev => self.switch_prev(),
            TimerOp::Pause(Some(paused)) => self.pause(paused),
            TimerOp::Pause(None) => self.toggle_pause(),
            TimerOp::SeekTo(remaining) => self.seek_to(remaining),
            TimerOp::SeekAdd(delta) => self.seek_add(delta),
            TimerOp::Sessions(arg) => {
                let completed = arg.apply(self.state.completed_sessions);
                self.set_completed_sessions(completed);
            }
            TimerOp::Update(update) => self.apply_update(update),
            TimerOp::Mirror { kind, state } => self.mirror(kind, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{from_fn, HookHandler};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config(sessions: u32, work: u64, short: u64, long: u64) -> Arc<TimerConfig> {
        let mut config = TimerConfig {
            sessions_per_cycle: sessions,
            tick_interval: Duration::from_secs(1),
            ..Default::default()
        };
        config.durations.work = Duration::from_secs(work);
        config.durations.short_break = Duration::from_secs(short);
        config.durations.long_break = Duration::from_secs(long);
        Arc::new(config)
    }

    /// Engine with one recorder subscribed to every hook through a single queue.
    fn recorded(config: Arc<TimerConfig>) -> (TimerEngine, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hooks = Hooks::new();
        hooks.subscribe(
            &[
                EventKind::Init,
                EventKind::Change,
                EventKind::ModeStart,
                EventKind::ModeEnd,
                EventKind::Pause,
                EventKind::Quit,
            ],
            from_fn(move |ev| {
                let _ = tx.send(ev);
            }),
        );
        (TimerEngine::new(config, hooks), rx)
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<TimerEvent>) -> Vec<TimerEvent> {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn kinds(events: &[TimerEvent]) -> Vec<EventKind> {
        events.iter().map(TimerEvent::kind).collect()
    }

    fn position(engine: &TimerEngine) -> (TimerMode, u32) {
        (engine.state().mode, engine.state().completed_sessions)
    }

    #[tokio::test]
    async fn test_init_fires_change_mode_start_init() {
        let (mut engine, mut rx) = recorded(config(4, 1500, 300, 1800));
        engine.init();

        assert_eq!(engine.state().mode, TimerMode::Work);
        assert_eq!(engine.state().remaining, TimeDelta::seconds(1500));
        assert_eq!(
            kinds(&drain(&mut rx).await),
            vec![EventKind::Change, EventKind::ModeStart, EventKind::Init]
        );
    }

    #[tokio::test]
    async fn test_cycle_returns_to_work() {
        for n in 1..=5u32 {
            let (mut engine, _rx) = recorded(config(n, 10, 5, 20));
            engine.init();

            // 2N-1 switches land on the long break
            for _ in 0..(2 * n - 1) {
                engine.switch_next();
            }
            assert_eq!(position(&engine), (TimerMode::LongBreak, n));

            // and the 2N-th starts over
            engine.switch_next();
            assert_eq!(position(&engine), (TimerMode::Work, 0));

            // the next cycle repeats the pattern
            engine.switch_next();
            let expected = if n == 1 { TimerMode::LongBreak } else { TimerMode::ShortBreak };
            assert_eq!(position(&engine), (expected, 1));
        }
    }

    #[tokio::test]
    async fn test_next_then_prev_is_identity() {
        let n = 3;
        let (mut engine, _rx) = recorded(config(n, 10, 5, 20));
        engine.init();

        // Walk a full cycle twice, checking symmetry at every reachable state
        for _ in 0..(4 * n) {
            let before = position(&engine);
            engine.switch_next();
            engine.switch_prev();
            assert_eq!(position(&engine), before, "symmetry broken at {before:?}");
            engine.switch_next();
        }
    }

    #[tokio::test]
    async fn test_prev_wraps_from_fresh_work() {
        let (mut engine, _rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        engine.switch_prev();
        assert_eq!(position(&engine), (TimerMode::LongBreak, 4));
        assert_eq!(engine.state().remaining, TimeDelta::seconds(20));
    }

    #[tokio::test]
    async fn test_tick_is_monotonic() {
        let (mut engine, _rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        for k in 1..=10 {
            assert!(engine.tick());
            assert_eq!(engine.state().remaining, TimeDelta::seconds(10 - k));
        }
    }

    #[tokio::test]
    async fn test_pause_freezes_time() {
        let (mut engine, mut rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        engine.pause(true);
        drain(&mut rx).await;

        for _ in 0..5 {
            assert!(!engine.tick());
        }
        assert_eq!(engine.state().remaining, TimeDelta::seconds(10));
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_concrete_cycle_scenario() {
        let (mut engine, _rx) = recorded(config(2, 4, 2, 5));
        engine.init();
        engine.before_tick();

        fn run(engine: &mut TimerEngine, ticks: usize) {
            for _ in 0..ticks {
                engine.tick();
                engine.before_tick();
            }
        }

        run(&mut engine, 4);
        assert_eq!(position(&engine), (TimerMode::ShortBreak, 1));
        run(&mut engine, 2);
        assert_eq!(position(&engine), (TimerMode::Work, 1));
        run(&mut engine, 4);
        assert_eq!(position(&engine), (TimerMode::LongBreak, 2));
        run(&mut engine, 5);
        assert_eq!(position(&engine), (TimerMode::Work, 0));
        assert_eq!(engine.state().remaining, TimeDelta::seconds(4));
    }

    #[tokio::test]
    async fn test_seek_add_clamps_at_zero() {
        let (mut engine, _rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        engine.seek_add(TimeDelta::hours(-100));
        assert_eq!(engine.state().remaining, TimeDelta::zero());

        engine.seek_add(TimeDelta::seconds(3));
        assert_eq!(engine.state().remaining, TimeDelta::seconds(3));

        // Direct seek does not clamp
        engine.seek_to(TimeDelta::seconds(-2));
        assert_eq!(engine.state().remaining, TimeDelta::seconds(-2));
    }

    #[tokio::test]
    async fn test_mode_end_observes_ending_mode() {
        let (mut engine, mut rx) = recorded(config(4, 1, 5, 20));
        engine.init();
        drain(&mut rx).await;

        engine.tick();
        assert!(engine.before_tick());

        let events = drain(&mut rx).await;
        let mode_end = events
            .iter()
            .find(|ev| ev.kind() == EventKind::ModeEnd)
            .expect("mode-end fired");
        assert_eq!(mode_end.snapshot().state.mode, TimerMode::Work);
        assert_eq!(mode_end.snapshot().state.completed_sessions, 0);
        assert_eq!(position(&engine), (TimerMode::ShortBreak, 1));
        assert_eq!(
            kinds(&events),
            vec![EventKind::Change, EventKind::ModeEnd, EventKind::Change, EventKind::ModeStart]
        );
    }

    #[tokio::test]
    async fn test_mode_start_deferred_until_unpause() {
        let (mut engine, mut rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        engine.pause(true);
        drain(&mut rx).await;

        engine.switch_next();
        assert!(engine.mode_start_pending());
        assert_eq!(kinds(&drain(&mut rx).await), vec![EventKind::Change]);

        // pausing again does not deliver it
        engine.pause(true);
        assert_eq!(kinds(&drain(&mut rx).await), vec![EventKind::Pause]);

        engine.pause(false);
        let events = drain(&mut rx).await;
        assert_eq!(kinds(&events), vec![EventKind::Pause, EventKind::ModeStart]);
        assert_eq!(events[1].snapshot().state.mode, TimerMode::ShortBreak);
        assert!(!engine.mode_start_pending());

        // only once
        engine.pause(true);
        engine.pause(false);
        assert_eq!(
            kinds(&drain(&mut rx).await),
            vec![EventKind::Pause, EventKind::Pause]
        );
    }

    #[tokio::test]
    async fn test_set_subscriber_suppresses_natural_hooks() {
        let (mut engine, mut rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        drain(&mut rx).await;

        let (set_tx, mut set_rx) = mpsc::unbounded_channel();
        engine.hooks_mut().get_mut(EventKind::Set).append(from_fn(move |ev| {
            let _ = set_tx.send(ev);
        }));

        let ops = [
            TimerOp::Pause(Some(true)),
            TimerOp::SeekTo(TimeDelta::seconds(3)),
            TimerOp::SeekAdd(TimeDelta::seconds(1)),
            TimerOp::Reset,
            TimerOp::Next,
            TimerOp::Prev,
            TimerOp::Sessions(pomo_protocol::SessionsArg::Absolute(2)),
            TimerOp::Update(TimerUpdate {
                paused: Some(false),
                ..Default::default()
            }),
        ];
        let count = ops.len();
        for op in ops {
            engine.apply(op);
        }

        // natural hooks never fired, set fired once per operation
        assert!(drain(&mut rx).await.is_empty());
        let set_events = drain(&mut set_rx).await;
        assert_eq!(set_events.len(), count);
        assert!(set_events.iter().all(|ev| ev.kind() == EventKind::Set));
    }

    #[tokio::test]
    async fn test_without_set_subscriber_natural_hook_fires() {
        let (mut engine, mut rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        drain(&mut rx).await;

        engine.apply(TimerOp::Pause(None));
        assert_eq!(kinds(&drain(&mut rx).await), vec![EventKind::Pause]);
        engine.apply(TimerOp::SeekTo(TimeDelta::seconds(3)));
        assert_eq!(kinds(&drain(&mut rx).await), vec![EventKind::Change]);
        engine.apply(TimerOp::Sessions(pomo_protocol::SessionsArg::Add(2)));
        assert_eq!(kinds(&drain(&mut rx).await), vec![EventKind::Change]);
        assert_eq!(engine.state().completed_sessions, 2);
    }

    #[tokio::test]
    async fn test_update_with_new_mode_reseeds_remaining() {
        let (mut engine, mut rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        drain(&mut rx).await;

        engine.apply_update(TimerUpdate {
            mode: Some(TimerMode::LongBreak),
            remaining_ms: Some(1),
            ..Default::default()
        });
        assert_eq!(engine.state().mode, TimerMode::LongBreak);
        assert_eq!(engine.state().remaining, TimeDelta::seconds(20));

        engine.apply_update(TimerUpdate {
            mode: Some(TimerMode::LongBreak),
            remaining_ms: Some(1500),
            ..Default::default()
        });
        assert_eq!(engine.state().remaining, TimeDelta::milliseconds(1500));
        assert_eq!(
            kinds(&drain(&mut rx).await),
            vec![EventKind::Change, EventKind::Change]
        );
    }

    #[tokio::test]
    async fn test_mirror_adopts_state_without_set() {
        let (mut engine, mut rx) = recorded(config(4, 10, 5, 20));
        let (set_tx, mut set_rx) = mpsc::unbounded_channel();
        engine.hooks_mut().get_mut(EventKind::Set).append(from_fn(move |ev| {
            let _ = set_tx.send(ev);
        }));

        let remote = TimerState {
            mode: TimerMode::ShortBreak,
            remaining: TimeDelta::seconds(42),
            completed_sessions: 1,
            paused: true,
        };
        engine.mirror(EventKind::Pause, remote);

        assert_eq!(*engine.state(), remote);
        assert_eq!(kinds(&drain(&mut rx).await), vec![EventKind::Pause]);
        assert!(drain(&mut set_rx).await.is_empty());
    }

    struct Slow(mpsc::UnboundedSender<TimeDelta>);

    #[async_trait::async_trait]
    impl HookHandler for Slow {
        async fn handle(&self, event: TimerEvent) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = self.0.send(event.snapshot().state.remaining);
        }
    }

    #[tokio::test]
    async fn test_quit_waits_for_queued_events() {
        let mut engine = TimerEngine::new(config(4, 10, 5, 20), Hooks::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .hooks_mut()
            .subscribe(&[EventKind::Change], Arc::new(Slow(tx)));

        for secs in 1..=5 {
            engine.seek_to(TimeDelta::seconds(secs));
        }
        engine.quit().await;

        let mut seen = Vec::new();
        while let Ok(remaining) = rx.try_recv() {
            seen.push(remaining.num_seconds());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_quit_runs_synchronously() {
        let (mut engine, mut rx) = recorded(config(4, 10, 5, 20));
        engine.init();
        drain(&mut rx).await;

        engine.quit().await;
        // run_sync delivered through the handler directly, no yielding needed
        let event = rx.try_recv().expect("quit delivered before quit() returned");
        assert_eq!(event.kind(), EventKind::Quit);
    }
}
