//! Generations and the supervisor that swaps them.
//!
//! A [`Generation`] is one timer actor plus its TCP and HTTP daemons under a
//! single `CancellationToken`. The [`Supervisor`] starts one, replaces it on
//! reload with the same `TimerState`, and on terminate runs the `quit` hook
//! to completion before returning.
//!
//! ```text
//!   signals ──▶ Supervisor ──start──▶ Generation ─┬─ TimerActor
//!                   │                             ├─ TcpDaemon
//!                   │◀──shutdown(TimerEngine)─────┼─ HttpDaemon
//!                   │                             └─ RemoteSubscription
//!                   └── reload: load + validate, shutdown old, start new
//! ```
//!
//! A reload never tears the running generation down before the new settings
//! have been validated. If the new generation then fails to start (a port
//! is taken, say), the previous settings are started again with the
//! preserved state. Should that fail too, the state still goes through the
//! `quit` subscribers before the supervisor gives up.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use pomo_core::{EventKind, TimerState};
use pomo_protocol::BROADCAST_EVENTS;

use crate::engine::{spawn_timer, TimerEngine, TimerHandle};
use crate::hooks::{HookHandler, Hooks};
use crate::http::{ClientRegistry, HttpDaemon, SseBroadcaster};
use crate::persistence::{StateStore, StateWriter};
use crate::remote::{RemoteClient, RemoteForwarder, RemoteSubscription};
use crate::server::{bind_listener, TcpDaemon};
use crate::settings::{AppSettings, SettingsLoader};
use crate::subscribers::{ExecHook, FifoWriter};

/// Process-level requests delivered to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Reload settings and restart the daemons (SIGHUP)
    Reload,
    /// Save, clean up and exit (SIGTERM, SIGINT, SIGQUIT)
    Terminate,
}

/// Whether this process owns the timer or follows another daemon.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Standalone,
    /// Mirror the daemon at `outbound_address`; do not tick locally
    Satellite { outbound_address: String },
}

impl RunMode {
    pub fn is_ticking(&self) -> bool {
        matches!(self, Self::Standalone)
    }
}

/// Addresses a generation actually listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationInfo {
    pub number: u64,
    pub tcp_addr: Option<SocketAddr>,
    pub http_addr: Option<SocketAddr>,
}

// ============================================================================
// Generation
// ============================================================================

/// One running set of timer actor and daemons.
pub struct Generation {
    cancel: CancellationToken,
    timer: TimerHandle,
    actor: JoinHandle<TimerEngine>,
    tracker: TaskTracker,
    tcp_addr: Option<SocketAddr>,
    http_addr: Option<SocketAddr>,
}

impl Generation {
    /// Starts a generation.
    ///
    /// `state` is resumed verbatim when given; otherwise the engine runs
    /// `init()` (satellite mode instead waits for the remote's snapshot).
    /// Listeners are bound before anything else, so a bind failure leaves
    /// nothing running.
    pub async fn start(
        settings: &AppSettings,
        state: Option<TimerState>,
        mode: &RunMode,
    ) -> Result<Self> {
        let tcp_listener = match settings.tcp_address() {
            Some(address) => Some(bind_listener(address).await?),
            None => {
                info!("TCP daemon disabled");
                None
            }
        };
        let http_listener = match settings.http_address() {
            Some(address) => Some(bind_listener(address).await?),
            None => {
                info!("HTTP daemon disabled");
                None
            }
        };
        let tcp_addr = tcp_listener.as_ref().and_then(local_addr);
        let http_addr = http_listener.as_ref().and_then(local_addr);

        let remote = match mode {
            RunMode::Standalone => None,
            RunMode::Satellite { outbound_address } => Some(
                RemoteClient::new(outbound_address)
                    .with_context(|| format!("Invalid outbound address {outbound_address}"))?,
            ),
        };

        let clients = ClientRegistry::new();
        let mut hooks = Hooks::new();
        if http_listener.is_some() {
            hooks.subscribe(&BROADCAST_EVENTS, Arc::new(SseBroadcaster::new(clients.clone())));
        }
        let fifo = install_subscribers(&mut hooks, settings);
        if let Some(client) = &remote {
            hooks
                .get_mut(EventKind::Set)
                .append(Arc::new(RemoteForwarder::new(client.clone())));
        }

        let config = Arc::new(settings.timer.clone());
        let engine = match state {
            Some(state) => {
                info!(
                    mode = %state.mode,
                    remaining = %pomo_core::format_duration(state.remaining),
                    completed_sessions = state.completed_sessions,
                    paused = state.paused,
                    "Resuming timer state"
                );
                let engine = TimerEngine::with_state(config, hooks, state);
                // init() will not fire, so readers get the resumed state now
                if let Some(fifo) = fifo {
                    let snapshot = engine.snapshot();
                    tokio::spawn(async move { fifo.write_snapshot(&snapshot).await });
                }
                engine
            }
            None if remote.is_some() => TimerEngine::new(config, hooks),
            None => {
                let mut engine = TimerEngine::new(config, hooks);
                engine.init();
                engine
            }
        };

        let cancel = CancellationToken::new();
        let (timer, actor) = spawn_timer(engine, cancel.clone(), mode.is_ticking());

        let tracker = TaskTracker::new();
        if let Some(listener) = tcp_listener {
            let daemon = TcpDaemon::from_listener(listener, timer.clone(), cancel.clone());
            tracker.spawn(async move {
                if let Err(e) = daemon.run().await {
                    error!(error = %e, "TCP daemon failed");
                }
            });
        }
        if let Some(listener) = http_listener {
            let daemon =
                HttpDaemon::from_listener(listener, timer.clone(), clients, cancel.clone());
            tracker.spawn(async move {
                if let Err(e) = daemon.run().await {
                    error!(error = %e, "HTTP daemon failed");
                }
            });
        }
        if let Some(client) = remote {
            tracker.spawn(RemoteSubscription::new(client, timer.clone(), cancel.clone()).run());
        }
        tracker.close();

        Ok(Self {
            cancel,
            timer,
            actor,
            tracker,
            tcp_addr,
            http_addr,
        })
    }

    pub fn timer(&self) -> &TimerHandle {
        &self.timer
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels every loop of this generation, waits for all of them and
    /// returns the engine.
    pub async fn shutdown(self) -> Result<TimerEngine> {
        self.cancel.cancel();
        self.tracker.wait().await;
        let engine = self.actor.await.context("Timer actor panicked")?;
        debug!("Generation stopped");
        Ok(engine)
    }
}

fn local_addr(listener: &TcpListener) -> Option<SocketAddr> {
    listener.local_addr().ok()
}

/// Statefile, FIFO and exec subscribers. Returns the FIFO writer if any.
fn install_subscribers(hooks: &mut Hooks, settings: &AppSettings) -> Option<FifoWriter> {
    if let Some(path) = &settings.statefile {
        let writer: Arc<dyn HookHandler> =
            Arc::new(StateWriter::new(Arc::new(StateStore::new(path))));
        hooks.get_mut(EventKind::Quit).append(Arc::clone(&writer));
        if settings.statefile_keep_updated {
            hooks.subscribe(&BROADCAST_EVENTS, writer);
        }
        debug!(
            path = %path.display(),
            keep_updated = settings.statefile_keep_updated,
            "Statefile enabled"
        );
    }

    let fifo = settings.fifo.as_ref().and_then(|path| match FifoWriter::create(path) {
        Ok(fifo) => Some(fifo),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "FIFO disabled");
            None
        }
    });
    if let Some(fifo) = &fifo {
        let handler: Arc<dyn HookHandler> = Arc::new(fifo.clone());
        hooks.subscribe(&BROADCAST_EVENTS, Arc::clone(&handler));
        hooks.get_mut(EventKind::Quit).append(handler);
    }

    for (kind, program) in [
        (EventKind::ModeStart, &settings.exec_start),
        (EventKind::ModeEnd, &settings.exec_end),
        (EventKind::Pause, &settings.exec_pause),
    ] {
        if let Some(program) = program {
            hooks.get_mut(kind).append(Arc::new(ExecHook::new(program.clone())));
        }
    }

    fifo
}

/// Loads the persisted state, ignoring a missing, corrupt or zero one.
pub fn recover_state(settings: &AppSettings) -> Option<TimerState> {
    let path = settings.statefile.as_ref()?;
    match StateStore::new(path).load() {
        Ok(Some(state)) if !state.is_zero() => Some(state),
        Ok(_) => {
            debug!(path = %path.display(), "No usable saved state");
            None
        }
        Err(e) => {
            warn!(error = %e, "Ignoring saved state");
            None
        }
    }
}

/// Runs the `quit` subscribers of `settings` for a state no generation
/// holds any more.
async fn quit_detached(settings: &AppSettings, state: TimerState) {
    let mut hooks = Hooks::new();
    install_subscribers(&mut hooks, settings);
    let mut engine = TimerEngine::with_state(Arc::new(settings.timer.clone()), hooks, state);
    engine.quit().await;
}

/// Which settings the replacement generation runs.
enum Swap {
    Reloaded(Generation),
    /// `next` failed to start; `previous` runs again
    Restored(Generation),
}

/// Replaces `generation` with one running `next`, falling back to
/// `previous`. If neither starts, the state is saved before the error is
/// returned.
async fn swap(
    generation: Generation,
    next: &AppSettings,
    previous: &AppSettings,
    mode: &RunMode,
) -> Result<Swap> {
    let state = generation.shutdown().await?.into_state();
    let err = match Generation::start(next, Some(state), mode).await {
        Ok(started) => return Ok(Swap::Reloaded(started)),
        Err(e) => e,
    };
    error!(error = %err, "New configuration failed to start, restoring previous one");

    match Generation::start(previous, Some(state), mode).await {
        Ok(restored) => Ok(Swap::Restored(restored)),
        Err(e) => {
            quit_detached(previous, state).await;
            Err(e.context("Failed to restart previous configuration"))
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Runs generations until told to terminate.
pub struct Supervisor {
    loader: SettingsLoader,
    mode: RunMode,
    started: Option<mpsc::UnboundedSender<GenerationInfo>>,
}

impl Supervisor {
    pub fn new(loader: SettingsLoader, mode: RunMode) -> Self {
        Self {
            loader,
            mode,
            started: None,
        }
    }

    /// Reports every generation that comes up.
    pub fn notify_started(mut self, tx: mpsc::UnboundedSender<GenerationInfo>) -> Self {
        self.started = Some(tx);
        self
    }

    /// Runs until [`LifecycleSignal::Terminate`] or until the signal
    /// channel closes.
    pub async fn run(self, mut signals: mpsc::Receiver<LifecycleSignal>) -> Result<()> {
        let mut settings = self.loader.load().context("Failed to load configuration")?;
        let mut number = 0;
        let mut generation = Generation::start(&settings, recover_state(&settings), &self.mode)
            .await
            .context("Failed to start daemons")?;
        self.announce(number, &generation);

        loop {
            match signals.recv().await {
                Some(LifecycleSignal::Reload) => {
                    info!("Reload requested");
                    let next = match self.loader.load() {
                        Ok(next) => next,
                        Err(e) => {
                            error!(error = %e, "Reload aborted, keeping current configuration");
                            continue;
                        }
                    };

                    number += 1;
                    generation = match swap(generation, &next, &settings, &self.mode).await? {
                        Swap::Reloaded(started) => {
                            settings = next;
                            info!(generation = number, "Reloaded");
                            started
                        }
                        Swap::Restored(restored) => restored,
                    };
                    self.announce(number, &generation);
                }
                Some(LifecycleSignal::Terminate) | None => {
                    info!("Shutting down");
                    let mut engine = generation.shutdown().await?;
                    engine.quit().await;
                    info!("Clean up finished");
                    return Ok(());
                }
            }
        }
    }

    fn announce(&self, number: u64, generation: &Generation) {
        let info = GenerationInfo {
            number,
            tcp_addr: generation.tcp_addr(),
            http_addr: generation.http_addr(),
        };
        info!(
            generation = number,
            tcp = ?info.tcp_addr,
            http = ?info.http_addr,
            "Daemons running"
        );
        if let Some(tx) = &self.started {
            let _ = tx.send(info);
        }
    }
}
