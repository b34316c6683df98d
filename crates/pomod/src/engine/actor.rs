//! Timer actor - the single task that owns and mutates the engine.
//!
//! Commands from the TCP and HTTP daemons and timer ticks are serialized
//! through one `select!` loop, so the engine never needs a lock.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the caller went away)

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::commands::TimerCommand;
use super::machine::TimerEngine;

/// The timer actor.
pub struct TimerActor {
    engine: TimerEngine,
    receiver: mpsc::Receiver<TimerCommand>,
    cancel: CancellationToken,
    /// False in satellite mode: the remote authority owns time
    ticking: bool,
}

impl TimerActor {
    pub fn new(
        engine: TimerEngine,
        receiver: mpsc::Receiver<TimerCommand>,
        cancel: CancellationToken,
        ticking: bool,
    ) -> Self {
        Self {
            engine,
            receiver,
            cancel,
            ticking,
        }
    }

    /// Runs until cancelled or every handle is dropped, then hands the
    /// engine back so the next generation can reuse its state.
    pub async fn run(mut self) -> TimerEngine {
        let period = self.engine.config().tick_interval;
        info!(
            tick = %pomo_core::format_duration_exact(period),
            ticking = self.ticking,
            "Timer actor starting"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.ticking {
            self.engine.before_tick();
        }

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Timer actor cancelled");
                    break;
                }

                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("All timer handles dropped");
                        break;
                    }
                },

                _ = ticker.tick(), if self.ticking => {
                    self.engine.tick();
                    self.engine.before_tick();
                }
            }
        }

        info!(
            mode = %self.engine.state().mode,
            remaining = %pomo_core::format_duration(self.engine.state().remaining),
            "Timer actor stopped"
        );
        self.engine
    }

    fn handle_command(&mut self, cmd: TimerCommand) {
        match cmd {
            TimerCommand::Apply { op, respond_to } => {
                debug!(?op, "Applying timer operation");
                self.engine.apply(op);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(self.engine.snapshot());
            }
            TimerCommand::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.engine.snapshot());
            }
            TimerCommand::Checkpoint { kinds, respond_to } => {
                let checkpoint = self.engine.hooks().checkpoint(&kinds);
                let _ = respond_to.send((self.engine.snapshot(), checkpoint));
            }
        }
    }
}
