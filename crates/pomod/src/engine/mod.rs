//! Timer engine using the Actor pattern.
//!
//! The engine is owned by a single actor task that interleaves commands and
//! ticks. Everything else talks to it through a [`TimerHandle`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                    ┌─────────────────┐
//! │  TCP / HTTP     │──TimerCommand────▶ │   TimerActor    │◀── tick interval
//! │  handlers       │◀──TimerSnapshot─── │  (TimerEngine)  │
//! └─────────────────┘  (oneshot reply)   └────────┬────────┘
//!                                                 │ hooks
//!                                                 ▼
//!                                     SSE clients, statefile, fifo, exec
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod actor;
mod commands;
mod handle;
mod machine;

pub use actor::TimerActor;
pub use commands::{TimerCommand, TimerError, TimerOp};
pub use handle::TimerHandle;
pub use machine::TimerEngine;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 64;

/// Spawns the timer actor for one generation.
///
/// The join handle yields the engine back once `cancel` fires, so its state
/// can seed the next generation.
pub fn spawn_timer(
    engine: TimerEngine,
    cancel: CancellationToken,
    ticking: bool,
) -> (TimerHandle, JoinHandle<TimerEngine>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = TimerActor::new(engine, cmd_rx, cancel, ticking);
    let task = tokio::spawn(actor.run());
    (TimerHandle::new(cmd_tx), task)
}
