//! pomo core - shared domain types for the pomodoro daemon
//!
//! This crate provides the timer domain shared between the daemon (pomod),
//! its wire protocols, and satellite clients:
//! - `TimerMode` / `TimerState` - the state machine's data
//! - `TimerConfig` - per-generation immutable configuration
//! - `TimerSnapshot` / `TimerEvent` - immutable copies handed to subscribers
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod duration;
pub mod error;
pub mod event;
pub mod mode;
pub mod snapshot;
pub mod state;

// Re-exports for convenience
pub use config::{ModeDurations, TimerConfig};
pub use duration::{format_duration, format_duration_exact, parse_duration};
pub use error::{DomainError, DomainResult};
pub use event::{EventKind, TimerEvent};
pub use mode::TimerMode;
pub use snapshot::{ConfigView, DurationsView, TimerSnapshot, TIMER_FIELDS};
pub use state::TimerState;
