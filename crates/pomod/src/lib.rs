//! pomod - pomodoro timer daemon
//!
//! This crate provides the daemon infrastructure:
//! - `engine` - Timer state machine owned by a single actor task
//! - `hooks` - Event dispatcher feeding engine events to subscribers
//! - `control` / `server` - Line-oriented TCP control protocol
//! - `http` - JSON API and server-sent event stream
//! - `persistence`, `subscribers`, `remote` - Hook subscribers for the
//!   statefile, FIFO and exec hooks, and satellite mode
//! - `settings` / `lifecycle` - Configuration and daemon generations
//! - `watcher` - Reload when the config file changes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Generation (one CancellationToken)       │
//! │                                                              │
//! │  ┌─────────────┐   TimerCommand   ┌──────────────────────┐   │
//! │  │  TcpDaemon  │─────────────────▶│      TimerActor      │   │
//! │  └─────────────┘                  │ (TimerEngine owner)  │   │
//! │  ┌─────────────┐   TimerCommand   │                      │   │
//! │  │ HttpDaemon  │─────────────────▶│   ticks + commands   │   │
//! │  └──────▲──────┘                  └──────────┬───────────┘   │
//! │         │ SSE                                │ hooks         │
//! │  ┌──────┴──────┐                  ┌──────────▼───────────┐   │
//! │  │   Clients   │◀─SseBroadcaster──│        Hooks         │   │
//! │  └─────────────┘                  │ statefile fifo exec  │   │
//! │                                   └──────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate:
//! - Has no `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Returns `Result` or `Option` from fallible operations
//! - Handles channel closure gracefully

pub mod control;
pub mod engine;
pub mod hooks;
pub mod http;
pub mod lifecycle;
pub mod persistence;
pub mod remote;
pub mod server;
pub mod settings;
pub mod subscribers;
pub mod watcher;
