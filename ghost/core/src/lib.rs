//! Ghost Core - Headless Desktop-Companion Runtime
//!
//! This crate is the brain of a desktop companion ("ghost"): it decodes
//! wire-protocol requests, routes events to handlers, executes the scripts
//! those handlers speak, and tells a presenter what to draw. It has no UI
//! dependencies at all; the daemon crate wires it to Unix sockets, and tests
//! drive it directly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Presenter(s)                          │
//! │        requests (up)              RenderCommand (down)       │
//! └─────────────┬────────────────────────────▲──────────────────┘
//!               │                            │
//! ┌─────────────▼────────────────────────────┴──────────────────┐
//! │                        GHOST CORE                            │
//! │  decode ─▶ ┌───────────────────────────────────────────────┐ │
//! │            │             dispatch loop (one task)          │ │
//! │            │  ┌────────┐ ┌───────┐ ┌─────────┐ ┌─────────┐ │ │
//! │            │  │ Router │ │ State │ │ Choices │ │Sequencer│ │ │
//! │            │  └────────┘ └───────┘ └─────────┘ └─────────┘ │ │
//! │            └───────────────▲───────────────▲───────────────┘ │
//! │                            │               │                 │
//! │                       TickScheduler   wait resumes           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every input, external requests, synthetic ticks, and wait resumes, goes
//! through one queue into one task. That task is the only owner of mutable
//! state, which is the whole concurrency story.
//!
//! # Key Types
//!
//! - [`Ghost`] / [`GhostHandle`]: the dispatch loop and its front door
//! - [`Request`] / [`Response`]: the wire protocol
//! - [`EventRouter`]: event id → handler table
//! - [`ScriptParser`] / [`SequencerRun`]: script execution
//! - [`RenderSink`]: where presentation commands go
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ghost_core::{Ghost, GhostConfig, NullSink, Request};
//!
//! #[tokio::main]
//! async fn main() {
//!     let ghost = Ghost::new(GhostConfig::default(), Arc::new(NullSink));
//!     let handle = ghost.handle();
//!     ghost.spawn();
//!
//!     let response = handle.request(Request::synthetic("OnBoot")).await.unwrap();
//!     println!("{}", response.value.unwrap_or_default());
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod choice;
pub mod config;
pub mod events;
pub mod ghost;
pub mod protocol;
pub mod render;
pub mod router;
pub mod script;
pub mod sequencer;
pub mod state;
pub mod ticker;

// Re-exports for convenience
pub use choice::{Choice, ChoiceAction, ChoiceError, ChoiceManager, ChoiceOption};
pub use config::{ConfigError, DialogueTable, GhostConfig};
pub use events::GhostEvent;
pub use ghost::{Ghost, GhostError, GhostHandle, InputMsg};
pub use protocol::{ParseError, Request, Response, Status};
pub use render::{NullSink, RecordingSink, RenderCommand, RenderError, RenderSink};
pub use router::{Dispatch, EventRouter, HandlerCtx};
pub use script::{ScriptCommand, ScriptParser, ScriptSyntaxError};
pub use sequencer::{RunId, SequencerRun, StepOutcome};
pub use state::{BalloonState, GhostState, Lifecycle, LifecycleEvent, Position, StateError};
pub use ticker::TickScheduler;
