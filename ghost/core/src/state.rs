//! Ghost State Store
//!
//! The single authoritative record of what the ghost currently looks like:
//! per-scope surfaces, balloon content and placement, window positions,
//! running animations, and the lifecycle flag. Every mutation funnels through
//! this type, and the type is owned exclusively by the dispatch loop, so no
//! handler ever observes a partial write.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A screen position in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal offset
    pub x: i32,
    /// Vertical offset
    pub y: i32,
}

impl Position {
    /// Convenience constructor.
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Balloon state for one scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalloonState {
    /// Whether the balloon is shown
    pub visible: bool,
    /// Balloon offset relative to its character window
    pub position: Position,
    /// Balloon surface (skin) id
    pub surface: i32,
    /// Accumulated display text for the current script
    pub text: String,
}

/// Lifecycle states.
///
/// `Booting → Idle ⇄ Responding ⇄ Choosing → Closing → Terminated`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Started, waiting for OnBoot
    Booting,
    /// Nothing in flight
    Idle,
    /// A script run is executing
    Responding,
    /// A choice prompt is pending
    Choosing,
    /// Close received, winding down
    Closing,
    /// Final state; nothing is accepted
    Terminated,
}

impl Lifecycle {
    /// Human-readable description, for logs.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::Idle => "idle",
            Self::Responding => "responding",
            Self::Choosing => "choosing",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        }
    }
}

/// Transition triggers for the lifecycle machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// OnBoot handled; only valid from `Booting`
    Boot,
    /// A sequencer run started
    BeginResponse,
    /// The active run finished or was aborted
    EndResponse,
    /// A choice prompt was presented
    BeginChoice,
    /// The pending choice resolved (select, cancel, or timeout)
    ResolveChoice,
    /// OnClose handled; valid from any non-terminated state, terminal
    Close,
    /// Final cleanup done
    Terminate,
}

/// State store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The lifecycle machine rejected a transition.
    #[error("invalid lifecycle transition: {event:?} while {from:?}")]
    InvalidTransition {
        /// State the machine was in
        from: Lifecycle,
        /// Rejected trigger
        event: LifecycleEvent,
    },
}

/// The mutable ghost record.
#[derive(Clone, Debug)]
pub struct GhostState {
    lifecycle: Lifecycle,
    surfaces: HashMap<usize, i32>,
    balloons: HashMap<usize, BalloonState>,
    windows: HashMap<usize, Position>,
    animations: Vec<u32>,
    /// Seconds since the last user interaction or spoken script
    pub idle_seconds: u64,
}

impl Default for GhostState {
    fn default() -> Self {
        Self::new()
    }
}

impl GhostState {
    /// Fresh store in `Booting`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Booting,
            surfaces: HashMap::new(),
            balloons: HashMap::new(),
            windows: HashMap::new(),
            animations: Vec::new(),
            idle_seconds: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Drive the lifecycle machine.
    pub fn transition(&mut self, event: LifecycleEvent) -> Result<Lifecycle, StateError> {
        use Lifecycle as L;
        use LifecycleEvent as E;

        let next = match (self.lifecycle, event) {
            (L::Booting, E::Boot) => L::Idle,
            (L::Idle, E::BeginResponse) => L::Responding,
            (L::Responding, E::EndResponse) => L::Idle,
            (L::Responding, E::BeginChoice) => L::Choosing,
            (L::Choosing, E::ResolveChoice) => L::Idle,
            (from, E::Close) if from != L::Terminated => L::Closing,
            (L::Closing, E::Terminate) => L::Terminated,
            (from, event) => return Err(StateError::InvalidTransition { from, event }),
        };

        tracing::debug!(
            from = self.lifecycle.description(),
            to = next.description(),
            "lifecycle transition"
        );
        self.lifecycle = next;
        Ok(next)
    }

    /// Current surface id for a scope (0 until a script sets one).
    #[must_use]
    pub fn surface(&self, scope: usize) -> i32 {
        self.surfaces.get(&scope).copied().unwrap_or(0)
    }

    /// Set the surface for a scope.
    pub fn set_surface(&mut self, scope: usize, surface: i32) {
        self.surfaces.insert(scope, surface);
    }

    /// Balloon state for a scope, default until first touched.
    #[must_use]
    pub fn balloon(&self, scope: usize) -> BalloonState {
        self.balloons.get(&scope).cloned().unwrap_or_default()
    }

    /// Mutable balloon state for a scope, created on first access.
    pub fn balloon_mut(&mut self, scope: usize) -> &mut BalloonState {
        self.balloons.entry(scope).or_default()
    }

    /// Move a scope's balloon.
    pub fn set_balloon_position(&mut self, scope: usize, position: Position) {
        self.balloon_mut(scope).position = position;
    }

    /// Clear every balloon's text and hide it. Runs at script start.
    pub fn reset_balloons(&mut self) {
        for balloon in self.balloons.values_mut() {
            balloon.text.clear();
            balloon.visible = false;
        }
    }

    /// Window position for a scope.
    #[must_use]
    pub fn window_position(&self, scope: usize) -> Position {
        self.windows.get(&scope).copied().unwrap_or_default()
    }

    /// Move a scope's character window.
    pub fn set_window_position(&mut self, scope: usize, position: Position) {
        self.windows.insert(scope, position);
    }

    /// Active animation ids, in start order.
    #[must_use]
    pub fn animations(&self) -> &[u32] {
        &self.animations
    }

    /// Mark an animation running. Duplicate starts are a no-op.
    pub fn start_animation(&mut self, id: u32) {
        if !self.animations.contains(&id) {
            self.animations.push(id);
        }
    }

    /// Mark an animation stopped. Returns whether it was running.
    pub fn stop_animation(&mut self, id: u32) -> bool {
        let before = self.animations.len();
        self.animations.retain(|&a| a != id);
        self.animations.len() != before
    }

    /// Stop everything; runs on Close.
    pub fn stop_all_animations(&mut self) {
        self.animations.clear();
    }
}
