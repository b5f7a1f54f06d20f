//! Render sink boundary
//!
//! The core never draws. Everything visual or audible crosses this boundary
//! as a [`RenderCommand`], delivered through a [`RenderSink`]. The daemon
//! plugs in a socket-backed sink; tests plug in [`RecordingSink`] and assert
//! on the command stream.

use async_trait::async_trait;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::Position;

/// One presentation-side instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderCommand {
    /// Show surface `surface` for character `scope`
    Surface {
        /// Character index
        scope: usize,
        /// Surface id
        surface: i32,
    },
    /// Replace the balloon text for `scope`
    BalloonText {
        /// Character index
        scope: usize,
        /// Full accumulated text, not a delta
        text: String,
    },
    /// Move the balloon for `scope` relative to its window
    BalloonMove {
        /// Character index
        scope: usize,
        /// New offset
        position: Position,
    },
    /// Hide the balloon for `scope`
    BalloonHide {
        /// Character index
        scope: usize,
    },
    /// Move the character window for `scope`
    WindowMove {
        /// Character index
        scope: usize,
        /// New position
        position: Position,
    },
    /// Start animation `id`
    AnimationStart {
        /// Animation id
        id: u32,
    },
    /// Stop animation `id`
    AnimationStop {
        /// Animation id
        id: u32,
    },
    /// Play a sound file by name
    Sound {
        /// File name, resolved by the presenter
        file: String,
    },
}

/// Sink delivery failure.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No presenter is connected, or it went away mid-send.
    #[error("render sink unavailable: {0}")]
    Unavailable(String),
}

/// Where render commands go.
///
/// Implementations must tolerate commands while disconnected; the sequencer
/// logs a failed send and keeps executing the script.
#[async_trait]
pub trait RenderSink: Send + Sync {
    /// Deliver one command.
    async fn send(&self, command: RenderCommand) -> Result<(), RenderError>;
}

/// Discards everything. Used when no presenter exists.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl RenderSink for NullSink {
    async fn send(&self, _command: RenderCommand) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Captures every command for later assertion.
#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<RenderCommand>>,
}

impl RecordingSink {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<RenderCommand> {
        self.commands.lock().clone()
    }

    /// Drop the recording.
    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

#[async_trait]
impl RenderSink for RecordingSink {
    async fn send(&self, command: RenderCommand) -> Result<(), RenderError> {
        self.commands.lock().push(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sink_preserves_order() {
        let sink = RecordingSink::new();
        sink.send(RenderCommand::Surface { scope: 0, surface: 5 })
            .await
            .unwrap();
        sink.send(RenderCommand::Sound {
            file: "chime.wav".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            sink.commands(),
            vec![
                RenderCommand::Surface { scope: 0, surface: 5 },
                RenderCommand::Sound {
                    file: "chime.wav".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_render_command_wire_shape() {
        let json = serde_json::to_string(&RenderCommand::WindowMove {
            scope: 0,
            position: Position::new(120, -40),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"kind":"window_move","scope":0,"position":{"x":120,"y":-40}}"#
        );
    }
}
