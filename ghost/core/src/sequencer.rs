//! Command Sequencer
//!
//! Executes a parsed script one command at a time against the state store
//! and the render sink. A run never blocks the dispatch loop: wait commands
//! hand a [`StepOutcome::Waiting`] back to the loop, which schedules a
//! resume message and services other input in the meantime.
//!
//! A malformed tag fails the whole run, but everything executed before it
//! stands; there is no rollback. Sink failures are logged and skipped, a
//! deaf presenter must not stall the ghost's logical state.

use std::fmt;
use std::time::Duration;

use crate::choice::ChoiceOption;
use crate::render::{RenderCommand, RenderSink};
use crate::script::{ScriptCommand, ScriptParser, ScriptSyntaxError};
use crate::state::{GhostState, Position};

/// Nominal pause for `\i[n,wait]`. The core has no animation clock; the
/// presenter owns real frame timing.
pub const ANIMATION_WAIT: Duration = Duration::from_millis(500);

/// Identity of one script run. Resume messages carry this so a resume for
/// an aborted run falls on the floor instead of reviving it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// What a single step produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Command executed; pull the next one
    Continue,
    /// Run suspended; resume after this long
    Waiting(Duration),
    /// Script ended with choice options collected; present them
    AwaitingChoice,
    /// Script ended with nothing pending
    Finished,
    /// A malformed tag killed the run; effects so far stand
    Failed(ScriptSyntaxError),
}

/// One in-flight script execution.
#[derive(Debug)]
pub struct SequencerRun {
    id: RunId,
    parser: ScriptParser,
    scope: usize,
    options: Vec<ChoiceOption>,
    cancel_allowed: bool,
    no_timeout: bool,
}

impl SequencerRun {
    /// New run over `script`, starting in scope 0.
    #[must_use]
    pub fn new(id: RunId, script: &str) -> Self {
        Self {
            id,
            parser: ScriptParser::new(script),
            scope: 0,
            options: Vec::new(),
            cancel_allowed: false,
            no_timeout: false,
        }
    }

    /// Run identity.
    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Whether `\z` appeared.
    #[must_use]
    pub fn cancel_allowed(&self) -> bool {
        self.cancel_allowed
    }

    /// Whether `\*` appeared.
    #[must_use]
    pub fn no_timeout(&self) -> bool {
        self.no_timeout
    }

    /// Collected `\q` options, consumed when the prompt is built.
    pub fn take_options(&mut self) -> Vec<ChoiceOption> {
        std::mem::take(&mut self.options)
    }

    /// Execute the next command.
    pub async fn step(&mut self, state: &mut GhostState, sink: &dyn RenderSink) -> StepOutcome {
        let command = match self.parser.next_command() {
            None => return self.end_of_script(),
            Some(Err(err)) => {
                tracing::warn!(run = %self.id, error = %err, "malformed tag, failing run");
                return StepOutcome::Failed(err);
            }
            Some(Ok(cmd)) => cmd,
        };

        match command {
            ScriptCommand::Text(text) => {
                let balloon = state.balloon_mut(self.scope);
                balloon.text.push_str(&text);
                balloon.visible = true;
                let full = balloon.text.clone();
                self.emit(
                    sink,
                    RenderCommand::BalloonText {
                        scope: self.scope,
                        text: full,
                    },
                )
                .await;
                StepOutcome::Continue
            }
            ScriptCommand::Newline => {
                let balloon = state.balloon_mut(self.scope);
                balloon.text.push('\n');
                balloon.visible = true;
                let full = balloon.text.clone();
                self.emit(
                    sink,
                    RenderCommand::BalloonText {
                        scope: self.scope,
                        text: full,
                    },
                )
                .await;
                StepOutcome::Continue
            }
            ScriptCommand::Scope(scope) => {
                self.scope = scope;
                StepOutcome::Continue
            }
            ScriptCommand::Surface(surface) => {
                state.set_surface(self.scope, surface);
                self.emit(
                    sink,
                    RenderCommand::Surface {
                        scope: self.scope,
                        surface,
                    },
                )
                .await;
                StepOutcome::Continue
            }
            ScriptCommand::Animation { id, wait } => {
                state.start_animation(id);
                self.emit(sink, RenderCommand::AnimationStart { id }).await;
                if wait {
                    StepOutcome::Waiting(ANIMATION_WAIT)
                } else {
                    StepOutcome::Continue
                }
            }
            ScriptCommand::Wait(duration) => StepOutcome::Waiting(duration),
            ScriptCommand::MoveWindow { x, y } => {
                let position = Position::new(x, y);
                state.set_window_position(self.scope, position);
                self.emit(
                    sink,
                    RenderCommand::WindowMove {
                        scope: self.scope,
                        position,
                    },
                )
                .await;
                StepOutcome::Continue
            }
            ScriptCommand::MoveBalloon { x, y } => {
                let position = Position::new(x, y);
                state.set_balloon_position(self.scope, position);
                self.emit(
                    sink,
                    RenderCommand::BalloonMove {
                        scope: self.scope,
                        position,
                    },
                )
                .await;
                StepOutcome::Continue
            }
            ScriptCommand::ChoiceOption { id, label, action } => {
                self.options.push(ChoiceOption { id, label, action });
                StepOutcome::Continue
            }
            ScriptCommand::AllowCancel => {
                self.cancel_allowed = true;
                StepOutcome::Continue
            }
            ScriptCommand::NoTimeout => {
                self.no_timeout = true;
                StepOutcome::Continue
            }
            ScriptCommand::PlaySound(file) => {
                self.emit(sink, RenderCommand::Sound { file }).await;
                StepOutcome::Continue
            }
            ScriptCommand::End => self.end_of_script(),
        }
    }

    fn end_of_script(&self) -> StepOutcome {
        if self.options.is_empty() {
            StepOutcome::Finished
        } else {
            StepOutcome::AwaitingChoice
        }
    }

    async fn emit(&self, sink: &dyn RenderSink, command: RenderCommand) {
        if let Err(err) = sink.send(command).await {
            tracing::warn!(run = %self.id, error = %err, "render sink dropped a command");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::render::RecordingSink;

    use super::*;

    /// Drive until the run blocks or ends.
    async fn run_until_blocked(
        run: &mut SequencerRun,
        state: &mut GhostState,
        sink: &dyn RenderSink,
    ) -> StepOutcome {
        loop {
            match run.step(state, sink).await {
                StepOutcome::Continue => {}
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn test_greeting_script_drives_state_and_sink() {
        let mut state = GhostState::new();
        let sink = RecordingSink::new();
        let mut run = SequencerRun::new(RunId(1), "\\0\\s[5]Hello!\\n\\1Hi.\\e");

        let outcome = run_until_blocked(&mut run, &mut state, &sink).await;
        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(state.surface(0), 5);
        assert_eq!(state.balloon(0).text, "Hello!\n");
        assert_eq!(state.balloon(1).text, "Hi.");
        assert_eq!(
            sink.commands(),
            vec![
                RenderCommand::Surface { scope: 0, surface: 5 },
                RenderCommand::BalloonText {
                    scope: 0,
                    text: "Hello!".to_string()
                },
                RenderCommand::BalloonText {
                    scope: 0,
                    text: "Hello!\n".to_string()
                },
                RenderCommand::BalloonText {
                    scope: 1,
                    text: "Hi.".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_suspends_and_resumes_in_place() {
        let mut state = GhostState::new();
        let sink = RecordingSink::new();
        let mut run = SequencerRun::new(RunId(2), "\\0One\\w4Two\\e");

        let outcome = run_until_blocked(&mut run, &mut state, &sink).await;
        assert_eq!(outcome, StepOutcome::Waiting(Duration::from_millis(200)));
        assert_eq!(state.balloon(0).text, "One");

        let outcome = run_until_blocked(&mut run, &mut state, &sink).await;
        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(state.balloon(0).text, "OneTwo");
    }

    #[tokio::test]
    async fn test_choice_options_collected_until_end() {
        let mut state = GhostState::new();
        let sink = RecordingSink::new();
        let mut run =
            SequencerRun::new(RunId(3), "\\0Pick one.\\n\\q[Yes,yes]\\q[No,no]\\z\\e");

        let outcome = run_until_blocked(&mut run, &mut state, &sink).await;
        assert_eq!(outcome, StepOutcome::AwaitingChoice);
        assert!(run.cancel_allowed());
        assert!(!run.no_timeout());
        let options = run.take_options();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].id, "yes");
        assert_eq!(options[1].label, "No");
    }

    #[tokio::test]
    async fn test_malformed_tag_fails_run_but_keeps_effects() {
        let mut state = GhostState::new();
        let sink = RecordingSink::new();
        let mut run = SequencerRun::new(RunId(4), "\\0\\s[3]Hi\\x[bogus]there\\e");

        let outcome = run_until_blocked(&mut run, &mut state, &sink).await;
        assert!(matches!(outcome, StepOutcome::Failed(_)), "{outcome:?}");
        // Everything before the bad tag already happened and stays.
        assert_eq!(state.surface(0), 3);
        assert_eq!(state.balloon(0).text, "Hi");
    }

    #[tokio::test]
    async fn test_animation_wait_pauses_run() {
        let mut state = GhostState::new();
        let sink = RecordingSink::new();
        let mut run = SequencerRun::new(RunId(5), "\\i[7,wait]done\\e");

        let outcome = run_until_blocked(&mut run, &mut state, &sink).await;
        assert_eq!(outcome, StepOutcome::Waiting(ANIMATION_WAIT));
        assert_eq!(state.animations(), &[7]);
        assert_eq!(
            sink.commands(),
            vec![RenderCommand::AnimationStart { id: 7 }]
        );
    }

    #[tokio::test]
    async fn test_window_and_balloon_moves() {
        let mut state = GhostState::new();
        let sink = RecordingSink::new();
        let mut run = SequencerRun::new(
            RunId(6),
            "\\![move,300,200]\\![set,balloonoffset,-20,0]\\e",
        );

        run_until_blocked(&mut run, &mut state, &sink).await;
        assert_eq!(state.window_position(0), Position::new(300, 200));
        assert_eq!(state.balloon(0).position, Position::new(-20, 0));
    }
}
