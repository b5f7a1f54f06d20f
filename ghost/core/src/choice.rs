//! Choice & Timeout Manager
//!
//! At most one choice prompt exists at any time. A prompt is a list of
//! labelled options and an optional deadline. Resolution happens exactly
//! once, by user selection, cancellation, or deadline expiry; the dispatch
//! loop drives expiry by calling [`ChoiceManager::tick`] once a second.

use tokio::time::Instant;

use thiserror::Error;

/// What happens when an option is picked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChoiceAction {
    /// Dispatch a synthetic event with these references.
    Event {
        /// Event id, e.g. `OnChoiceSelect`'s follow-up
        id: String,
        /// Reference headers for the synthetic request
        references: Vec<String>,
    },
    /// Execute an inline script directly.
    Script(String),
}

/// One selectable option in a prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Stable identifier reported back on selection
    pub id: String,
    /// Text shown to the user
    pub label: String,
    /// Action taken when selected
    pub action: ChoiceAction,
}

/// An active choice prompt.
#[derive(Clone, Debug)]
pub struct Choice {
    /// Options in presentation order
    pub options: Vec<ChoiceOption>,
    /// Whether dismissing without picking is allowed
    pub cancel_allowed: bool,
    /// Expiry instant; `None` means the prompt waits forever
    pub deadline: Option<Instant>,
}

/// Choice manager errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChoiceError {
    /// A second prompt was presented while one was pending.
    #[error("a choice prompt is already pending")]
    AlreadyPending,
    /// Select or cancel arrived with no prompt active.
    #[error("no choice prompt is active")]
    NoActiveChoice,
    /// Selection named an option id the prompt does not contain.
    #[error("unknown choice option: {0}")]
    UnknownOption(String),
    /// Cancel arrived for a prompt that forbids it.
    #[error("this choice cannot be cancelled")]
    CancelNotAllowed,
}

/// Owns the (at most one) pending prompt.
#[derive(Debug, Default)]
pub struct ChoiceManager {
    pending: Option<Choice>,
}

impl ChoiceManager {
    /// Fresh manager with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending prompt, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&Choice> {
        self.pending.as_ref()
    }

    /// Present a prompt. Fails if one is already pending.
    pub fn present(&mut self, choice: Choice) -> Result<(), ChoiceError> {
        if self.pending.is_some() {
            return Err(ChoiceError::AlreadyPending);
        }
        tracing::debug!(
            options = choice.options.len(),
            cancel_allowed = choice.cancel_allowed,
            has_deadline = choice.deadline.is_some(),
            "choice presented"
        );
        self.pending = Some(choice);
        Ok(())
    }

    /// Resolve by selection. Clears the prompt and returns it with the
    /// picked option.
    pub fn select(&mut self, option_id: &str) -> Result<(Choice, ChoiceOption), ChoiceError> {
        let choice = self.pending.take().ok_or(ChoiceError::NoActiveChoice)?;
        match choice.options.iter().find(|o| o.id == option_id).cloned() {
            Some(option) => Ok((choice, option)),
            None => {
                self.pending = Some(choice);
                Err(ChoiceError::UnknownOption(option_id.to_string()))
            }
        }
    }

    /// Resolve by cancellation, if the prompt allows it.
    pub fn cancel(&mut self) -> Result<Choice, ChoiceError> {
        let choice = self.pending.take().ok_or(ChoiceError::NoActiveChoice)?;
        if !choice.cancel_allowed {
            self.pending = Some(choice);
            return Err(ChoiceError::CancelNotAllowed);
        }
        Ok(choice)
    }

    /// Expire the prompt if its deadline has passed. Returns the expired
    /// prompt, or `None` when nothing is due. Safe to call every tick.
    pub fn tick(&mut self, now: Instant) -> Option<Choice> {
        let due = matches!(
            self.pending.as_ref().and_then(|c| c.deadline),
            Some(deadline) if now >= deadline
        );
        if due {
            tracing::debug!("choice timed out");
            self.pending.take()
        } else {
            None
        }
    }

    /// Drop any pending prompt without resolving it. Runs on Close.
    pub fn clear(&mut self) -> Option<Choice> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn option(id: &str) -> ChoiceOption {
        ChoiceOption {
            id: id.to_string(),
            label: format!("label {id}"),
            action: ChoiceAction::Script(format!("\\0picked {id}\\e")),
        }
    }

    fn choice(deadline: Option<Instant>) -> Choice {
        Choice {
            options: vec![option("a"), option("b")],
            cancel_allowed: true,
            deadline,
        }
    }

    #[test]
    fn test_only_one_pending_prompt() {
        let mut mgr = ChoiceManager::new();
        mgr.present(choice(None)).unwrap();
        assert_eq!(mgr.present(choice(None)), Err(ChoiceError::AlreadyPending));
    }

    #[test]
    fn test_select_clears_prompt() {
        let mut mgr = ChoiceManager::new();
        mgr.present(choice(None)).unwrap();
        let (_, picked) = mgr.select("b").unwrap();
        assert_eq!(picked.id, "b");
        assert!(mgr.pending().is_none());
        assert_eq!(mgr.select("b").unwrap_err(), ChoiceError::NoActiveChoice);
    }

    #[test]
    fn test_unknown_option_keeps_prompt() {
        let mut mgr = ChoiceManager::new();
        mgr.present(choice(None)).unwrap();
        assert_eq!(
            mgr.select("zzz").unwrap_err(),
            ChoiceError::UnknownOption("zzz".to_string())
        );
        assert!(mgr.pending().is_some());
    }

    #[test]
    fn test_cancel_respects_flag() {
        let mut mgr = ChoiceManager::new();
        let mut c = choice(None);
        c.cancel_allowed = false;
        mgr.present(c).unwrap();
        assert_eq!(mgr.cancel().unwrap_err(), ChoiceError::CancelNotAllowed);
        assert!(mgr.pending().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_expires_past_deadline() {
        let mut mgr = ChoiceManager::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        mgr.present(choice(Some(deadline))).unwrap();

        assert!(mgr.tick(Instant::now()).is_none());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(mgr.tick(Instant::now()).is_some());
        // Idempotent after the prompt is gone.
        assert!(mgr.tick(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_never_expires() {
        let mut mgr = ChoiceManager::new();
        mgr.present(choice(None)).unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(mgr.tick(Instant::now()).is_none());
        assert!(mgr.pending().is_some());
    }
}
