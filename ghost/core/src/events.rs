//! Ghost Event Identifiers
//!
//! Typed view over the `ID` header of an inbound request. Unknown identifiers
//! are carried through as [`GhostEvent::Other`] so dispatch stays total: the
//! protocol is permissive and an event we have never heard of must not crash
//! the ghost.

use serde::{Deserialize, Serialize};

/// Event identifiers the runtime knows about.
///
/// The periodic identifiers (`OnSecondChange`, `OnMinuteChange`) arrive both
/// from the front-end and from the tick scheduler; handlers cannot tell the
/// difference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GhostEvent {
    /// First request after the process starts
    OnBoot,
    /// Shutdown request; terminal
    OnClose,
    /// Periodic one-second tick
    OnSecondChange,
    /// Periodic one-minute tick
    OnMinuteChange,
    /// Pointer click on the character
    OnMouseClick,
    /// Pointer double-click on the character
    OnMouseDoubleClick,
    /// User picked a pending choice option (Reference0 = option id)
    OnChoiceSelect,
    /// A pending choice expired without a selection
    OnChoiceTimeout,
    /// Anything else; answered with an empty success unless registered
    Other(String),
}

impl GhostEvent {
    /// Map an `ID` header value to an event.
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        match id {
            "OnBoot" => Self::OnBoot,
            "OnClose" => Self::OnClose,
            "OnSecondChange" => Self::OnSecondChange,
            "OnMinuteChange" => Self::OnMinuteChange,
            "OnMouseClick" => Self::OnMouseClick,
            "OnMouseDoubleClick" => Self::OnMouseDoubleClick,
            "OnChoiceSelect" => Self::OnChoiceSelect,
            "OnChoiceTimeout" => Self::OnChoiceTimeout,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OnBoot => "OnBoot",
            Self::OnClose => "OnClose",
            Self::OnSecondChange => "OnSecondChange",
            Self::OnMinuteChange => "OnMinuteChange",
            Self::OnMouseClick => "OnMouseClick",
            Self::OnMouseDoubleClick => "OnMouseDoubleClick",
            Self::OnChoiceSelect => "OnChoiceSelect",
            Self::OnChoiceTimeout => "OnChoiceTimeout",
            Self::Other(id) => id,
        }
    }
}

impl std::fmt::Display for GhostEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
