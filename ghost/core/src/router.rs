//! Event Router
//!
//! Maps event ids to handlers. Handlers run on the dispatch loop with
//! exclusive access to the state store and choice manager through
//! [`HandlerCtx`], and answer with a [`Dispatch`]: a script to speak or
//! silence. An event nobody registered for is not an error; the loop turns
//! it into a no-content response.

use std::collections::HashMap;

use crate::choice::ChoiceManager;
use crate::config::DialogueTable;
use crate::events::GhostEvent;
use crate::protocol::Request;
use crate::state::GhostState;

/// What a handler decided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Speak this script; the caller returns it as the response value and
    /// hands it to the sequencer
    Script(String),
    /// Handled, nothing to say
    Silent,
}

/// Everything a handler may touch. Borrowed from the dispatch loop for the
/// duration of one event, so handlers never race each other.
pub struct HandlerCtx<'a> {
    /// The ghost record
    pub state: &'a mut GhostState,
    /// The (at most one) pending choice
    pub choices: &'a mut ChoiceManager,
    /// Canned dialogue pools
    pub dialogue: &'a DialogueTable,
}

type Handler = Box<dyn Fn(&Request, &mut HandlerCtx<'_>) -> anyhow::Result<Dispatch> + Send + Sync>;

/// Event id → handler table.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Handler>,
}

impl EventRouter {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`, replacing any previous one.
    pub fn register<F>(&mut self, event: GhostEvent, handler: F)
    where
        F: Fn(&Request, &mut HandlerCtx<'_>) -> anyhow::Result<Dispatch> + Send + Sync + 'static,
    {
        self.register_id(event.as_str(), handler);
    }

    /// Register under a raw event id, for events outside the known set.
    pub fn register_id<F>(&mut self, id: &str, handler: F)
    where
        F: Fn(&Request, &mut HandlerCtx<'_>) -> anyhow::Result<Dispatch> + Send + Sync + 'static,
    {
        self.handlers.insert(id.to_string(), Box::new(handler));
    }

    /// Whether anything is registered for `id`.
    #[must_use]
    pub fn handles(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Run the handler for the request's event. `None` means nobody is
    /// registered for it.
    pub fn dispatch(
        &self,
        request: &Request,
        ctx: &mut HandlerCtx<'_>,
    ) -> Option<anyhow::Result<Dispatch>> {
        let id = request.event_id();
        let handler = self.handlers.get(id)?;
        tracing::debug!(event = id, "dispatching");
        Some(handler(request, ctx))
    }
}
