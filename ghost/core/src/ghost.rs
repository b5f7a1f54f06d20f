//! Ghost dispatch loop
//!
//! One task owns the state store, the choice manager, and the active script
//! run. Everything reaches it through a single queue: external requests from
//! the daemon, synthetic ticks from the scheduler, and resume messages for
//! suspended runs. Because the queue is the only way in, handlers and the
//! sequencer never observe each other mid-mutation.
//!
//! Resume messages carry the [`RunId`] they belong to; a resume that
//! outlives its run (the run was interrupted by a newer script) is dropped
//! instead of reviving stale work.

use std::sync::Arc;

use chrono::Timelike;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::choice::{Choice, ChoiceAction, ChoiceError, ChoiceManager};
use crate::config::GhostConfig;
use crate::events::GhostEvent;
use crate::protocol::{Request, Response};
use crate::render::RenderSink;
use crate::router::{Dispatch, EventRouter, HandlerCtx};
use crate::sequencer::{RunId, SequencerRun, StepOutcome};
use crate::state::{GhostState, Lifecycle, LifecycleEvent};
use crate::ticker::TickScheduler;

/// Queue depth for the dispatch loop. Ticks are tiny and requests are
/// request/reply, so this never needs to be deep.
const QUEUE_DEPTH: usize = 64;

/// Raw id the front-end sends to dismiss a cancellable prompt.
const CHOICE_CANCEL_ID: &str = "OnChoiceCancel";

/// One message on the dispatch queue.
#[derive(Debug)]
pub enum InputMsg {
    /// An event to handle. External requests carry a reply channel;
    /// synthetic ones (ticks, internal re-dispatch) do not.
    Request {
        /// The decoded request
        request: Request,
        /// Where the response goes, if anyone is listening
        reply: Option<oneshot::Sender<Response>>,
    },
    /// Wake a suspended script run.
    Resume {
        /// The run this wake-up was scheduled for
        run: RunId,
    },
}

/// Talking to a ghost whose loop has stopped.
#[derive(Debug, Error)]
pub enum GhostError {
    /// The dispatch loop handled OnClose and exited.
    #[error("ghost has terminated")]
    Terminated,
}

/// Cheap cloneable front door to the dispatch loop.
#[derive(Clone, Debug)]
pub struct GhostHandle {
    tx: mpsc::Sender<InputMsg>,
}

impl GhostHandle {
    /// Send a request and wait for its response.
    pub async fn request(&self, request: Request) -> Result<Response, GhostError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(InputMsg::Request {
                request,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| GhostError::Terminated)?;
        reply_rx.await.map_err(|_| GhostError::Terminated)
    }

    /// The raw queue, for callers that feed messages directly.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<InputMsg> {
        self.tx.clone()
    }
}

/// The runtime core. Build one, optionally extend its router, then `run`
/// (or `spawn`) it; interact through the [`GhostHandle`].
pub struct Ghost {
    config: GhostConfig,
    router: EventRouter,
    state: GhostState,
    choices: ChoiceManager,
    sink: Arc<dyn RenderSink>,
    rx: mpsc::Receiver<InputMsg>,
    tx: mpsc::Sender<InputMsg>,
    active_run: Option<SequencerRun>,
    next_run: u64,
}

impl Ghost {
    /// New ghost with the built-in handlers registered.
    #[must_use]
    pub fn new(config: GhostConfig, sink: Arc<dyn RenderSink>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        Self {
            config,
            router: default_router(),
            state: GhostState::new(),
            choices: ChoiceManager::new(),
            sink,
            rx,
            tx,
            active_run: None,
            next_run: 0,
        }
    }

    /// Handle for feeding the loop.
    #[must_use]
    pub fn handle(&self) -> GhostHandle {
        GhostHandle {
            tx: self.tx.clone(),
        }
    }

    /// Extend or replace handlers before the loop starts.
    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    /// Run the loop on a spawned task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// The dispatch loop. Returns once OnClose has been handled.
    pub async fn run(mut self) {
        let ticker = TickScheduler::spawn(self.tx.clone(), self.config.tick_period());
        tracing::info!("ghost dispatch loop started");
        while let Some(msg) = self.rx.recv().await {
            match msg {
                InputMsg::Request { request, reply } => {
                    let response = self.handle_request(&request).await;
                    if let Some(reply) = reply {
                        if reply.send(response).is_err() {
                            tracing::debug!("requester went away before the reply");
                        }
                    }
                    if self.state.lifecycle() == Lifecycle::Terminated {
                        break;
                    }
                }
                InputMsg::Resume { run } => self.resume(run).await,
            }
        }
        ticker.stop();
        // If the queue died some other way, still go down cleanly so
        // anything watching the lifecycle sees a proper close.
        if self.state.lifecycle() != Lifecycle::Terminated {
            tracing::warn!("dispatch queue lost, synthesizing final close");
            let close = Request::synthetic(GhostEvent::OnClose.as_str());
            let _ = self.handle_request(&close).await;
        }
        tracing::info!("ghost dispatch loop stopped");
    }

    async fn handle_request(&mut self, request: &Request) -> Response {
        let id = request.event_id();
        if id.is_empty() {
            return Response::bad_request("missing ID header");
        }
        if self.state.lifecycle() == Lifecycle::Terminated {
            return Response::internal_error("ghost has terminated");
        }
        let event = GhostEvent::from_id(id);

        // Any user interaction resets the idle clock, whether or not a
        // handler ends up speaking.
        if matches!(
            event,
            GhostEvent::OnMouseClick | GhostEvent::OnMouseDoubleClick | GhostEvent::OnChoiceSelect
        ) {
            self.state.idle_seconds = 0;
        }

        match event {
            GhostEvent::OnSecondChange | GhostEvent::OnMinuteChange => {
                self.handle_tick(&event, request).await
            }
            GhostEvent::OnChoiceSelect => self.handle_choice_select(request).await,
            GhostEvent::OnClose => self.handle_close(request).await,
            GhostEvent::Other(ref id) if id == CHOICE_CANCEL_ID => self.handle_choice_cancel(),
            _ => self.handle_routed(request).await,
        }
    }

    /// Route through the handler table and act on the verdict.
    async fn handle_routed(&mut self, request: &Request) -> Response {
        match self.route(request) {
            None => Response::no_content(),
            Some(Err(err)) => {
                tracing::error!(event = request.event_id(), error = %err, "handler failed");
                Response::internal_error(err.to_string())
            }
            Some(Ok(Dispatch::Silent)) => Response::no_content(),
            Some(Ok(Dispatch::Script(script))) => {
                if self.state.lifecycle() == Lifecycle::Booting
                    && request.event_id() == GhostEvent::OnBoot.as_str()
                {
                    if let Err(err) = self.state.transition(LifecycleEvent::Boot) {
                        tracing::warn!(error = %err, "boot transition refused");
                    }
                }
                // A pending choice and a fresh script are orthogonal: the
                // prompt stays pending while the new script speaks.
                match self.begin_script(&script).await {
                    Ok(()) => Response::ok(script),
                    Err(err) => Response::internal_error(err.to_string()),
                }
            }
        }
    }

    fn route(&mut self, request: &Request) -> Option<anyhow::Result<Dispatch>> {
        let mut ctx = HandlerCtx {
            state: &mut self.state,
            choices: &mut self.choices,
            dialogue: &self.config.dialogue,
        };
        self.router.dispatch(request, &mut ctx)
    }

    async fn handle_tick(&mut self, event: &GhostEvent, request: &Request) -> Response {
        if *event == GhostEvent::OnSecondChange {
            self.state.idle_seconds = self.state.idle_seconds.saturating_add(1);

            if self.choices.tick(Instant::now()).is_some() {
                if let Err(err) = self.state.transition(LifecycleEvent::ResolveChoice) {
                    tracing::warn!(error = %err, "resolve transition refused on timeout");
                }
                let timeout = Request::synthetic(GhostEvent::OnChoiceTimeout.as_str());
                let _ = self.handle_routed(&timeout).await;
            } else if self.state.lifecycle() == Lifecycle::Idle
                && self.state.idle_seconds >= self.config.idle_talk_interval().as_secs()
            {
                self.state.idle_seconds = 0;
                if let Some(line) = pick(&self.config.dialogue.idle) {
                    tracing::debug!("idle chatter");
                    if let Err(err) = self.begin_script(&line).await {
                        tracing::warn!(error = %err, "idle chatter dropped its prompt");
                    }
                }
            }
        }
        // Registered periodic handlers still get their turn.
        self.handle_routed(request).await
    }

    async fn handle_choice_select(&mut self, request: &Request) -> Response {
        let Some(option_id) = request.reference(0) else {
            return Response::bad_request("OnChoiceSelect requires Reference0");
        };
        match self.choices.select(option_id) {
            Err(err) => Response::bad_request(err.to_string()),
            Ok((_choice, option)) => {
                if let Err(err) = self.state.transition(LifecycleEvent::ResolveChoice) {
                    tracing::warn!(error = %err, "resolve transition refused on select");
                }
                match option.action {
                    ChoiceAction::Script(script) => match self.begin_script(&script).await {
                        Ok(()) => Response::ok(script),
                        Err(err) => Response::internal_error(err.to_string()),
                    },
                    ChoiceAction::Event { id, references } => {
                        let mut follow_up = Request::synthetic(&id);
                        for (index, value) in references.iter().enumerate() {
                            follow_up = follow_up.with_reference(index, value);
                        }
                        self.handle_routed(&follow_up).await
                    }
                }
            }
        }
    }

    fn handle_choice_cancel(&mut self) -> Response {
        match self.choices.cancel() {
            Ok(_) => {
                if let Err(err) = self.state.transition(LifecycleEvent::ResolveChoice) {
                    tracing::warn!(error = %err, "resolve transition refused on cancel");
                }
                Response::no_content()
            }
            Err(err) => Response::bad_request(err.to_string()),
        }
    }

    /// Close is terminal: abort everything, say goodbye in the response
    /// value only, and leave the machine in `Terminated` so the loop exits.
    async fn handle_close(&mut self, request: &Request) -> Response {
        if let Some(run) = self.active_run.take() {
            tracing::debug!(run = %run.id(), "aborting run for close");
        }
        self.choices.clear();
        let farewell = match self.route(request) {
            Some(Ok(Dispatch::Script(script))) => Some(script),
            Some(Err(err)) => {
                tracing::warn!(error = %err, "close handler failed, closing anyway");
                None
            }
            _ => None,
        };
        self.state.stop_all_animations();
        if let Err(err) = self.state.transition(LifecycleEvent::Close) {
            tracing::warn!(error = %err, "close transition refused");
        }
        if let Err(err) = self.state.transition(LifecycleEvent::Terminate) {
            tracing::warn!(error = %err, "terminate transition refused");
        }
        match farewell {
            Some(script) => Response::ok(script),
            None => Response::no_content(),
        }
    }

    /// Start a new run, interrupting whatever was speaking. While a choice
    /// prompt is pending the lifecycle stays `Choosing`; the run still
    /// executes, it just does not claim the machine. Errors if the run ends
    /// on a prompt of its own while one is already pending; effects of the
    /// executed commands stand either way.
    async fn begin_script(&mut self, script: &str) -> Result<(), ChoiceError> {
        if let Some(run) = self.active_run.take() {
            tracing::debug!(run = %run.id(), "interrupting active run");
            self.end_response();
        }
        if self.state.lifecycle() == Lifecycle::Idle {
            if let Err(err) = self.state.transition(LifecycleEvent::BeginResponse) {
                tracing::warn!(error = %err, "begin transition refused");
            }
        }
        self.state.reset_balloons();
        let id = RunId(self.next_run);
        self.next_run += 1;
        tracing::debug!(run = %id, "starting script run");
        let run = SequencerRun::new(id, script);
        self.drive(run).await
    }

    /// Step a run until it blocks or ends, then park or retire it. The only
    /// error is a rejected choice prompt; callers with a reply channel turn
    /// it into an error response.
    async fn drive(&mut self, mut run: SequencerRun) -> Result<(), ChoiceError> {
        loop {
            match run.step(&mut self.state, self.sink.as_ref()).await {
                StepOutcome::Continue => {}
                StepOutcome::Waiting(duration) => {
                    let id = run.id();
                    self.active_run = Some(run);
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        let _ = tx.send(InputMsg::Resume { run: id }).await;
                    });
                    return Ok(());
                }
                StepOutcome::AwaitingChoice => {
                    let deadline = if run.no_timeout() {
                        None
                    } else {
                        Some(Instant::now() + self.config.choice_timeout())
                    };
                    let choice = Choice {
                        options: run.take_options(),
                        cancel_allowed: run.cancel_allowed(),
                        deadline,
                    };
                    match self.choices.present(choice) {
                        Ok(()) => {
                            if self.state.lifecycle() == Lifecycle::Responding {
                                if let Err(err) =
                                    self.state.transition(LifecycleEvent::BeginChoice)
                                {
                                    tracing::warn!(error = %err, "choice transition refused");
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(run = %run.id(), error = %err, "dropping choice prompt");
                            self.end_response();
                            return Err(err);
                        }
                    }
                    return Ok(());
                }
                StepOutcome::Finished => {
                    self.end_response();
                    self.state.idle_seconds = 0;
                    return Ok(());
                }
                StepOutcome::Failed(err) => {
                    tracing::error!(run = %run.id(), error = %err, "script run failed");
                    self.end_response();
                    return Ok(());
                }
            }
        }
    }

    /// Leave `Responding` if we are in it. Runs that executed while a
    /// prompt was pending never entered it, so there is nothing to undo.
    fn end_response(&mut self) {
        if self.state.lifecycle() == Lifecycle::Responding {
            if let Err(err) = self.state.transition(LifecycleEvent::EndResponse) {
                tracing::warn!(error = %err, "end transition refused");
            }
        }
    }

    async fn resume(&mut self, run_id: RunId) {
        match self.active_run.take() {
            Some(run) if run.id() == run_id => {
                // Nobody is waiting on the reply by now; a rejected prompt
                // can only be logged.
                if let Err(err) = self.drive(run).await {
                    tracing::error!(run = %run_id, error = %err, "resumed run dropped its prompt");
                }
            }
            Some(run) => {
                tracing::debug!(stale = %run_id, active = %run.id(), "dropping stale resume");
                self.active_run = Some(run);
            }
            None => tracing::debug!(stale = %run_id, "dropping stale resume"),
        }
    }
}

/// Handlers every ghost starts with: canned dialogue for the lifecycle and
/// pointer events. All of them defer wording to the config pools.
fn default_router() -> EventRouter {
    let mut router = EventRouter::new();
    router.register(GhostEvent::OnBoot, |_request, ctx| {
        let hour = chrono::Local::now().hour();
        Ok(pick_dispatch(ctx.dialogue.boot_pool(hour)))
    });
    router.register(GhostEvent::OnClose, |_request, ctx| {
        Ok(pick_dispatch(&ctx.dialogue.close))
    });
    router.register(GhostEvent::OnMouseClick, |_request, ctx| {
        Ok(pick_dispatch(&ctx.dialogue.click))
    });
    router.register(GhostEvent::OnMouseDoubleClick, |_request, ctx| {
        Ok(pick_dispatch(&ctx.dialogue.double_click))
    });
    router
}

fn pick_dispatch(pool: &[String]) -> Dispatch {
    match pick(pool) {
        Some(line) => Dispatch::Script(line),
        None => Dispatch::Silent,
    }
}

fn pick(pool: &[String]) -> Option<String> {
    pool.choose(&mut rand::thread_rng()).cloned()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use crate::protocol::Status;
    use crate::render::{RecordingSink, RenderCommand};

    use super::*;

    fn test_config() -> GhostConfig {
        GhostConfig {
            runtime: crate::config::RuntimeConfig {
                idle_talk_interval_secs: 5,
                choice_timeout_secs: 10,
                ..Default::default()
            },
            dialogue: crate::config::DialogueTable {
                // Empty time slots so boot always comes from the one pool,
                // whatever the wall clock says.
                boot: vec!["\\0\\s[0]Boot line.\\e".to_string()],
                boot_morning: Vec::new(),
                boot_evening: Vec::new(),
                close: vec!["\\0Goodbye.\\e".to_string()],
                click: vec!["\\0Clicked.\\e".to_string()],
                idle: vec!["\\0Idle line.\\e".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn start_ghost(
        config: GhostConfig,
        extend: impl FnOnce(&mut EventRouter),
    ) -> (GhostHandle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let mut ghost = Ghost::new(config, sink.clone());
        extend(ghost.router_mut());
        let handle = ghost.handle();
        ghost.spawn();
        (handle, sink)
    }

    /// Spin (with virtual time) until the sink shows `text` in a balloon.
    async fn wait_for_balloon_text(sink: &RecordingSink, text: &str) {
        loop {
            let found = sink
                .commands()
                .iter()
                .any(|c| matches!(c, RenderCommand::BalloonText { text: t, .. } if t == text));
            if found {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_speaks_and_returns_script() {
        let (handle, sink) = start_ghost(test_config(), |_| {});
        let response = handle
            .request(Request::synthetic("OnBoot"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.value.as_deref(), Some("\\0\\s[0]Boot line.\\e"));
        wait_for_balloon_text(&sink, "Boot line.").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_event_gets_no_content() {
        let (handle, _sink) = start_ghost(test_config(), |_| {});
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        let response = handle
            .request(Request::synthetic("OnNeverHeardOfIt"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::NoContent);
        assert!(response.value.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_is_internal_error() {
        let (handle, _sink) = start_ghost(test_config(), |router| {
            router.register_id("OnBreakage", |_, _| anyhow::bail!("handler exploded"));
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        let response = handle
            .request(Request::synthetic("OnBreakage"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::InternalServerError);
        // State survives a failing handler.
        let response = handle
            .request(Request::synthetic("OnMouseClick"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_script_finishes_after_virtual_delay() {
        let (handle, sink) = start_ghost(test_config(), |router| {
            router.register_id("OnSlow", |_, _| {
                Ok(Dispatch::Script("\\0One\\w4Two\\e".to_string()))
            });
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        sink.clear();

        let response = handle.request(Request::synthetic("OnSlow")).await.unwrap();
        // The response comes back while the run is still mid-wait.
        assert_eq!(response.status, Status::Ok);
        wait_for_balloon_text(&sink, "OneTwo").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_choice_select_runs_inline_script() {
        let (handle, sink) = start_ghost(test_config(), |router| {
            router.register_id("OnAsk", |_, _| {
                Ok(Dispatch::Script(
                    "\\0Tea or coffee?\\q[Tea,script:\\0Tea it is.\\e]\\q[Coffee,coffee]\\e"
                        .to_string(),
                ))
            });
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        handle.request(Request::synthetic("OnAsk")).await.unwrap();
        sink.clear();

        let response = handle
            .request(
                Request::synthetic("OnChoiceSelect")
                    .with_reference(0, "script:\\0Tea it is.\\e"),
            )
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.value.as_deref(), Some("\\0Tea it is.\\e"));
        wait_for_balloon_text(&sink, "Tea it is.").await;

        // The prompt is gone; a second selection is a protocol error.
        let response = handle
            .request(Request::synthetic("OnChoiceSelect").with_reference(0, "coffee"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::BadRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_choice_select_raises_follow_up_event() {
        let (handle, _sink) = start_ghost(test_config(), |router| {
            router.register_id("OnAsk", |_, _| {
                Ok(Dispatch::Script("\\0Pick.\\q[Yes,yes]\\e".to_string()))
            });
            router.register(GhostEvent::OnChoiceSelect, |request, _ctx| {
                let id = request.reference(0).unwrap_or("?").to_string();
                Ok(Dispatch::Script(format!("\\0You said {id}.\\e")))
            });
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        handle.request(Request::synthetic("OnAsk")).await.unwrap();

        let response = handle
            .request(Request::synthetic("OnChoiceSelect").with_reference(0, "yes"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.value.as_deref(), Some("\\0You said yes.\\e"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_choice_timeout_raises_timeout_event() {
        let (handle, sink) = start_ghost(test_config(), |router| {
            router.register_id("OnAsk", |_, _| {
                Ok(Dispatch::Script("\\0Pick.\\q[Yes,yes]\\e".to_string()))
            });
            router.register(GhostEvent::OnChoiceTimeout, |_, _| {
                Ok(Dispatch::Script("\\0Too slow.\\e".to_string()))
            });
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        handle.request(Request::synthetic("OnAsk")).await.unwrap();
        sink.clear();

        // choice_timeout_secs is 10; the ticker drives expiry on its own.
        wait_for_balloon_text(&sink, "Too slow.").await;

        let response = handle
            .request(Request::synthetic("OnChoiceSelect").with_reference(0, "yes"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::BadRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_while_choice_pending_is_orthogonal() {
        let (handle, sink) = start_ghost(test_config(), |router| {
            router.register_id("OnAsk", |_, _| {
                // \* so the ticker can never expire the prompt under us.
                Ok(Dispatch::Script("\\0Pick.\\q[Yes,yes]\\*\\e".to_string()))
            });
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        handle.request(Request::synthetic("OnAsk")).await.unwrap();
        sink.clear();

        // The click speaks even though the prompt is still up.
        let response = handle
            .request(Request::synthetic("OnMouseClick"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        wait_for_balloon_text(&sink, "Clicked.").await;

        // And the prompt survived it.
        let response = handle
            .request(Request::synthetic("OnChoiceSelect").with_reference(0, "yes"))
            .await
            .unwrap();
        assert!(response.status.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_prompt_while_pending_is_an_error_response() {
        let (handle, sink) = start_ghost(test_config(), |router| {
            router.register_id("OnAsk", |_, _| {
                Ok(Dispatch::Script("\\0First?\\q[Yes,yes]\\*\\e".to_string()))
            });
            router.register_id("OnAskAgain", |_, _| {
                Ok(Dispatch::Script("\\0Second?\\q[No,no]\\*\\e".to_string()))
            });
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        handle.request(Request::synthetic("OnAsk")).await.unwrap();
        sink.clear();

        // The second script speaks, but its prompt collides with the
        // pending one and the caller hears about it.
        let response = handle
            .request(Request::synthetic("OnAskAgain"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::InternalServerError);
        assert!(response
            .extra_headers
            .iter()
            .any(|(name, _)| name == "X-Ghost-Error"));
        wait_for_balloon_text(&sink, "Second?").await;

        // The first prompt is still the live one.
        let response = handle
            .request(Request::synthetic("OnChoiceSelect").with_reference(0, "yes"))
            .await
            .unwrap();
        assert!(response.status.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_chatter_after_quiet_spell() {
        let (handle, sink) = start_ghost(test_config(), |_| {});
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        sink.clear();
        // idle_talk_interval_secs is 5; just wait it out on the virtual clock.
        wait_for_balloon_text(&sink, "Idle line.").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_returns_farewell_and_terminates() {
        let (handle, _sink) = start_ghost(test_config(), |_| {});
        handle.request(Request::synthetic("OnBoot")).await.unwrap();

        let response = handle
            .request(Request::synthetic("OnClose"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.value.as_deref(), Some("\\0Goodbye.\\e"));

        // The loop is gone now.
        let err = handle
            .request(Request::synthetic("OnMouseClick"))
            .await
            .unwrap_err();
        assert!(matches!(err, GhostError::Terminated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupting_script_invalidates_old_resume() {
        let (handle, sink) = start_ghost(test_config(), |router| {
            router.register_id("OnSlow", |_, _| {
                Ok(Dispatch::Script("\\0Slow start\\w9\\w9 slow end\\e".to_string()))
            });
        });
        handle.request(Request::synthetic("OnBoot")).await.unwrap();
        handle.request(Request::synthetic("OnSlow")).await.unwrap();
        sink.clear();

        // Interrupt mid-wait; the click reply takes over.
        let response = handle
            .request(Request::synthetic("OnMouseClick"))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        wait_for_balloon_text(&sink, "Clicked.").await;

        // Give the stale resume time to arrive; it must not revive the run.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let texts: Vec<String> = sink
            .commands()
            .iter()
            .filter_map(|c| match c {
                RenderCommand::BalloonText { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert!(texts.iter().all(|t| !t.contains("slow end")), "{texts:?}");
    }
}
