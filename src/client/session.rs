// src/client/session.rs
//! Per-tab session controller: join → answer → countdown → submit.
//!
//! Transitions are a pure function from (state, event) to the next state
//! plus a list of effects; [`SessionController`] owns the mutable pieces
//! (timer handle, storage, API) and executes the effects. That keeps the
//! deadline/auto-submit logic fully checkable without a network.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::{ParticipantInfo, PollDetail, PollStatus, PollType, SubmitRequest, VoteEntry};

use super::api::{ApiError, PollClient};
use super::queue::VoteQueue;
use super::sync::Connectivity;

/// How a new participant picks their poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinMethod {
    /// First currently active poll of the given kind.
    Active { poll_type: PollType },
    /// Case-insensitive title lookup.
    Title {
        title: String,
        poll_type: Option<PollType>,
    },
    /// Join-code slug; without a type the kinds are tried in
    /// [`PollType::SLUG_FALLBACK_ORDER`].
    Slug {
        slug: String,
        poll_type: Option<PollType>,
    },
}

/// Why a join attempt landed back at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinFailure {
    NameRequired,
    NotFound,
    Closed { title: String },
    Unreachable,
}

impl JoinFailure {
    pub fn message(&self) -> String {
        match self {
            JoinFailure::NameRequired => "please enter your name to join".into(),
            JoinFailure::NotFound => "no active session found".into(),
            JoinFailure::Closed { title } if title.is_empty() => {
                "this session is closed and no longer accepting answers".into()
            }
            JoinFailure::Closed { title } => {
                format!("\"{title}\" is closed and no longer accepting answers")
            }
            JoinFailure::Unreachable => {
                "could not reach the server — check your connection and try again".into()
            }
        }
    }
}

/// Problem surfaced on the answer form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    Unanswered { index: usize, question_id: i32 },
    Rejected { detail: String },
}

impl FormError {
    pub fn message(&self) -> String {
        match self {
            FormError::Unanswered { index, .. } => {
                format!("please answer question {} before submitting", index + 1)
            }
            FormError::Rejected { detail } => detail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnsweringState {
    pub poll: PollDetail,
    pub participant: ParticipantInfo,
    /// question id → chosen choice id
    pub answers: HashMap<i32, i32>,
    /// Whole seconds left, derived once from the end time at render.
    pub remaining: Option<u64>,
    pub error: Option<FormError>,
}

impl AnsweringState {
    /// Payload with every answered question, in question order. Unanswered
    /// questions are simply omitted.
    pub fn request(&self) -> SubmitRequest {
        let votes = self
            .poll
            .questions
            .iter()
            .filter_map(|q| {
                self.answers.get(&q.id).map(|&choice_id| VoteEntry {
                    question_id: q.id,
                    choice_id,
                })
            })
            .collect();
        SubmitRequest {
            participant: self.participant.clone(),
            votes,
        }
    }

    pub fn first_unanswered(&self) -> Option<(usize, i32)> {
        self.poll
            .questions
            .iter()
            .enumerate()
            .find(|(_, q)| !self.answers.contains_key(&q.id))
            .map(|(index, q)| (index, q.id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle { message: Option<JoinFailure> },
    Joining { participant: ParticipantInfo },
    Answering(AnsweringState),
    Submitting { form: AnsweringState },
    Confirmed,
    Queued,
}

impl SessionState {
    /// Dead end for this tab; a fresh join is required to start over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Confirmed | SessionState::Queued)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    JoinRequested {
        method: JoinMethod,
        participant: ParticipantInfo,
    },
    PollResolved {
        poll_id: i32,
    },
    JoinFailed(JoinFailure),
    DetailLoaded {
        poll: PollDetail,
        now: DateTime<Utc>,
    },
    AnswerSelected {
        question_id: i32,
        choice_id: i32,
    },
    Tick,
    SubmitRequested,
    SubmitSucceeded,
    SubmitFailedOffline,
    SubmitRejected {
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ResolvePoll { method: JoinMethod },
    FetchDetail { poll_id: i32 },
    SaveMarker { poll_id: i32, participant: ParticipantInfo },
    ClearMarker,
    StartCountdown { seconds: u64 },
    CancelCountdown,
    Submit { poll_id: i32, request: SubmitRequest },
    Enqueue { poll_id: i32, request: SubmitRequest },
}

#[derive(Debug)]
pub struct Step {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

impl Step {
    fn stay(next: SessionState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }
}

/// Pure transition function. The caller supplies `now` inside events that
/// need wall-clock time, so every transition is deterministic.
pub fn step(state: SessionState, event: SessionEvent) -> Step {
    match (state, event) {
        (SessionState::Idle { .. }, SessionEvent::JoinRequested { method, participant }) => {
            if participant.name.trim().is_empty() {
                return Step::stay(SessionState::Idle {
                    message: Some(JoinFailure::NameRequired),
                });
            }
            Step {
                next: SessionState::Joining { participant },
                effects: vec![Effect::ResolvePoll { method }],
            }
        }

        (SessionState::Joining { participant }, SessionEvent::PollResolved { poll_id }) => Step {
            next: SessionState::Joining {
                participant: participant.clone(),
            },
            effects: vec![
                Effect::SaveMarker { poll_id, participant },
                Effect::FetchDetail { poll_id },
            ],
        },

        (SessionState::Joining { .. }, SessionEvent::JoinFailed(failure)) => {
            Step::stay(SessionState::Idle {
                message: Some(failure),
            })
        }

        (SessionState::Joining { participant }, SessionEvent::DetailLoaded { poll, now }) => {
            let remaining = poll
                .end_time
                .map(|end| (end - now).num_seconds().max(0) as u64);
            let mut effects = Vec::new();
            if let Some(seconds) = remaining {
                if seconds > 0 {
                    effects.push(Effect::StartCountdown { seconds });
                }
            }
            Step {
                next: SessionState::Answering(AnsweringState {
                    poll,
                    participant,
                    answers: HashMap::new(),
                    remaining,
                    error: None,
                }),
                effects,
            }
        }

        (
            SessionState::Answering(mut form),
            SessionEvent::AnswerSelected {
                question_id,
                choice_id,
            },
        ) => {
            form.answers.insert(question_id, choice_id);
            form.error = None;
            Step::stay(SessionState::Answering(form))
        }

        (SessionState::Answering(mut form), SessionEvent::Tick) => match form.remaining {
            Some(seconds) if seconds > 1 => {
                form.remaining = Some(seconds - 1);
                Step::stay(SessionState::Answering(form))
            }
            Some(1) => {
                // deadline: submit whatever is answered, exactly once
                form.remaining = Some(0);
                let poll_id = form.poll.id;
                let request = form.request();
                Step {
                    next: SessionState::Submitting { form },
                    effects: vec![Effect::CancelCountdown, Effect::Submit { poll_id, request }],
                }
            }
            _ => Step::stay(SessionState::Answering(form)),
        },

        (SessionState::Answering(mut form), SessionEvent::SubmitRequested) => {
            if let Some((index, question_id)) = form.first_unanswered() {
                form.error = Some(FormError::Unanswered { index, question_id });
                return Step::stay(SessionState::Answering(form));
            }
            form.error = None;
            let poll_id = form.poll.id;
            let request = form.request();
            Step {
                next: SessionState::Submitting { form },
                effects: vec![Effect::CancelCountdown, Effect::Submit { poll_id, request }],
            }
        }

        (SessionState::Submitting { .. }, SessionEvent::SubmitSucceeded) => Step {
            next: SessionState::Confirmed,
            effects: vec![Effect::ClearMarker],
        },

        (SessionState::Submitting { form }, SessionEvent::SubmitFailedOffline) => {
            let poll_id = form.poll.id;
            let request = form.request();
            Step {
                next: SessionState::Queued,
                effects: vec![Effect::Enqueue { poll_id, request }, Effect::ClearMarker],
            }
        }

        (SessionState::Submitting { mut form }, SessionEvent::SubmitRejected { detail }) => {
            form.error = Some(FormError::Rejected { detail });
            let mut effects = Vec::new();
            if let Some(seconds) = form.remaining {
                if seconds > 0 {
                    effects.push(Effect::StartCountdown { seconds });
                }
            }
            Step {
                next: SessionState::Answering(form),
                effects,
            }
        }

        // stray ticks, re-entrant submits while one is in flight, late
        // network callbacks after a terminal state
        (state, event) => {
            debug!(?event, "event ignored in current state");
            Step::stay(state)
        }
    }
}

/// "01:30" style rendering of the countdown.
pub fn format_remaining(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Resumable session marker, tab-scoped: a reload lands straight back in
/// the answer form instead of the join prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub poll_id: i32,
    pub participant: ParticipantInfo,
}

#[derive(Default)]
pub struct SessionStore {
    marker: Mutex<Option<SessionMarker>>,
}

impl SessionStore {
    pub fn save(&self, marker: SessionMarker) {
        *self.lock() = Some(marker);
    }

    pub fn load(&self) -> Option<SessionMarker> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<SessionMarker>> {
        self.marker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct SessionController {
    api: Arc<dyn PollClient>,
    queue: Arc<VoteQueue>,
    store: Arc<SessionStore>,
    connectivity: Connectivity,
    state: SessionState,
    countdown: Option<JoinHandle<()>>,
    ticks_tx: mpsc::UnboundedSender<SessionEvent>,
    ticks_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn PollClient>,
        queue: Arc<VoteQueue>,
        store: Arc<SessionStore>,
        connectivity: Connectivity,
    ) -> Self {
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        Self {
            api,
            queue,
            store,
            connectivity,
            state: SessionState::Idle { message: None },
            countdown: None,
            ticks_tx,
            ticks_rx,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Resume the tab's saved session if there is one, otherwise stay at
    /// the join prompt.
    pub async fn start(&mut self) {
        if let Some(marker) = self.store.load() {
            debug!(poll_id = marker.poll_id, "resuming saved session");
            self.state = SessionState::Joining {
                participant: marker.participant,
            };
            self.handle_event(SessionEvent::PollResolved {
                poll_id: marker.poll_id,
            })
            .await;
        }
    }

    pub async fn join(&mut self, method: JoinMethod, participant: ParticipantInfo) {
        self.handle_event(SessionEvent::JoinRequested {
            method,
            participant,
        })
        .await;
    }

    pub async fn select_answer(&mut self, question_id: i32, choice_id: i32) {
        self.handle_event(SessionEvent::AnswerSelected {
            question_id,
            choice_id,
        })
        .await;
    }

    pub async fn submit(&mut self) {
        self.handle_event(SessionEvent::SubmitRequested).await;
    }

    /// Apply one event plus every follow-up event its effects produce.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let current = mem::replace(&mut self.state, SessionState::Idle { message: None });
            let Step { next, effects } = step(current, event);
            self.state = next;
            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    /// Wait for the next countdown tick and apply it. Only meaningful while
    /// a countdown is running.
    pub async fn process_next(&mut self) -> bool {
        match self.ticks_rx.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::ResolvePoll { method } => Some(self.resolve(&method).await),
            Effect::FetchDetail { poll_id } => Some(self.fetch_detail(poll_id).await),
            Effect::SaveMarker {
                poll_id,
                participant,
            } => {
                self.store.save(SessionMarker {
                    poll_id,
                    participant,
                });
                None
            }
            Effect::ClearMarker => {
                self.store.clear();
                None
            }
            Effect::StartCountdown { seconds } => {
                self.start_countdown(seconds);
                None
            }
            Effect::CancelCountdown => {
                self.cancel_countdown();
                None
            }
            Effect::Submit { poll_id, request } => Some(self.attempt_submit(poll_id, &request).await),
            Effect::Enqueue { poll_id, request } => {
                if let Err(e) = self.queue.enqueue(poll_id, request).await {
                    warn!("failed to persist queued submission: {e}");
                }
                None
            }
        }
    }

    fn start_countdown(&mut self, seconds: u64) {
        self.cancel_countdown();
        let ticks = self.ticks_tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await; // first tick completes immediately
            for _ in 0..seconds {
                interval.tick().await;
                if ticks.send(SessionEvent::Tick).is_err() {
                    return;
                }
            }
        });
        self.countdown = Some(handle);
    }

    fn cancel_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    async fn resolve(&self, method: &JoinMethod) -> SessionEvent {
        match method {
            JoinMethod::Active { poll_type } => match self.api.active_polls(*poll_type).await {
                Ok(polls) => match polls.into_iter().next() {
                    Some(poll) => SessionEvent::PollResolved { poll_id: poll.id },
                    None => SessionEvent::JoinFailed(JoinFailure::NotFound),
                },
                Err(err) => SessionEvent::JoinFailed(Self::join_failure(err)),
            },
            JoinMethod::Title { title, poll_type } => {
                match self.api.find_by_title(title, *poll_type).await {
                    Ok(Some(poll)) => SessionEvent::PollResolved { poll_id: poll.id },
                    Ok(None) => Self::status_failure(self.api.status_by_title(title).await),
                    Err(err) => SessionEvent::JoinFailed(Self::join_failure(err)),
                }
            }
            JoinMethod::Slug {
                slug,
                poll_type: Some(poll_type),
            } => match self.api.find_by_slug(slug, Some(*poll_type)).await {
                Ok(Some(poll)) => SessionEvent::PollResolved { poll_id: poll.id },
                Ok(None) => Self::status_failure(self.api.status_by_slug(slug).await),
                Err(err) => SessionEvent::JoinFailed(Self::join_failure(err)),
            },
            JoinMethod::Slug {
                slug,
                poll_type: None,
            } => {
                for poll_type in PollType::SLUG_FALLBACK_ORDER {
                    match self.api.find_by_slug(slug, Some(poll_type)).await {
                        Ok(Some(poll)) => {
                            return SessionEvent::PollResolved { poll_id: poll.id }
                        }
                        Ok(None) => {}
                        Err(err) => return SessionEvent::JoinFailed(Self::join_failure(err)),
                    }
                }
                Self::status_failure(self.api.status_by_slug(slug).await)
            }
        }
    }

    /// Word the prompt message from the status probe: closed-but-known polls
    /// read differently from ones that never existed.
    fn status_failure(status: Result<PollStatus, ApiError>) -> SessionEvent {
        match status {
            Ok(status) if status.exists => SessionEvent::JoinFailed(JoinFailure::Closed {
                title: status.title.unwrap_or_default(),
            }),
            Ok(_) => SessionEvent::JoinFailed(JoinFailure::NotFound),
            Err(_) => SessionEvent::JoinFailed(JoinFailure::NotFound),
        }
    }

    fn join_failure(err: ApiError) -> JoinFailure {
        if err.is_connectivity() {
            JoinFailure::Unreachable
        } else {
            JoinFailure::NotFound
        }
    }

    async fn fetch_detail(&self, poll_id: i32) -> SessionEvent {
        match self.api.poll_detail(poll_id).await {
            Ok(Some(poll)) => SessionEvent::DetailLoaded {
                poll,
                now: Utc::now(),
            },
            Ok(None) => SessionEvent::JoinFailed(JoinFailure::NotFound),
            Err(err) if err.is_connectivity() => {
                SessionEvent::JoinFailed(JoinFailure::Unreachable)
            }
            Err(ApiError::Rejected { code, .. }) if code == "poll_closed" => {
                SessionEvent::JoinFailed(JoinFailure::Closed {
                    title: String::new(),
                })
            }
            Err(_) => SessionEvent::JoinFailed(JoinFailure::NotFound),
        }
    }

    async fn attempt_submit(&self, poll_id: i32, request: &SubmitRequest) -> SessionEvent {
        if !self.connectivity.is_online() {
            debug!("offline before submit, queueing directly");
            return SessionEvent::SubmitFailedOffline;
        }
        match self.api.submit(poll_id, request).await {
            Ok(_) => SessionEvent::SubmitSucceeded,
            Err(err) if err.is_connectivity() => SessionEvent::SubmitFailedOffline,
            Err(err) => SessionEvent::SubmitRejected {
                detail: err.to_string(),
            },
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel_countdown();
    }
}
