// src/client/mod.rs
//! Attendee-side participation pipeline.
//!
//! Four cooperating actors, wired by channels rather than shared state:
//! the [`cache::CacheWorker`] keeps the UI and poll reads loadable offline,
//! the [`queue::VoteQueue`] durably holds completed-but-unsent submissions,
//! the [`sync::SyncTrigger`] drains the queue on connectivity and wake-up
//! signals, and the [`session::SessionController`] runs one tab's join →
//! answer → countdown → submit lifecycle.

pub mod api;
pub mod cache;
pub mod queue;
pub mod session;
pub mod sync;

pub use api::{ApiError, HttpNetwork, PollApi, PollClient};
pub use cache::{CacheStorage, CacheWorker, CachedResponse, Network, Request, TabMessage, WorkerSignal};
pub use queue::{QueuedSubmission, VoteQueue};
pub use session::{
    format_remaining, JoinFailure, JoinMethod, SessionController, SessionMarker, SessionState,
    SessionStore,
};
pub use sync::{Connectivity, NoBackgroundSync, Notice, SyncRegistration, SyncTrigger};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::models::{
        ChoiceRead, ParticipantInfo, PollDetail, PollStatus, PollSummary, PollType, QuestionRead,
        SubmitAccepted, SubmitRequest, VoteEntry,
    };

    use super::api::{ApiError, PollClient};
    use super::cache::{CachedResponse, FetchError, Network, Request};

    pub fn participant(name: &str) -> ParticipantInfo {
        ParticipantInfo {
            name: name.into(),
            company: None,
            email: None,
        }
    }

    pub fn summary(id: i32, title: &str) -> PollSummary {
        PollSummary {
            id,
            title: title.into(),
            poll_type: "trivia".into(),
        }
    }

    pub fn detail(id: i32, questions: &[(i32, &[i32])]) -> PollDetail {
        PollDetail {
            id,
            title: format!("poll {id}"),
            description: None,
            end_time: None,
            questions: questions
                .iter()
                .map(|(question_id, choices)| QuestionRead {
                    id: *question_id,
                    text: format!("question {question_id}"),
                    choices: choices
                        .iter()
                        .map(|choice_id| ChoiceRead {
                            id: *choice_id,
                            text: format!("choice {choice_id}"),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn ballot(name: &str) -> SubmitRequest {
        SubmitRequest {
            participant: participant(name),
            votes: vec![VoteEntry {
                question_id: 1,
                choice_id: 10,
            }],
        }
    }

    /// Transport that is always unreachable.
    pub struct NullNetwork;

    #[async_trait]
    impl Network for NullNetwork {
        async fn fetch(&self, _request: &Request) -> Result<CachedResponse, FetchError> {
            Err(FetchError("no network in this test".into()))
        }
    }

    /// Scriptable in-memory poll service.
    #[derive(Default)]
    pub struct FakePollClient {
        pub active: Mutex<HashMap<String, Vec<PollSummary>>>,
        pub by_title: Mutex<HashMap<String, PollSummary>>,
        pub by_slug: Mutex<HashMap<(String, Option<String>), PollSummary>>,
        pub statuses: Mutex<HashMap<String, PollStatus>>,
        pub details: Mutex<HashMap<i32, PollDetail>>,
        /// Scripted submit outcomes, consumed front to back; once empty every
        /// submit succeeds.
        pub submit_outcomes: Mutex<VecDeque<Result<SubmitAccepted, ApiError>>>,
        pub submits: Mutex<Vec<(i32, SubmitRequest)>>,
        /// Audit trail of lookup calls, for ordering assertions.
        pub lookups: Mutex<Vec<String>>,
    }

    impl FakePollClient {
        pub fn submit_count(&self) -> usize {
            self.submits.lock().unwrap().len()
        }

        fn record(&self, call: String) {
            self.lookups.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl PollClient for FakePollClient {
        async fn active_polls(&self, poll_type: PollType) -> Result<Vec<PollSummary>, ApiError> {
            self.record(format!("active:{poll_type}"));
            Ok(self
                .active
                .lock()
                .unwrap()
                .get(poll_type.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn find_by_title(
            &self,
            title: &str,
            poll_type: Option<PollType>,
        ) -> Result<Option<PollSummary>, ApiError> {
            let kind = poll_type.map_or("any", |t| t.as_str());
            self.record(format!("title:{title}:{kind}"));
            Ok(self.by_title.lock().unwrap().get(title).cloned())
        }

        async fn find_by_slug(
            &self,
            slug: &str,
            poll_type: Option<PollType>,
        ) -> Result<Option<PollSummary>, ApiError> {
            let kind = poll_type.map_or("any", |t| t.as_str());
            self.record(format!("slug:{slug}:{kind}"));
            let key = (slug.to_string(), poll_type.map(|t| t.as_str().to_string()));
            Ok(self.by_slug.lock().unwrap().get(&key).cloned())
        }

        async fn status_by_title(&self, title: &str) -> Result<PollStatus, ApiError> {
            self.record(format!("status-title:{title}"));
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .get(title)
                .cloned()
                .unwrap_or_else(PollStatus::missing))
        }

        async fn status_by_slug(&self, slug: &str) -> Result<PollStatus, ApiError> {
            self.record(format!("status-slug:{slug}"));
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .get(slug)
                .cloned()
                .unwrap_or_else(PollStatus::missing))
        }

        async fn poll_detail(&self, poll_id: i32) -> Result<Option<PollDetail>, ApiError> {
            Ok(self.details.lock().unwrap().get(&poll_id).cloned())
        }

        async fn submit(
            &self,
            poll_id: i32,
            request: &SubmitRequest,
        ) -> Result<SubmitAccepted, ApiError> {
            self.submits.lock().unwrap().push((poll_id, request.clone()));
            if let Some(outcome) = self.submit_outcomes.lock().unwrap().pop_front() {
                return outcome;
            }
            Ok(SubmitAccepted {
                accepted: request.votes.len(),
            })
        }
    }
}
