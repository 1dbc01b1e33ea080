// models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session kind tag carried by every poll row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    Trivia,
    Survey,
    Poll,
}

impl PollType {
    /// Order in which the kinds are tried when a join arrives via a bare
    /// slug with no explicit type.
    pub const SLUG_FALLBACK_ORDER: [PollType; 3] =
        [PollType::Trivia, PollType::Survey, PollType::Poll];

    pub fn as_str(&self) -> &'static str {
        match self {
            PollType::Trivia => "trivia",
            PollType::Survey => "survey",
            PollType::Poll => "poll",
        }
    }
}

impl fmt::Display for PollType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trivia" => Ok(PollType::Trivia),
            "survey" => Ok(PollType::Survey),
            "poll" => Ok(PollType::Poll),
            other => Err(format!("unknown poll type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poll {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub poll_type: String,
    pub is_active: bool,
    pub archived: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Poll {
    /// A poll accepts submissions only while activated, not archived, and
    /// inside its optional start/end window.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && !self.archived
            && self.start_time.map_or(true, |start| now >= start)
            && self.end_time.map_or(true, |end| now < end)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuestionRow {
    pub id: i32,
    pub text: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChoiceRow {
    pub id: i32,
    pub text: String,
}

/// Compact poll reference returned by the lookup endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollSummary {
    pub id: i32,
    pub title: String,
    pub poll_type: String,
}

/// Existence probe used for friendly "closed vs never existed" messaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    pub exists: bool,
    pub is_active: bool,
    pub archived: bool,
    pub title: Option<String>,
    pub poll_type: Option<String>,
}

impl PollStatus {
    pub fn missing() -> Self {
        Self {
            exists: false,
            is_active: false,
            archived: false,
            title: None,
            poll_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRead {
    pub id: i32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRead {
    pub id: i32,
    pub text: String,
    pub choices: Vec<ChoiceRead>,
}

/// Everything an attendee needs to render and answer one poll. Correctness
/// flags on choices are intentionally absent from this view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollDetail {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionRead>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEntry {
    pub question_id: i32,
    pub choice_id: i32,
}

/// Body of `POST /poll/{id}/submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub participant: ParticipantInfo,
    pub votes: Vec<VoteEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAccepted {
    pub accepted: usize,
}
