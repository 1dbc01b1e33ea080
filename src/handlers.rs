// handlers.rs
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

use crate::error::AppError;
use crate::models::{
    ChoiceRead, ChoiceRow, Poll, PollDetail, PollStatus, PollSummary, QuestionRead, QuestionRow,
    SubmitAccepted, SubmitRequest,
};
use crate::votes;

#[derive(Deserialize)]
pub struct TypeParams {
    #[serde(rename = "type")]
    pub poll_type: Option<String>,
}

#[derive(Deserialize)]
pub struct TitleParams {
    pub title: String,
    #[serde(rename = "type")]
    pub poll_type: Option<String>,
}

#[derive(Deserialize)]
pub struct SlugParams {
    pub slug: String,
    #[serde(rename = "type")]
    pub poll_type: Option<String>,
}

/// List currently joinable polls, optionally narrowed to one type.
pub async fn get_active_polls(
    State(pool): State<PgPool>,
    Query(params): Query<TypeParams>,
) -> Result<Json<Vec<PollSummary>>, AppError> {
    let polls: Vec<PollSummary> = sqlx::query_as(
        "SELECT id, title, poll_type FROM polls \
         WHERE is_active = TRUE AND archived = FALSE \
           AND ($1::TEXT IS NULL OR poll_type = $1) \
         ORDER BY id",
    )
    .bind(params.poll_type.as_deref())
    .fetch_all(&pool)
    .await?;

    Ok(Json(polls))
}

/// Resolve an active poll by human title (case-insensitive).
pub async fn get_poll_by_title(
    State(pool): State<PgPool>,
    Query(params): Query<TitleParams>,
) -> Result<Json<PollSummary>, AppError> {
    let poll: Option<PollSummary> = sqlx::query_as(
        "SELECT id, title, poll_type FROM polls \
         WHERE is_active = TRUE AND archived = FALSE \
           AND LOWER(title) = LOWER($1) \
           AND ($2::TEXT IS NULL OR poll_type = $2) \
         LIMIT 1",
    )
    .bind(&params.title)
    .bind(params.poll_type.as_deref())
    .fetch_optional(&pool)
    .await?;

    poll.map(Json).ok_or(AppError::NotFound)
}

/// Resolve an active poll by its join-code slug.
pub async fn get_poll_by_slug(
    State(pool): State<PgPool>,
    Query(params): Query<SlugParams>,
) -> Result<Json<PollSummary>, AppError> {
    let poll: Option<PollSummary> = sqlx::query_as(
        "SELECT id, title, poll_type FROM polls \
         WHERE is_active = TRUE AND archived = FALSE \
           AND slug = $1 \
           AND ($2::TEXT IS NULL OR poll_type = $2) \
         LIMIT 1",
    )
    .bind(&params.slug)
    .bind(params.poll_type.as_deref())
    .fetch_optional(&pool)
    .await?;

    poll.map(Json).ok_or(AppError::NotFound)
}

/// Existence probe by title; always 200 so the client can word its message.
pub async fn get_status_by_title(
    State(pool): State<PgPool>,
    Query(params): Query<TitleParams>,
) -> Result<Json<PollStatus>, AppError> {
    let row: Option<(String, String, bool, bool)> = sqlx::query_as(
        "SELECT title, poll_type, is_active, archived FROM polls \
         WHERE LOWER(title) = LOWER($1) \
         ORDER BY is_active DESC, archived ASC \
         LIMIT 1",
    )
    .bind(&params.title)
    .fetch_optional(&pool)
    .await?;

    Ok(Json(status_from_row(row)))
}

/// Existence probe by slug; always 200 so the client can word its message.
pub async fn get_status_by_slug(
    State(pool): State<PgPool>,
    Query(params): Query<SlugParams>,
) -> Result<Json<PollStatus>, AppError> {
    let row: Option<(String, String, bool, bool)> = sqlx::query_as(
        "SELECT title, poll_type, is_active, archived FROM polls \
         WHERE slug = $1 \
         ORDER BY is_active DESC, archived ASC \
         LIMIT 1",
    )
    .bind(&params.slug)
    .fetch_optional(&pool)
    .await?;

    Ok(Json(status_from_row(row)))
}

fn status_from_row(row: Option<(String, String, bool, bool)>) -> PollStatus {
    match row {
        Some((title, poll_type, is_active, archived)) => PollStatus {
            exists: true,
            is_active,
            archived,
            title: Some(title),
            poll_type: Some(poll_type),
        },
        None => PollStatus::missing(),
    }
}

/// Full attendee view of one open poll: ordered questions with choices.
pub async fn get_poll_detail(
    State(pool): State<PgPool>,
    Path(poll_id): Path<i32>,
) -> Result<Json<PollDetail>, AppError> {
    let poll: Option<Poll> = sqlx::query_as(
        "SELECT id, title, description, slug, poll_type, is_active, archived, start_time, end_time \
         FROM polls WHERE id = $1",
    )
    .bind(poll_id)
    .fetch_optional(&pool)
    .await?;

    let poll = poll.ok_or(AppError::NotFound)?;
    if !poll.is_open(Utc::now()) {
        return Err(AppError::PollClosed);
    }

    let question_rows: Vec<QuestionRow> =
        sqlx::query_as("SELECT id, text FROM questions WHERE poll_id = $1 ORDER BY id")
            .bind(poll_id)
            .fetch_all(&pool)
            .await?;

    let mut questions = Vec::with_capacity(question_rows.len());
    for question in question_rows {
        let choices: Vec<ChoiceRow> =
            sqlx::query_as("SELECT id, text FROM choices WHERE question_id = $1 ORDER BY id")
                .bind(question.id)
                .fetch_all(&pool)
                .await?;

        questions.push(QuestionRead {
            id: question.id,
            text: question.text,
            choices: choices
                .into_iter()
                .map(|c| ChoiceRead { id: c.id, text: c.text })
                .collect(),
        });
    }

    Ok(Json(PollDetail {
        id: poll.id,
        title: poll.title,
        description: poll.description,
        end_time: poll.end_time,
        questions,
    }))
}

/// Accept a participant's full answer set.
pub async fn submit_votes(
    State(pool): State<PgPool>,
    Path(poll_id): Path<i32>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitAccepted>), AppError> {
    let accepted = votes::submit(&pool, poll_id, &request).await?;
    info!(poll_id, accepted, "recorded submission");
    Ok((StatusCode::CREATED, Json(SubmitAccepted { accepted })))
}
