// src/votes.rs
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::AppError;
use crate::models::{Poll, SubmitRequest};

/// Record a full answer set in one atomic unit.
///
/// Participant creation and every vote insertion share one transaction, so a
/// rejected ballot leaves no trace. The `(participant_id, question_id)`
/// unique index is the duplicate gate: a retried delivery of the same payload
/// trips it and the whole unit rolls back as [`AppError::AlreadySubmitted`].
pub async fn submit(pool: &PgPool, poll_id: i32, request: &SubmitRequest) -> Result<usize, AppError> {
    if request.votes.is_empty() {
        return Err(AppError::EmptyBallot);
    }

    let mut tx = pool.begin().await?;

    let poll: Option<Poll> = sqlx::query_as(
        "SELECT id, title, description, slug, poll_type, is_active, archived, start_time, end_time \
         FROM polls WHERE id = $1",
    )
    .bind(poll_id)
    .fetch_optional(&mut *tx)
    .await?;

    let poll = poll.ok_or(AppError::NotFound)?;
    if !poll.is_open(Utc::now()) {
        return Err(AppError::PollClosed);
    }

    for vote in &request.votes {
        let belongs: Option<(i32,)> = sqlx::query_as(
            "SELECT c.id FROM choices c \
             JOIN questions q ON q.id = c.question_id \
             WHERE c.id = $1 AND q.id = $2 AND q.poll_id = $3",
        )
        .bind(vote.choice_id)
        .bind(vote.question_id)
        .bind(poll_id)
        .fetch_optional(&mut *tx)
        .await?;

        if belongs.is_none() {
            return Err(AppError::InvalidChoice {
                question_id: vote.question_id,
                choice_id: vote.choice_id,
            });
        }
    }

    let participant_id = resolve_participant(&mut tx, poll_id, request).await?;

    let mut accepted = 0;
    for vote in &request.votes {
        let inserted = sqlx::query(
            "INSERT INTO votes (participant_id, question_id, choice_id) VALUES ($1, $2, $3)",
        )
        .bind(participant_id)
        .bind(vote.question_id)
        .bind(vote.choice_id)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => accepted += 1,
            Err(e) if is_unique_violation(&e) => {
                debug!(participant_id, question_id = vote.question_id, "duplicate delivery");
                return Err(AppError::AlreadySubmitted);
            }
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit().await?;
    Ok(accepted)
}

/// Reuse the participant row for an identical identity within the poll, so a
/// redelivered payload lands on the same row and the vote index can reject it.
async fn resolve_participant(
    tx: &mut Transaction<'_, Postgres>,
    poll_id: i32,
    request: &SubmitRequest,
) -> Result<i32, AppError> {
    let existing: Option<(i32,)> = sqlx::query_as(
        "SELECT id FROM participants \
         WHERE poll_id = $1 AND name = $2 \
           AND company IS NOT DISTINCT FROM $3 \
           AND email IS NOT DISTINCT FROM $4",
    )
    .bind(poll_id)
    .bind(&request.participant.name)
    .bind(request.participant.company.as_deref())
    .bind(request.participant.email.as_deref())
    .fetch_optional(&mut **tx)
    .await?;

    if let Some((id,)) = existing {
        return Ok(id);
    }

    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO participants (poll_id, name, company, email) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(poll_id)
    .bind(&request.participant.name)
    .bind(request.participant.company.as_deref())
    .bind(request.participant.email.as_deref())
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
