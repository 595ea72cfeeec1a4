// src/handlers/questions.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{engine::ExamEngine, error::AppError, models::question::QuestionId};

/// Question text, options and images. The answer is never included.
pub async fn get_question(
    State(engine): State<Arc<ExamEngine>>,
    Path(question_id): Path<QuestionId>,
) -> Result<impl IntoResponse, AppError> {
    let question = engine.question_details(question_id).await?;
    Ok(Json(question))
}

pub async fn get_answer(
    State(engine): State<Arc<ExamEngine>>,
    Path(question_id): Path<QuestionId>,
) -> Result<impl IntoResponse, AppError> {
    let key = engine.answer_key(question_id).await?;
    Ok(Json(key))
}
