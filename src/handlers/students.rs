// src/handlers/students.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use validator::Validate;

use crate::{
    engine::ExamEngine,
    error::AppError,
    models::{
        proficiency::SetTargetRequest,
        test_instance::{ClearUsedParams, StudentId},
    },
};

pub async fn list_tests(
    State(engine): State<Arc<ExamEngine>>,
    Path(student_id): Path<StudentId>,
) -> Result<impl IntoResponse, AppError> {
    let tests = engine.list_tests(student_id).await?;
    Ok(Json(tests))
}

pub async fn get_history(
    State(engine): State<Arc<ExamEngine>>,
    Path(student_id): Path<StudentId>,
) -> Result<impl IntoResponse, AppError> {
    let history = engine.history(student_id).await?;
    Ok(Json(history))
}

/// Chapter, subtopic and per-test-type proficiency of a student.
pub async fn get_proficiency(
    State(engine): State<Arc<ExamEngine>>,
    Path(student_id): Path<StudentId>,
) -> Result<impl IntoResponse, AppError> {
    let proficiency = engine.proficiency(student_id).await?;
    Ok(Json(proficiency))
}

/// Per-subject chapter strengths and weaknesses from every scored answer.
pub async fn get_chapter_report(
    State(engine): State<Arc<ExamEngine>>,
    Path(student_id): Path<StudentId>,
) -> Result<impl IntoResponse, AppError> {
    let report = engine.chapter_report(student_id).await?;
    Ok(Json(report))
}

pub async fn set_target(
    State(engine): State<Arc<ExamEngine>>,
    Path(student_id): Path<StudentId>,
    Json(payload): Json<SetTargetRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let target = engine.set_target(student_id, payload.target_score).await?;
    Ok(Json(target))
}

pub async fn get_target(
    State(engine): State<Arc<ExamEngine>>,
    Path(student_id): Path<StudentId>,
) -> Result<impl IntoResponse, AppError> {
    let target = engine.target(student_id).await?;
    Ok(Json(target))
}

/// Lets previously served questions be drawn as fresh again.
pub async fn clear_used_questions(
    State(engine): State<Arc<ExamEngine>>,
    Path(student_id): Path<StudentId>,
    Query(params): Query<ClearUsedParams>,
) -> Result<impl IntoResponse, AppError> {
    engine.clear_used(student_id, params.test_type).await?;
    Ok(StatusCode::NO_CONTENT)
}
