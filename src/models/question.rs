// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::models::syllabus::{ChapterId, SubtopicId};

pub type QuestionId = i64;

/// Represents the 'questions' table in the database.
/// Authored outside the engine; tests only reference questions by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub chapter_id: ChapterId,
    pub subtopic_id: Option<SubtopicId>,

    /// The text content of the question.
    pub question: String,

    pub options: QuestionOptions,

    /// Canonical answer. Either a single option, a comma-separated list of
    /// acceptable options, or `na` for questions that are always marked correct.
    pub answer: String,

    pub explanation: Option<String>,

    pub images: Vec<QuestionImage>,

    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionOptions {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

/// Image attached to a question. `content_type` is one of `QUE`, `OptionA`..`OptionD`
/// for the question body, or `EXP` for the explanation.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct QuestionImage {
    pub url: String,
    pub content_type: String,
}

impl QuestionImage {
    pub fn is_explanation(&self) -> bool {
        self.content_type == "EXP"
    }
}

/// A question eligible for selection together with its owning chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct Candidate {
    pub question_id: QuestionId,
    pub chapter_id: ChapterId,
}

/// DTO for sending a question to the client (excludes answer and explanation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicQuestion {
    pub id: QuestionId,
    pub question: String,
    pub options: QuestionOptions,
    pub images: Vec<QuestionImage>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            question: q.question.clone(),
            options: q.options.clone(),
            images: q
                .images
                .iter()
                .filter(|i| !i.is_explanation())
                .cloned()
                .collect(),
        }
    }
}

/// DTO for revealing the answer after a test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerKey {
    pub question_id: QuestionId,
    pub answer: String,
    pub explanation: Option<String>,
    pub image_url: Option<String>,
}

impl From<&Question> for AnswerKey {
    fn from(q: &Question) -> Self {
        Self {
            question_id: q.id,
            answer: q.answer.clone(),
            explanation: q.explanation.clone(),
            image_url: q
                .images
                .iter()
                .find(|i| i.is_explanation())
                .map(|i| i.url.clone()),
        }
    }
}
