// src/models/response.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    question::QuestionId,
    syllabus::{ChapterId, PaperSubject, Subject, SubtopicId},
    test_instance::{Section, StudentId, TestInstanceId, TestPart},
};

/// Outcome of comparing one response against the canonical answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Correct,
    Incorrect,
    Skipped,
}

impl Verdict {
    pub fn is_attempted(self) -> bool {
        !matches!(self, Verdict::Skipped)
    }

    /// Value stored in `student_responses.answer_correct`.
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Verdict::Correct => Some(true),
            Verdict::Incorrect => Some(false),
            Verdict::Skipped => None,
        }
    }
}

/// A single answer as sent by the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerInput {
    pub answer: Option<String>,
    /// Seconds spent on the question.
    pub time: Option<i32>,
}

/// DTO for submitting answers for a test, or one subject of a practice test.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswersRequest {
    pub student_id: StudentId,

    /// Required for practice tests, ignored otherwise.
    pub subject: Option<PaperSubject>,

    /// Key: Question ID
    pub answers: HashMap<QuestionId, AnswerInput>,
}

/// Which part of a test a submission completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionScope {
    Paper(PaperSubject),
    Whole,
}

/// Normalised response ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseInput {
    pub question_id: QuestionId,
    pub response: String,
    pub answering_time_seconds: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionAck {
    pub test_instance_id: TestInstanceId,
    pub part: TestPart,
    pub responses_recorded: usize,
    pub test_completed: bool,
}

/// A stored response joined with everything needed to score it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRow {
    pub question_id: QuestionId,
    pub chapter_id: ChapterId,
    pub subtopic_id: Option<SubtopicId>,
    pub subject: Subject,
    pub section: Option<Section>,
    pub position: i32,
    pub response: String,
    pub answer: String,
    pub answering_time_seconds: i32,
    pub response_date: DateTime<Utc>,
}
