// src/store/mod.rs

//! Persistence seams of the engine.
//!
//! `PgStore` is the production implementation. `MemoryStore` keeps the same
//! contracts in process and backs the test suite and local demos.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{
        proficiency::{
            ChapterResponseTally, ScoredTest, StudentProficiency, StudentTarget, TestHistoryEntry,
        },
        question::{AnswerKey, Candidate, PublicQuestion, QuestionId},
        response::{ResponseInput, ScoringRow},
        syllabus::{ChapterWeights, QuestionScope},
        test_instance::{
            AssignedAnswer, NewTest, QuestionAssignment, StudentId, TestId, TestInstance,
            TestInstanceId, TestPart, TestSummary, TestType,
        },
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read-only access to the question bank.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Active questions of active chapters (and active or absent subtopics) in scope,
    /// ordered by question id.
    async fn candidates(&self, scope: &QuestionScope) -> Result<Vec<Candidate>, AppError>;

    /// Current weights of the active chapters in scope.
    async fn chapter_weights(&self, scope: &QuestionScope) -> Result<ChapterWeights, AppError>;

    async fn question_details(&self, question_id: QuestionId)
    -> Result<Option<PublicQuestion>, AppError>;

    async fn answer_key(&self, question_id: QuestionId) -> Result<Option<AnswerKey>, AppError>;
}

/// Tests, responses, history and proficiency.
#[async_trait]
pub trait TestRepository: Send + Sync {
    /// Writes header, parts, assignments and instance in one transaction.
    /// Fails with `DuplicateIdentifier` if either id is already taken.
    async fn create_test(&self, test: &NewTest) -> Result<(), AppError>;

    async fn find_instance(
        &self,
        instance_id: TestInstanceId,
        student_id: StudentId,
    ) -> Result<Option<TestInstance>, AppError>;

    /// Assignments ordered by position.
    async fn assignments(&self, test_id: TestId) -> Result<Vec<QuestionAssignment>, AppError>;

    /// Upserts responses and marks `part` complete in one transaction.
    /// Returns whether every part of the test is now complete.
    async fn record_responses(
        &self,
        instance: &TestInstance,
        part: TestPart,
        responses: &[ResponseInput],
    ) -> Result<bool, AppError>;

    async fn is_completed(&self, test_id: TestId) -> Result<bool, AppError>;

    async fn part_completed(&self, test_id: TestId, part: TestPart) -> Result<bool, AppError>;

    /// Canonical answers of every assigned question, ordered by position.
    async fn assigned_answers(&self, test_id: TestId) -> Result<Vec<AssignedAnswer>, AppError>;

    /// Responses of the instance joined with answers, syllabus and assignment data,
    /// ordered by assignment position.
    async fn scoring_rows(&self, instance: &TestInstance) -> Result<Vec<ScoringRow>, AppError>;

    /// Persists a scored test in one transaction: response flags, history upsert,
    /// proficiency counters on first scoring, and the rolling per-type proficiency
    /// over the newest `window` tests.
    async fn commit_score(&self, scored: &ScoredTest, window: usize) -> Result<(), AppError>;

    async fn list_tests(&self, student_id: StudentId) -> Result<Vec<TestSummary>, AppError>;

    async fn history(&self, student_id: StudentId) -> Result<Vec<TestHistoryEntry>, AppError>;

    async fn proficiency(&self, student_id: StudentId) -> Result<StudentProficiency, AppError>;

    /// Correct and incorrect flags of every scored response of the student,
    /// grouped by chapter. Skipped and unscored responses are left out.
    async fn chapter_response_tallies(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<ChapterResponseTally>, AppError>;

    /// Inserts or replaces the student's target score.
    async fn set_target(
        &self,
        student_id: StudentId,
        target_score: i32,
    ) -> Result<StudentTarget, AppError>;

    async fn target(&self, student_id: StudentId) -> Result<Option<StudentTarget>, AppError>;
}

/// Per (student, test type) record of questions already served.
/// Callers treat failures as an empty history.
#[async_trait]
pub trait UsedQuestionCache: Send + Sync {
    async fn get_used(
        &self,
        student_id: StudentId,
        test_type: TestType,
    ) -> Result<HashSet<QuestionId>, AppError>;

    /// Replaces the stored set.
    async fn set_used(
        &self,
        student_id: StudentId,
        test_type: TestType,
        questions: &HashSet<QuestionId>,
    ) -> Result<(), AppError>;

    /// Clears one test type, or every type when `test_type` is `None`.
    async fn clear_used(
        &self,
        student_id: StudentId,
        test_type: Option<TestType>,
    ) -> Result<(), AppError>;
}
