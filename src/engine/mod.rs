// src/engine/mod.rs

//! The exam engine: test generation, answer submission, scoring and the
//! read side, all behind the store traits so the same flows run against
//! PostgreSQL or the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::{
    config::Config,
    error::AppError,
    models::{
        proficiency::{StudentProficiency, TestHistoryEntry},
        question::{AnswerKey, PublicQuestion, QuestionId},
        test_instance::{PaperSection, StudentId, TestInstanceId, TestPaper, TestSummary, TestType},
    },
    store::{QuestionRepository, TestRepository, UsedQuestionCache},
};

pub mod builder;
pub mod evaluator;
pub mod generator;
pub mod report;
pub mod scoring;
pub mod selector;
pub mod submission;

pub use builder::{IdentifierAllocator, RandomIdentifierAllocator};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Number of recent tests the per-type proficiency is averaged over.
    pub recent_tests_window: usize,
    pub max_id_attempts: usize,
    /// Fixed seed for reproducible selection. Entropy-seeded when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recent_tests_window: 5,
            max_id_attempts: 8,
            rng_seed: None,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            recent_tests_window: config.recent_tests_window.max(1),
            max_id_attempts: config.id_max_attempts.max(1),
            rng_seed: None,
        }
    }
}

pub struct ExamEngine {
    questions: Arc<dyn QuestionRepository>,
    tests: Arc<dyn TestRepository>,
    used: Arc<dyn UsedQuestionCache>,
    ids: Arc<dyn IdentifierAllocator>,
    settings: EngineSettings,
    draws: AtomicU64,
}

impl ExamEngine {
    pub fn new(
        questions: Arc<dyn QuestionRepository>,
        tests: Arc<dyn TestRepository>,
        used: Arc<dyn UsedQuestionCache>,
        ids: Arc<dyn IdentifierAllocator>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            questions,
            tests,
            used,
            ids,
            settings,
            draws: AtomicU64::new(0),
        }
    }

    /// Builds an engine whose three persistence seams share one store.
    pub fn with_store<S>(
        store: Arc<S>,
        ids: Arc<dyn IdentifierAllocator>,
        settings: EngineSettings,
    ) -> Self
    where
        S: QuestionRepository + TestRepository + UsedQuestionCache + 'static,
    {
        Self::new(store.clone(), store.clone(), store, ids, settings)
    }

    /// A fresh generator per call. Seeded engines still vary between calls.
    fn rng(&self) -> StdRng {
        match self.settings.rng_seed {
            Some(seed) => {
                let draw = self.draws.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed.wrapping_add(draw))
            }
            None => StdRng::from_entropy(),
        }
    }

    pub async fn list_tests(&self, student_id: StudentId) -> Result<Vec<TestSummary>, AppError> {
        self.tests.list_tests(student_id).await
    }

    /// Assigned question ids of an instance, grouped by part and section in
    /// assignment order.
    pub async fn test_paper(
        &self,
        student_id: StudentId,
        instance_id: TestInstanceId,
    ) -> Result<TestPaper, AppError> {
        let instance = self
            .tests
            .find_instance(instance_id, student_id)
            .await?
            .ok_or(AppError::TestInstanceNotFound(instance_id))?;

        let assignments = self.tests.assignments(instance.test_id).await?;

        let mut sections: Vec<PaperSection> = Vec::new();
        for a in assignments {
            match sections.last_mut() {
                Some(last) if last.part == a.part && last.section == a.section => {
                    last.question_ids.push(a.question_id);
                }
                _ => sections.push(PaperSection {
                    part: a.part,
                    section: a.section,
                    question_ids: vec![a.question_id],
                }),
            }
        }

        Ok(TestPaper {
            test_instance_id: instance.id,
            test_type: instance.test_type,
            sections,
        })
    }

    pub async fn history(&self, student_id: StudentId) -> Result<Vec<TestHistoryEntry>, AppError> {
        self.tests.history(student_id).await
    }

    pub async fn proficiency(&self, student_id: StudentId) -> Result<StudentProficiency, AppError> {
        self.tests.proficiency(student_id).await
    }

    pub async fn question_details(&self, question_id: QuestionId) -> Result<PublicQuestion, AppError> {
        self.questions
            .question_details(question_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Question {} not found", question_id)))
    }

    pub async fn answer_key(&self, question_id: QuestionId) -> Result<AnswerKey, AppError> {
        self.questions
            .answer_key(question_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Question {} not found", question_id)))
    }

    /// Forgets served questions for one test type, or all of them.
    pub async fn clear_used(
        &self,
        student_id: StudentId,
        test_type: Option<TestType>,
    ) -> Result<(), AppError> {
        self.used.clear_used(student_id, test_type).await?;
        tracing::info!(
            "Cleared used questions for student {} ({})",
            student_id,
            test_type.map_or("all types", TestType::as_str)
        );
        Ok(())
    }
}
