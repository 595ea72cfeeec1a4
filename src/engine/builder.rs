// src/engine/builder.rs

use std::collections::HashSet;
use std::ops::RangeInclusive;

use rand::Rng;

use crate::{
    engine::ExamEngine,
    error::AppError,
    models::test_instance::{
        NewTest, QuestionAssignment, StudentId, TestInstanceId, TestPart, TestType,
    },
};

/// Source of candidate identifiers for tests and instances.
/// Uniqueness is enforced by the store, not by the allocator.
pub trait IdentifierAllocator: Send + Sync {
    fn next_id(&self) -> i64;
}

pub struct RandomIdentifierAllocator {
    range: RangeInclusive<i64>,
}

impl RandomIdentifierAllocator {
    pub fn new(range: RangeInclusive<i64>) -> Self {
        Self { range }
    }
}

impl Default for RandomIdentifierAllocator {
    fn default() -> Self {
        Self::new(100_000..=999_999_999)
    }
}

impl IdentifierAllocator for RandomIdentifierAllocator {
    fn next_id(&self) -> i64 {
        rand::thread_rng().gen_range(self.range.clone())
    }
}

impl ExamEngine {
    /// Persists a new test and its instance, retrying with fresh identifiers
    /// while the store reports a collision.
    pub async fn create_instance(
        &self,
        student_id: StudentId,
        test_type: TestType,
        parts: Vec<TestPart>,
        assignments: Vec<QuestionAssignment>,
    ) -> Result<TestInstanceId, AppError> {
        let mut distinct = HashSet::with_capacity(assignments.len());
        if let Some(dup) = assignments.iter().find(|a| !distinct.insert(a.question_id)) {
            return Err(AppError::BadRequest(format!(
                "Question {} is assigned twice",
                dup.question_id
            )));
        }

        let mut test = NewTest {
            test_id: 0,
            instance_id: 0,
            student_id,
            test_type,
            parts,
            assignments,
        };

        let max_attempts = self.settings.max_id_attempts.max(1);
        for attempt in 1..=max_attempts {
            test.test_id = self.ids.next_id();
            test.instance_id = self.ids.next_id();

            match self.tests.create_test(&test).await {
                Ok(()) => return Ok(test.instance_id),
                Err(AppError::DuplicateIdentifier(msg)) => {
                    tracing::warn!(
                        "Identifier collision on attempt {}/{}: {}",
                        attempt,
                        max_attempts,
                        msg
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::DuplicateIdentifier(format!(
            "Could not allocate unique identifiers after {} attempts",
            max_attempts
        )))
    }
}
