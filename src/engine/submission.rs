// src/engine/submission.rs

use std::collections::{HashMap, HashSet};

use crate::{
    config::DEFAULT_ANSWERING_TIME_SECONDS,
    engine::ExamEngine,
    error::AppError,
    models::{
        question::QuestionId,
        response::{AnswerInput, ResponseInput, SubmissionAck, SubmissionScope},
        test_instance::{StudentId, TestInstanceId, TestPart, TestType},
    },
};

/// Practice tests are submitted one paper at a time; the other types at once.
pub fn resolve_part(test_type: TestType, scope: SubmissionScope) -> Result<TestPart, AppError> {
    match (test_type, scope) {
        (TestType::Practice, SubmissionScope::Paper(paper)) => Ok(TestPart::Paper(paper)),
        (TestType::Practice, SubmissionScope::Whole) => Err(AppError::SubjectNotFound(
            "(none given for practice test)".to_string(),
        )),
        (TestType::Mock | TestType::Custom, _) => Ok(TestPart::Full),
    }
}

/// Normalizes client answers: missing text becomes an empty (skipped)
/// response, missing timing the default. Sorted by question id.
pub fn to_responses(
    answers: HashMap<QuestionId, AnswerInput>,
) -> Result<Vec<ResponseInput>, AppError> {
    let mut responses = answers
        .into_iter()
        .map(|(question_id, input)| {
            let time = input.time.unwrap_or(DEFAULT_ANSWERING_TIME_SECONDS);
            if time < 0 {
                return Err(AppError::BadRequest(format!(
                    "Negative answering time for question {}",
                    question_id
                )));
            }
            Ok(ResponseInput {
                question_id,
                response: input.answer.unwrap_or_default().trim().to_string(),
                answering_time_seconds: time,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    responses.sort_by_key(|r| r.question_id);
    Ok(responses)
}

impl ExamEngine {
    /// Records answers for one part and marks it complete.
    pub async fn submit_answers(
        &self,
        student_id: StudentId,
        instance_id: TestInstanceId,
        scope: SubmissionScope,
        answers: HashMap<QuestionId, AnswerInput>,
    ) -> Result<SubmissionAck, AppError> {
        let instance = self
            .tests
            .find_instance(instance_id, student_id)
            .await?
            .ok_or(AppError::TestInstanceNotFound(instance_id))?;

        let part = resolve_part(instance.test_type, scope)?;

        let assigned: HashSet<QuestionId> = self
            .tests
            .assignments(instance.test_id)
            .await?
            .into_iter()
            .filter(|a| a.part == part)
            .map(|a| a.question_id)
            .collect();
        if assigned.is_empty() {
            return Err(AppError::SubjectNotFound(part.to_string()));
        }

        let mut foreign: Vec<QuestionId> = answers
            .keys()
            .filter(|id| !assigned.contains(id))
            .copied()
            .collect();
        if !foreign.is_empty() {
            foreign.sort_unstable();
            return Err(AppError::BadRequest(format!(
                "Questions {:?} are not part of {} in this test",
                foreign, part
            )));
        }

        let responses = to_responses(answers)?;
        let test_completed = self
            .tests
            .record_responses(&instance, part, &responses)
            .await?;

        tracing::info!(
            "Student {} submitted {} answers for {} of test {}",
            student_id,
            responses.len(),
            part,
            instance_id
        );

        Ok(SubmissionAck {
            test_instance_id: instance_id,
            part,
            responses_recorded: responses.len(),
            test_completed,
        })
    }
}
