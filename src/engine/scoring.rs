// src/engine/scoring.rs

use std::collections::{BTreeMap, HashMap};

use crate::{
    config::MOCK_SECTION_B_EVALUATED,
    engine::{ExamEngine, evaluator::evaluate},
    error::AppError,
    models::{
        proficiency::{ScoreSummary, ScoredTest, Tally, marks},
        response::{ScoringRow, Verdict},
        syllabus::{PaperSubject, Subject},
        test_instance::{
            PaperScore, Section, StudentId, TestInstance, TestInstanceId, TestPart, TestType,
        },
    },
};

/// Evaluates every stored response of a test in assignment position order.
///
/// In mock tests only the first `MOCK_SECTION_B_EVALUATED` attempted section B
/// answers per subject count, and later ones are treated as skipped.
pub fn score_rows(instance: TestInstance, rows: &[ScoringRow]) -> ScoredTest {
    let mut ordered: Vec<&ScoringRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.position);

    let mut section_b_seen: HashMap<Subject, usize> = HashMap::new();
    let mut verdicts = Vec::with_capacity(rows.len());
    let mut totals = Tally::default();
    let mut chapter_tallies: BTreeMap<_, Tally> = BTreeMap::new();
    let mut subtopic_tallies: BTreeMap<_, Tally> = BTreeMap::new();
    let mut time_spent: i64 = 0;

    let mut correct_questions = Vec::new();
    let mut incorrect_questions = Vec::new();
    let mut skipped_questions = Vec::new();

    for row in ordered {
        let mut verdict = evaluate(&row.response, &row.answer);

        if instance.test_type == TestType::Mock
            && row.section == Some(Section::B)
            && verdict.is_attempted()
        {
            let seen = section_b_seen.entry(row.subject).or_default();
            if *seen >= MOCK_SECTION_B_EVALUATED {
                verdict = Verdict::Skipped;
            } else {
                *seen += 1;
            }
        }

        verdicts.push((row.question_id, verdict));
        match verdict {
            Verdict::Correct => correct_questions.push(row.question_id),
            Verdict::Incorrect => incorrect_questions.push(row.question_id),
            Verdict::Skipped => skipped_questions.push(row.question_id),
        }

        if verdict.is_attempted() {
            totals.record(verdict);
            time_spent += i64::from(row.answering_time_seconds);
            chapter_tallies.entry(row.chapter_id).or_default().record(verdict);
            if let Some(subtopic_id) = row.subtopic_id {
                subtopic_tallies.entry(subtopic_id).or_default().record(verdict);
            }
        }
    }

    correct_questions.sort_unstable();
    incorrect_questions.sort_unstable();
    skipped_questions.sort_unstable();

    let attempted = totals.total();
    let summary = ScoreSummary {
        test_instance_id: instance.id,
        test_type: instance.test_type,
        score: marks(totals.correct, totals.incorrect),
        correct_answers: totals.correct,
        incorrect_answers: totals.incorrect,
        skipped_answers: skipped_questions.len() as i64,
        questions_attempted: attempted,
        average_answering_time_seconds: (attempted > 0)
            .then(|| time_spent as f64 / attempted as f64),
        last_test_attempt: rows.iter().map(|r| r.response_date).max(),
        correct_questions,
        incorrect_questions,
        skipped_questions,
    };

    ScoredTest {
        instance,
        summary,
        verdicts,
        chapter_tallies,
        subtopic_tallies,
    }
}

impl ExamEngine {
    /// Scores a completed test and folds the result into history and proficiency.
    /// Scoring again overwrites the history row without double counting.
    pub async fn score_test(
        &self,
        student_id: StudentId,
        instance_id: TestInstanceId,
    ) -> Result<ScoreSummary, AppError> {
        let instance = self
            .tests
            .find_instance(instance_id, student_id)
            .await?
            .ok_or(AppError::TestInstanceNotFound(instance_id))?;

        if !self.tests.is_completed(instance.test_id).await? {
            return Err(AppError::NotCompleted(format!(
                "Test instance {} still has unsubmitted parts",
                instance_id
            )));
        }

        let rows = self.tests.scoring_rows(&instance).await?;
        let scored = score_rows(instance, &rows);

        self.tests
            .commit_score(&scored, self.settings.recent_tests_window)
            .await?;

        let summary = scored.summary;
        tracing::info!(
            "Scored test {} for student {}: {} ({} correct, {} incorrect, {} skipped)",
            instance_id,
            student_id,
            summary.score,
            summary.correct_answers,
            summary.incorrect_answers,
            summary.skipped_answers
        );

        Ok(summary)
    }

    /// Result of one submitted paper of a practice test.
    ///
    /// Read-only: history and proficiency are written by `score_test` once
    /// every paper is in.
    pub async fn score_paper(
        &self,
        student_id: StudentId,
        instance_id: TestInstanceId,
        paper: PaperSubject,
    ) -> Result<PaperScore, AppError> {
        let instance = self
            .tests
            .find_instance(instance_id, student_id)
            .await?
            .ok_or(AppError::TestInstanceNotFound(instance_id))?;

        if instance.test_type != TestType::Practice {
            return Err(AppError::BadRequest(format!(
                "{} tests are scored as a whole",
                instance.test_type
            )));
        }

        if !self
            .tests
            .part_completed(instance.test_id, TestPart::Paper(paper))
            .await?
        {
            return Err(AppError::NotCompleted(format!(
                "{} has not been submitted for test instance {}",
                paper, instance_id
            )));
        }

        let rows: Vec<ScoringRow> = self
            .tests
            .scoring_rows(&instance)
            .await?
            .into_iter()
            .filter(|r| r.subject.paper() == paper)
            .collect();

        Ok(PaperScore {
            paper,
            summary: score_rows(instance, &rows).summary,
        })
    }
}
