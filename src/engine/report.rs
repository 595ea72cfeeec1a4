// src/engine/report.rs

//! Per-student views built from scored responses: the chapter strengths and
//! weaknesses report, answer sheets and target scores.

use std::collections::BTreeMap;

use crate::{
    config::MAX_SCORE,
    engine::ExamEngine,
    error::AppError,
    models::{
        proficiency::{ChapterReport, ChapterResponseTally, ChapterShare, StudentTarget, SubjectReport},
        syllabus::PaperSubject,
        test_instance::{AnswerSheet, StudentId, TestInstanceId},
    },
};

fn percent(part: i64, total: i64) -> f64 {
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Highest percentage first, then ascending chapter id.
fn ranked(mut shares: Vec<ChapterShare>) -> Vec<ChapterShare> {
    shares.sort_by(|a, b| {
        b.percent
            .total_cmp(&a.percent)
            .then_with(|| a.chapter_id.cmp(&b.chapter_id))
    });
    shares
}

/// Groups chapter tallies by paper subject. Every chapter appears in both
/// lists: under strengths with its correct share, under weaknesses with its
/// incorrect share, each rounded to two decimals.
pub fn chapter_report(student_id: StudentId, tallies: &[ChapterResponseTally]) -> ChapterReport {
    let mut by_paper: BTreeMap<PaperSubject, (Vec<ChapterShare>, Vec<ChapterShare>)> =
        BTreeMap::new();

    for row in tallies.iter().filter(|t| t.tally.total() > 0) {
        let total = row.tally.total();
        let (strengths, weaknesses) = by_paper.entry(row.subject.paper()).or_default();
        strengths.push(ChapterShare {
            chapter_id: row.chapter_id,
            title: row.title.clone(),
            percent: percent(row.tally.correct, total),
        });
        weaknesses.push(ChapterShare {
            chapter_id: row.chapter_id,
            title: row.title.clone(),
            percent: percent(row.tally.incorrect, total),
        });
    }

    ChapterReport {
        student_id,
        subjects: by_paper
            .into_iter()
            .map(|(subject, (strengths, weaknesses))| SubjectReport {
                subject,
                strengths: ranked(strengths),
                weaknesses: ranked(weaknesses),
            })
            .collect(),
    }
}

impl ExamEngine {
    pub async fn chapter_report(&self, student_id: StudentId) -> Result<ChapterReport, AppError> {
        let tallies = self.tests.chapter_response_tallies(student_id).await?;
        Ok(chapter_report(student_id, &tallies))
    }

    /// Canonical answers of a test, optionally restricted to one paper subject.
    pub async fn answer_sheet(
        &self,
        student_id: StudentId,
        instance_id: TestInstanceId,
        paper: Option<PaperSubject>,
    ) -> Result<AnswerSheet, AppError> {
        let instance = self
            .tests
            .find_instance(instance_id, student_id)
            .await?
            .ok_or(AppError::TestInstanceNotFound(instance_id))?;

        let mut answers = self.tests.assigned_answers(instance.test_id).await?;
        if let Some(paper) = paper {
            answers.retain(|a| a.subject.paper() == paper);
            if answers.is_empty() {
                return Err(AppError::SubjectNotFound(paper.to_string()));
            }
        }

        Ok(AnswerSheet {
            test_instance_id: instance.id,
            test_type: instance.test_type,
            answers,
        })
    }

    pub async fn set_target(
        &self,
        student_id: StudentId,
        target_score: i32,
    ) -> Result<StudentTarget, AppError> {
        if !(0..=MAX_SCORE).contains(&target_score) {
            return Err(AppError::BadRequest(format!(
                "Target score must be between 0 and {}",
                MAX_SCORE
            )));
        }

        let target = self.tests.set_target(student_id, target_score).await?;
        tracing::info!("Student {} set target score {}", student_id, target_score);
        Ok(target)
    }

    pub async fn target(&self, student_id: StudentId) -> Result<StudentTarget, AppError> {
        self.tests
            .target(student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No target score set for student {}", student_id)))
    }
}
