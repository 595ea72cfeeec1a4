// src/models/proficiency.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::config::{CORRECT_MARKS, INCORRECT_PENALTY};
use crate::models::{
    question::QuestionId,
    response::Verdict,
    syllabus::{ChapterId, PaperSubject, Subject, SubtopicId},
    test_instance::{StudentId, TestId, TestInstance, TestInstanceId, TestType},
};

/// Correct / incorrect counter pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub correct: i64,
    pub incorrect: i64,
}

impl Tally {
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Correct => self.correct += 1,
            Verdict::Incorrect => self.incorrect += 1,
            Verdict::Skipped => {}
        }
    }

    pub fn add(&mut self, other: Tally) {
        self.correct += other.correct;
        self.incorrect += other.incorrect;
    }

    pub fn total(&self) -> i64 {
        self.correct + self.incorrect
    }
}

/// +4 per correct answer, -1 per incorrect answer.
pub fn marks(correct: i64, incorrect: i64) -> i64 {
    correct * CORRECT_MARKS - incorrect * INCORRECT_PENALTY
}

/// Result returned to the caller after scoring a test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub test_instance_id: TestInstanceId,
    pub test_type: TestType,
    pub score: i64,
    pub correct_answers: i64,
    pub incorrect_answers: i64,
    pub skipped_answers: i64,
    pub questions_attempted: i64,
    pub average_answering_time_seconds: Option<f64>,
    pub last_test_attempt: Option<DateTime<Utc>>,
    pub correct_questions: Vec<QuestionId>,
    pub incorrect_questions: Vec<QuestionId>,
    pub skipped_questions: Vec<QuestionId>,
}

/// Everything the aggregation transaction has to persist for one test.
#[derive(Debug, Clone)]
pub struct ScoredTest {
    pub instance: TestInstance,
    pub summary: ScoreSummary,
    pub verdicts: Vec<(QuestionId, Verdict)>,
    pub chapter_tallies: BTreeMap<ChapterId, Tally>,
    pub subtopic_tallies: BTreeMap<SubtopicId, Tally>,
}

/// Represents the 'test_history' table joined with its instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestHistoryEntry {
    pub test_instance_id: TestInstanceId,
    pub test_id: TestId,
    pub test_type: TestType,
    pub score: i64,
    pub questions_attempted: i64,
    pub correct_answers: i64,
    pub incorrect_answers: i64,
    pub average_answering_time_seconds: Option<f64>,
    pub last_test_attempt: Option<DateTime<Utc>>,
    pub test_date_time: DateTime<Utc>,
}

/// The slice of a history row the rolling proficiency is computed from.
#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct HistoryPoint {
    pub correct_answers: i64,
    pub incorrect_answers: i64,
    pub average_answering_time_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingAverages {
    pub average_score: f64,
    pub average_correct_answers: f64,
    pub average_incorrect_answers: f64,
    pub average_answering_time_seconds: Option<f64>,
}

/// Recency-weighted averages over the newest `window` points.
///
/// `points` must be ordered newest first. The newest point weighs `window`,
/// the next `window - 1`, and so on. Points without an answering time are left
/// out of the time average only.
pub fn weighted_recent(points: &[HistoryPoint], window: usize) -> Option<RollingAverages> {
    let recent = &points[..points.len().min(window)];
    if recent.is_empty() {
        return None;
    }

    let mut total_weight = 0.0;
    let mut correct = 0.0;
    let mut incorrect = 0.0;
    let mut time = 0.0;
    let mut time_weight = 0.0;

    for (i, point) in recent.iter().enumerate() {
        let weight = (window - i) as f64;
        total_weight += weight;
        correct += point.correct_answers as f64 * weight;
        incorrect += point.incorrect_answers as f64 * weight;
        if let Some(t) = point.average_answering_time_seconds {
            time += t * weight;
            time_weight += weight;
        }
    }

    let average_correct_answers = correct / total_weight;
    let average_incorrect_answers = incorrect / total_weight;

    Some(RollingAverages {
        average_score: average_correct_answers * CORRECT_MARKS as f64
            - average_incorrect_answers * INCORRECT_PENALTY as f64,
        average_correct_answers,
        average_incorrect_answers,
        average_answering_time_seconds: (time_weight > 0.0).then(|| time / time_weight),
    })
}

/// Represents the 'test_type_proficiency' table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestTypeProficiency {
    pub test_type: TestType,
    pub average_score: f64,
    pub average_correct_answers: f64,
    pub average_incorrect_answers: f64,
    pub average_answering_time_seconds: Option<f64>,
    pub total_tests_taken: i64,
    pub last_response_date: Option<DateTime<Utc>>,
}

/// Cumulative counters for one chapter or subtopic.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ProficiencyEntry {
    pub id: i64,
    pub name: String,
    pub correct_answers: i64,
    pub incorrect_answers: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentProficiency {
    pub student_id: StudentId,
    pub chapters: Vec<ProficiencyEntry>,
    pub subtopics: Vec<ProficiencyEntry>,
    pub test_types: Vec<TestTypeProficiency>,
}

/// Scored responses of one student in one chapter, summed over every test.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterResponseTally {
    pub subject: Subject,
    pub chapter_id: ChapterId,
    pub title: String,
    pub tally: Tally,
}

/// Percentage of a chapter's scored answers that were right (strengths) or
/// wrong (weaknesses).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterShare {
    pub chapter_id: ChapterId,
    pub title: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectReport {
    pub subject: PaperSubject,
    pub strengths: Vec<ChapterShare>,
    pub weaknesses: Vec<ChapterShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterReport {
    pub student_id: StudentId,
    pub subjects: Vec<SubjectReport>,
}

/// Represents the 'student_targets' table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct StudentTarget {
    pub student_id: StudentId,
    pub target_score: i32,
    pub set_at: DateTime<Utc>,
}

/// DTO for setting a target score. 720 is full marks (180 x 4).
#[derive(Debug, Deserialize, Validate)]
pub struct SetTargetRequest {
    #[validate(range(min = 0, max = 720, message = "Target score must be between 0 and 720."))]
    pub target_score: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(correct: i64, incorrect: i64, time: Option<f64>) -> HistoryPoint {
        HistoryPoint {
            correct_answers: correct,
            incorrect_answers: incorrect,
            average_answering_time_seconds: time,
        }
    }

    #[test]
    fn test_marks() {
        assert_eq!(marks(20, 5), 75);
        assert_eq!(marks(0, 3), -3);
        assert_eq!(marks(0, 0), 0);
    }

    #[test]
    fn test_weighted_recent_single_point() {
        let avg = weighted_recent(&[point(10, 2, Some(40.0))], 5).unwrap();
        assert_eq!(avg.average_correct_answers, 10.0);
        assert_eq!(avg.average_incorrect_answers, 2.0);
        assert_eq!(avg.average_score, 38.0);
        assert_eq!(avg.average_answering_time_seconds, Some(40.0));
    }

    #[test]
    fn test_weighted_recent_favours_newest() {
        // Weights 5 and 4: (10*5 + 1*4) / 9 = 6.0
        let avg = weighted_recent(&[point(10, 0, None), point(1, 0, None)], 5).unwrap();
        assert!((avg.average_correct_answers - 6.0).abs() < 1e-9);
        assert_eq!(avg.average_answering_time_seconds, None);
    }

    #[test]
    fn test_weighted_recent_ignores_points_past_window() {
        let points = vec![
            point(3, 0, Some(10.0)),
            point(3, 0, Some(10.0)),
            point(100, 100, Some(999.0)),
        ];
        let avg = weighted_recent(&points, 2).unwrap();
        assert_eq!(avg.average_correct_answers, 3.0);
        assert_eq!(avg.average_incorrect_answers, 0.0);
        assert_eq!(avg.average_answering_time_seconds, Some(10.0));
    }

    #[test]
    fn test_weighted_recent_time_skips_missing() {
        // Times: 30 (w=5), none (w=4), 60 (w=3) -> (150 + 180) / 8
        let points = vec![
            point(1, 0, Some(30.0)),
            point(1, 0, None),
            point(1, 0, Some(60.0)),
        ];
        let avg = weighted_recent(&points, 5).unwrap();
        assert!((avg.average_answering_time_seconds.unwrap() - 41.25).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_recent_empty() {
        assert!(weighted_recent(&[], 5).is_none());
    }

    #[test]
    fn test_target_request_validation() {
        assert!(SetTargetRequest { target_score: 720 }.validate().is_ok());
        assert!(SetTargetRequest { target_score: 0 }.validate().is_ok());
        assert!(SetTargetRequest { target_score: 721 }.validate().is_err());
        assert!(SetTargetRequest { target_score: -5 }.validate().is_err());
    }

    #[test]
    fn test_tally_ignores_skipped() {
        let mut tally = Tally::default();
        tally.record(Verdict::Correct);
        tally.record(Verdict::Skipped);
        tally.record(Verdict::Incorrect);
        tally.record(Verdict::Correct);
        assert_eq!(tally, Tally { correct: 2, incorrect: 1 });
        assert_eq!(tally.total(), 3);
    }
}
