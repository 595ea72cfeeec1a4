// src/models/test_instance.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    proficiency::ScoreSummary,
    question::QuestionId,
    syllabus::{ChapterId, PaperSubject, Subject},
};

pub type StudentId = i64;
pub type TestId = i64;
pub type TestInstanceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestType {
    Practice,
    Mock,
    Custom,
}

impl TestType {
    pub const ALL: [TestType; 3] = [TestType::Practice, TestType::Mock, TestType::Custom];

    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Practice => "Practice",
            TestType::Mock => "Mock",
            TestType::Custom => "Custom",
        }
    }

    /// Only practice and mock tests keep a rolling per-type proficiency.
    pub fn tracks_proficiency(self) -> bool {
        matches!(self, TestType::Practice | TestType::Mock)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown test type '{}'", s))
    }
}

/// Mock test section. Section B answers are only partially evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Section {
    A,
    B,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::A => "A",
            Section::B => "B",
        }
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Section::A),
            "B" => Ok(Section::B),
            other => Err(format!("Unknown section '{}'", other)),
        }
    }
}

/// Unit of submission and completion tracking.
/// Practice tests have one part per paper subject, other tests a single `Full` part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestPart {
    Paper(PaperSubject),
    Full,
}

impl TestPart {
    pub fn as_str(self) -> &'static str {
        match self {
            TestPart::Paper(p) => p.as_str(),
            TestPart::Full => "Full",
        }
    }
}

impl Serialize for TestPart {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for TestPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestPart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "Full" {
            return Ok(TestPart::Full);
        }
        s.parse::<PaperSubject>().map(TestPart::Paper)
    }
}

/// Represents the 'test_instances' table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestInstance {
    pub id: TestInstanceId,
    pub student_id: StudentId,
    pub test_id: TestId,
    pub test_type: TestType,
    pub created_at: DateTime<Utc>,
}

/// One row of 'test_questions'. `position` is 1-based across the whole test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionAssignment {
    pub question_id: QuestionId,
    pub part: TestPart,
    pub section: Option<Section>,
    pub position: i32,
}

/// Everything written by one test-creation transaction.
#[derive(Debug, Clone)]
pub struct NewTest {
    pub test_id: TestId,
    pub instance_id: TestInstanceId,
    pub student_id: StudentId,
    pub test_type: TestType,
    pub parts: Vec<TestPart>,
    pub assignments: Vec<QuestionAssignment>,
}

/// DTO returned after generating a test.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTest {
    pub test_instance_id: TestInstanceId,
    pub test_type: TestType,
    pub question_count: usize,
}

/// Row of a student's test listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSummary {
    pub test_instance_id: TestInstanceId,
    pub test_id: TestId,
    pub test_type: TestType,
    pub created_at: DateTime<Utc>,
    pub is_completed: bool,
}

/// Question ids of one part (and section) of a test, in assignment order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperSection {
    pub part: TestPart,
    pub section: Option<Section>,
    pub question_ids: Vec<QuestionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestPaper {
    pub test_instance_id: TestInstanceId,
    pub test_type: TestType,
    pub sections: Vec<PaperSection>,
}

/// Canonical answer of one assigned question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedAnswer {
    pub question_id: QuestionId,
    pub part: TestPart,
    pub section: Option<Section>,
    pub subject: Subject,
    pub answer: String,
}

/// Every canonical answer of a test, or of one paper of it, in assignment order.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerSheet {
    pub test_instance_id: TestInstanceId,
    pub test_type: TestType,
    pub answers: Vec<AssignedAnswer>,
}

/// Result of one paper of a practice test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperScore {
    pub paper: PaperSubject,
    pub summary: ScoreSummary,
}

/// DTO for practice and mock generation.
#[derive(Debug, Deserialize)]
pub struct GenerateTestRequest {
    pub student_id: StudentId,
}

/// DTO for custom test generation.
#[derive(Debug, Deserialize, Validate)]
pub struct CustomTestRequest {
    pub student_id: StudentId,
    #[validate(length(min = 1, max = 50, message = "Between 1 and 50 chapters must be chosen."))]
    pub chapter_ids: Vec<ChapterId>,
    #[validate(range(min = 1, max = 200, message = "Total questions must be between 1 and 200."))]
    pub total_questions: usize,
}

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    pub student_id: StudentId,
}

#[derive(Debug, Deserialize)]
pub struct PaperQuery {
    pub student_id: StudentId,
    pub subject: Option<PaperSubject>,
}

#[derive(Debug, Deserialize)]
pub struct ClearUsedParams {
    pub test_type: Option<TestType>,
}
