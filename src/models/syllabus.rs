// src/models/syllabus.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type ChapterId = i64;
pub type SubtopicId = i64;

/// NEET subjects as stored in the `subjects` table (ids 1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    Physics,
    Chemistry,
    Botany,
    Zoology,
}

impl Subject {
    pub const ALL: [Subject; 4] = [
        Subject::Physics,
        Subject::Chemistry,
        Subject::Botany,
        Subject::Zoology,
    ];

    pub fn id(self) -> i16 {
        match self {
            Subject::Physics => 1,
            Subject::Chemistry => 2,
            Subject::Botany => 3,
            Subject::Zoology => 4,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Physics => "Physics",
            Subject::Chemistry => "Chemistry",
            Subject::Botany => "Botany",
            Subject::Zoology => "Zoology",
        }
    }

    /// The practice paper this subject is examined under.
    pub fn paper(self) -> PaperSubject {
        match self {
            Subject::Physics => PaperSubject::Physics,
            Subject::Chemistry => PaperSubject::Chemistry,
            Subject::Botany | Subject::Zoology => PaperSubject::Biology,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Practice tests group Botany and Zoology into a single Biology paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaperSubject {
    Physics,
    Chemistry,
    Biology,
}

impl PaperSubject {
    pub const ALL: [PaperSubject; 3] = [
        PaperSubject::Physics,
        PaperSubject::Chemistry,
        PaperSubject::Biology,
    ];

    pub fn subjects(self) -> &'static [Subject] {
        match self {
            PaperSubject::Physics => &[Subject::Physics],
            PaperSubject::Chemistry => &[Subject::Chemistry],
            PaperSubject::Biology => &[Subject::Botany, Subject::Zoology],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaperSubject::Physics => "Physics",
            PaperSubject::Chemistry => "Chemistry",
            PaperSubject::Biology => "Biology",
        }
    }
}

impl fmt::Display for PaperSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperSubject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown subject '{}'", s))
    }
}

/// Represents the 'chapters' table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub subject: Subject,
    pub title: String,
    pub weight: f64,
    pub is_active: bool,
}

/// Represents the 'subtopics' table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    pub id: SubtopicId,
    pub chapter_id: ChapterId,
    pub name: String,
    pub is_active: bool,
}

/// Which part of the syllabus a selection draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionScope {
    Subjects(Vec<Subject>),
    Chapters(Vec<ChapterId>),
}

impl QuestionScope {
    pub fn subject_ids(&self) -> Vec<i16> {
        match self {
            QuestionScope::Subjects(subjects) => subjects.iter().map(|s| s.id()).collect(),
            QuestionScope::Chapters(_) => Vec::new(),
        }
    }
}

/// Chapter id to relative sampling weight, read fresh for every generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterWeights(BTreeMap<ChapterId, f64>);

impl ChapterWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing, negative and non-finite weights all count as zero.
    pub fn weight(&self, chapter_id: ChapterId) -> f64 {
        match self.0.get(&chapter_id) {
            Some(w) if w.is_finite() && *w > 0.0 => *w,
            _ => 0.0,
        }
    }

    /// Shares summing to 1 over `chapters`. Uniform when every weight is zero.
    pub fn normalized_over(&self, chapters: &BTreeSet<ChapterId>) -> BTreeMap<ChapterId, f64> {
        if chapters.is_empty() {
            return BTreeMap::new();
        }

        let total: f64 = chapters.iter().map(|c| self.weight(*c)).sum();
        if total > 0.0 {
            chapters
                .iter()
                .map(|c| (*c, self.weight(*c) / total))
                .collect()
        } else {
            let share = 1.0 / chapters.len() as f64;
            chapters.iter().map(|c| (*c, share)).collect()
        }
    }

    /// Heaviest chapter first; equal weights fall back to ascending chapter id.
    pub fn priority_order(&self, chapters: &BTreeSet<ChapterId>) -> Vec<ChapterId> {
        let mut ordered: Vec<ChapterId> = chapters.iter().copied().collect();
        ordered.sort_by(|a, b| {
            self.weight(*b)
                .total_cmp(&self.weight(*a))
                .then_with(|| a.cmp(b))
        });
        ordered
    }
}

impl FromIterator<(ChapterId, f64)> for ChapterWeights {
    fn from_iter<I: IntoIterator<Item = (ChapterId, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
