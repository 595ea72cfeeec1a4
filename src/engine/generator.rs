// src/engine/generator.rs

use std::collections::{BTreeSet, HashSet};

use crate::{
    config::{
        CUSTOM_MAX_QUESTIONS, MOCK_SECTION_A_QUESTIONS, MOCK_SECTION_B_QUESTIONS,
        PRACTICE_QUESTIONS_PER_SUBJECT,
    },
    engine::{ExamEngine, selector},
    error::AppError,
    models::{
        question::QuestionId,
        syllabus::{ChapterId, PaperSubject, QuestionScope, Subject},
        test_instance::{
            GeneratedTest, QuestionAssignment, Section, StudentId, TestPart, TestType,
        },
    },
};

/// One block of questions to draw for a test.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub part: TestPart,
    pub section: Option<Section>,
    pub scope: QuestionScope,
    pub count: usize,
}

/// 30 questions for each of Physics, Chemistry and Biology.
pub fn practice_plan() -> Vec<PlanItem> {
    PaperSubject::ALL
        .into_iter()
        .map(|paper| PlanItem {
            part: TestPart::Paper(paper),
            section: None,
            scope: QuestionScope::Subjects(paper.subjects().to_vec()),
            count: PRACTICE_QUESTIONS_PER_SUBJECT,
        })
        .collect()
}

/// Sections A and B for each of the four subjects.
pub fn mock_plan() -> Vec<PlanItem> {
    Subject::ALL
        .into_iter()
        .flat_map(|subject| {
            [
                (Section::A, MOCK_SECTION_A_QUESTIONS),
                (Section::B, MOCK_SECTION_B_QUESTIONS),
            ]
            .into_iter()
            .map(move |(section, count)| PlanItem {
                part: TestPart::Full,
                section: Some(section),
                scope: QuestionScope::Subjects(vec![subject]),
                count,
            })
        })
        .collect()
}

pub fn custom_plan(chapter_ids: &[ChapterId], total_questions: usize) -> Vec<PlanItem> {
    let chapters: BTreeSet<ChapterId> = chapter_ids.iter().copied().collect();
    vec![PlanItem {
        part: TestPart::Full,
        section: None,
        scope: QuestionScope::Chapters(chapters.into_iter().collect()),
        count: total_questions,
    }]
}

/// Distinct parts in plan order.
fn parts_of(plan: &[PlanItem]) -> Vec<TestPart> {
    let mut parts: Vec<TestPart> = Vec::new();
    for item in plan {
        if !parts.contains(&item.part) {
            parts.push(item.part);
        }
    }
    parts
}

impl ExamEngine {
    pub async fn generate_practice(&self, student_id: StudentId) -> Result<GeneratedTest, AppError> {
        self.generate(student_id, TestType::Practice, practice_plan()).await
    }

    pub async fn generate_mock(&self, student_id: StudentId) -> Result<GeneratedTest, AppError> {
        self.generate(student_id, TestType::Mock, mock_plan()).await
    }

    pub async fn generate_custom(
        &self,
        student_id: StudentId,
        chapter_ids: &[ChapterId],
        total_questions: usize,
    ) -> Result<GeneratedTest, AppError> {
        if chapter_ids.is_empty() {
            return Err(AppError::BadRequest(
                "At least one chapter must be chosen".to_string(),
            ));
        }
        if total_questions == 0 || total_questions > CUSTOM_MAX_QUESTIONS {
            return Err(AppError::BadRequest(format!(
                "Total questions must be between 1 and {}",
                CUSTOM_MAX_QUESTIONS
            )));
        }

        self.generate(
            student_id,
            TestType::Custom,
            custom_plan(chapter_ids, total_questions),
        )
        .await
    }

    async fn generate(
        &self,
        student_id: StudentId,
        test_type: TestType,
        plan: Vec<PlanItem>,
    ) -> Result<GeneratedTest, AppError> {
        // A cache failure degrades to "no history" instead of failing the request.
        let (used, cache_ok) = match self.used.get_used(student_id, test_type).await {
            Ok(used) => (used, true),
            Err(e) => {
                tracing::warn!(
                    "Used-question cache read failed for student {} ({}): {}",
                    student_id,
                    test_type,
                    e
                );
                (HashSet::new(), false)
            }
        };

        let mut rng = self.rng();
        let mut chosen: HashSet<QuestionId> = HashSet::new();
        let mut assignments: Vec<QuestionAssignment> = Vec::new();

        for item in &plan {
            let candidates = self.questions.candidates(&item.scope).await?;
            let weights = self.questions.chapter_weights(&item.scope).await?;
            let pool = selector::CandidatePool::partition(candidates, &used, &chosen);

            let picked = selector::select(&pool, &weights, item.count, &mut rng).map_err(|e| match e {
                AppError::InsufficientQuestions(msg) => {
                    let label = match item.section {
                        Some(section) => format!("{} section {}", describe(&item.scope), section.as_str()),
                        None => describe(&item.scope),
                    };
                    tracing::warn!("Cannot fill {} for student {}: {}", label, student_id, msg);
                    AppError::InsufficientQuestions(format!("{}: {}", label, msg))
                }
                other => other,
            })?;

            for question_id in picked {
                chosen.insert(question_id);
                assignments.push(QuestionAssignment {
                    question_id,
                    part: item.part,
                    section: item.section,
                    position: assignments.len() as i32 + 1,
                });
            }
        }

        let question_count = assignments.len();
        let instance_id = self
            .create_instance(student_id, test_type, parts_of(&plan), assignments)
            .await?;

        tracing::info!(
            "Generated {} test {} for student {} with {} questions",
            test_type,
            instance_id,
            student_id,
            question_count
        );

        if cache_ok {
            let mut merged = used;
            merged.extend(chosen);
            if let Err(e) = self.used.set_used(student_id, test_type, &merged).await {
                tracing::warn!(
                    "Used-question cache write failed for student {} ({}): {}",
                    student_id,
                    test_type,
                    e
                );
            }
        }

        Ok(GeneratedTest {
            test_instance_id: instance_id,
            test_type,
            question_count,
        })
    }
}

fn describe(scope: &QuestionScope) -> String {
    match scope {
        QuestionScope::Subjects(subjects) => subjects
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("+"),
        QuestionScope::Chapters(ids) => format!("{} chosen chapters", ids.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_practice_plan_covers_three_papers() {
        let plan = practice_plan();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.iter().map(|p| p.count).sum::<usize>(), 90);
        assert_eq!(
            plan[2].scope,
            QuestionScope::Subjects(vec![Subject::Botany, Subject::Zoology])
        );
        assert_eq!(parts_of(&plan).len(), 3);
    }

    #[test]
    fn test_mock_plan_is_single_part_with_sections() {
        let plan = mock_plan();
        assert_eq!(plan.len(), 8);
        assert_eq!(plan.iter().map(|p| p.count).sum::<usize>(), 200);
        assert_eq!(parts_of(&plan), vec![TestPart::Full]);
        assert_eq!(plan[0].section, Some(Section::A));
        assert_eq!(plan[1].section, Some(Section::B));
    }

    #[test]
    fn test_custom_plan_dedupes_chapters() {
        let plan = custom_plan(&[5, 3, 5], 12);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].scope, QuestionScope::Chapters(vec![3, 5]));
        assert_eq!(plan[0].count, 12);
    }
}
