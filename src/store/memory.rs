// src/store/memory.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        proficiency::{
            ChapterResponseTally, HistoryPoint, ProficiencyEntry, ScoredTest, StudentProficiency,
            StudentTarget, Tally, TestHistoryEntry, TestTypeProficiency, weighted_recent,
        },
        question::{AnswerKey, Candidate, PublicQuestion, Question, QuestionId},
        response::{ResponseInput, ScoringRow},
        syllabus::{Chapter, ChapterId, ChapterWeights, QuestionScope, Subtopic, SubtopicId},
        test_instance::{
            AssignedAnswer, NewTest, QuestionAssignment, StudentId, TestId, TestInstance,
            TestInstanceId, TestPart, TestSummary, TestType,
        },
    },
    store::{QuestionRepository, TestRepository, UsedQuestionCache},
};

#[derive(Debug, Clone)]
struct StoredTest {
    parts: BTreeMap<TestPart, bool>,
    assignments: Vec<QuestionAssignment>,
}

impl StoredTest {
    fn is_completed(&self) -> bool {
        !self.parts.is_empty() && self.parts.values().all(|done| *done)
    }
}

#[derive(Debug, Clone)]
struct StoredResponse {
    response: String,
    answering_time_seconds: i32,
    answer_correct: Option<bool>,
    response_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct HistoryRecord {
    student_id: StudentId,
    score: i64,
    questions_attempted: i64,
    correct_answers: i64,
    incorrect_answers: i64,
    average_answering_time_seconds: Option<f64>,
    last_test_attempt: Option<DateTime<Utc>>,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    chapters: BTreeMap<ChapterId, Chapter>,
    subtopics: BTreeMap<SubtopicId, Subtopic>,
    questions: BTreeMap<QuestionId, Question>,
    tests: BTreeMap<TestId, StoredTest>,
    instances: BTreeMap<TestInstanceId, TestInstance>,
    responses: BTreeMap<(TestInstanceId, QuestionId), StoredResponse>,
    history: BTreeMap<TestInstanceId, HistoryRecord>,
    chapter_proficiency: BTreeMap<(StudentId, ChapterId), Tally>,
    subtopic_proficiency: BTreeMap<(StudentId, SubtopicId), Tally>,
    type_proficiency: BTreeMap<(StudentId, TestType), TestTypeProficiency>,
    used: HashMap<(StudentId, TestType), HashSet<QuestionId>>,
    targets: BTreeMap<StudentId, StudentTarget>,
}

impl MemoryState {
    fn in_scope(&self, chapter: &Chapter, scope: &QuestionScope) -> bool {
        match scope {
            QuestionScope::Subjects(subjects) => subjects.contains(&chapter.subject),
            QuestionScope::Chapters(ids) => ids.contains(&chapter.id),
        }
    }

    fn is_selectable(&self, question: &Question, scope: &QuestionScope) -> bool {
        let chapter_ok = self
            .chapters
            .get(&question.chapter_id)
            .is_some_and(|c| c.is_active && self.in_scope(c, scope));
        let subtopic_ok = question
            .subtopic_id
            .and_then(|id| self.subtopics.get(&id))
            .is_none_or(|s| s.is_active);

        question.is_active && chapter_ok && subtopic_ok
    }

    /// Newest first, the same order the SQL store reads recent history in.
    fn recent_points(&self, student_id: StudentId, test_type: TestType) -> Vec<HistoryPoint> {
        let mut rows: Vec<(DateTime<Utc>, TestInstanceId, HistoryPoint)> = self
            .history
            .iter()
            .filter(|(id, h)| {
                h.student_id == student_id
                    && self.instances.get(*id).is_some_and(|i| i.test_type == test_type)
            })
            .map(|(id, h)| {
                (
                    h.last_test_attempt.unwrap_or(h.recorded_at),
                    *id,
                    HistoryPoint {
                        correct_answers: h.correct_answers,
                        incorrect_answers: h.incorrect_answers,
                        average_answering_time_seconds: h.average_answering_time_seconds,
                    },
                )
            })
            .collect();

        rows.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        rows.into_iter().map(|(_, _, p)| p).collect()
    }
}

/// Process-local store with the same transactional contracts as `PgStore`.
/// Every operation runs under a single lock, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_chapter(&self, chapter: Chapter) {
        self.lock().chapters.insert(chapter.id, chapter);
    }

    pub fn add_subtopic(&self, subtopic: Subtopic) {
        self.lock().subtopics.insert(subtopic.id, subtopic);
    }

    pub fn add_question(&self, question: Question) {
        self.lock().questions.insert(question.id, question);
    }

    pub fn set_chapter_weight(&self, chapter_id: ChapterId, weight: f64) {
        if let Some(chapter) = self.lock().chapters.get_mut(&chapter_id) {
            chapter.weight = weight;
        }
    }

    pub fn set_chapter_active(&self, chapter_id: ChapterId, is_active: bool) {
        if let Some(chapter) = self.lock().chapters.get_mut(&chapter_id) {
            chapter.is_active = is_active;
        }
    }

    pub fn set_question_active(&self, question_id: QuestionId, is_active: bool) {
        if let Some(question) = self.lock().questions.get_mut(&question_id) {
            question.is_active = is_active;
        }
    }

    /// Stored correctness flag of one response, `None` when unscored or skipped.
    pub fn response_flag(
        &self,
        instance_id: TestInstanceId,
        question_id: QuestionId,
    ) -> Option<bool> {
        self.lock()
            .responses
            .get(&(instance_id, question_id))
            .and_then(|r| r.answer_correct)
    }
}

#[async_trait]
impl QuestionRepository for MemoryStore {
    async fn candidates(&self, scope: &QuestionScope) -> Result<Vec<Candidate>, AppError> {
        let state = self.lock();
        Ok(state
            .questions
            .values()
            .filter(|q| state.is_selectable(q, scope))
            .map(|q| Candidate {
                question_id: q.id,
                chapter_id: q.chapter_id,
            })
            .collect())
    }

    async fn chapter_weights(&self, scope: &QuestionScope) -> Result<ChapterWeights, AppError> {
        let state = self.lock();
        Ok(state
            .chapters
            .values()
            .filter(|c| c.is_active && state.in_scope(c, scope))
            .map(|c| (c.id, c.weight))
            .collect())
    }

    async fn question_details(
        &self,
        question_id: QuestionId,
    ) -> Result<Option<PublicQuestion>, AppError> {
        Ok(self.lock().questions.get(&question_id).map(PublicQuestion::from))
    }

    async fn answer_key(&self, question_id: QuestionId) -> Result<Option<AnswerKey>, AppError> {
        Ok(self.lock().questions.get(&question_id).map(AnswerKey::from))
    }
}

#[async_trait]
impl TestRepository for MemoryStore {
    async fn create_test(&self, test: &NewTest) -> Result<(), AppError> {
        let mut state = self.lock();

        if state.tests.contains_key(&test.test_id) || state.instances.contains_key(&test.instance_id)
        {
            return Err(AppError::DuplicateIdentifier(format!(
                "Identifier {} or {} already in use",
                test.test_id, test.instance_id
            )));
        }

        if let Some(missing) = test
            .assignments
            .iter()
            .find(|a| !state.questions.contains_key(&a.question_id))
        {
            return Err(AppError::InternalServerError(format!(
                "Question {} does not exist",
                missing.question_id
            )));
        }

        let mut assignments = test.assignments.clone();
        assignments.sort_by_key(|a| a.position);

        state.tests.insert(
            test.test_id,
            StoredTest {
                parts: test.parts.iter().map(|p| (*p, false)).collect(),
                assignments,
            },
        );
        state.instances.insert(
            test.instance_id,
            TestInstance {
                id: test.instance_id,
                student_id: test.student_id,
                test_id: test.test_id,
                test_type: test.test_type,
                created_at: Utc::now(),
            },
        );

        Ok(())
    }

    async fn find_instance(
        &self,
        instance_id: TestInstanceId,
        student_id: StudentId,
    ) -> Result<Option<TestInstance>, AppError> {
        Ok(self
            .lock()
            .instances
            .get(&instance_id)
            .filter(|i| i.student_id == student_id)
            .cloned())
    }

    async fn assignments(&self, test_id: TestId) -> Result<Vec<QuestionAssignment>, AppError> {
        Ok(self
            .lock()
            .tests
            .get(&test_id)
            .map(|t| t.assignments.clone())
            .unwrap_or_default())
    }

    async fn record_responses(
        &self,
        instance: &TestInstance,
        part: TestPart,
        responses: &[ResponseInput],
    ) -> Result<bool, AppError> {
        let mut state = self.lock();

        let has_part = state
            .tests
            .get(&instance.test_id)
            .is_some_and(|t| t.parts.contains_key(&part));
        if !has_part {
            return Err(AppError::SubjectNotFound(part.to_string()));
        }

        let now = Utc::now();
        for r in responses {
            state.responses.insert(
                (instance.id, r.question_id),
                StoredResponse {
                    response: r.response.clone(),
                    answering_time_seconds: r.answering_time_seconds,
                    answer_correct: None,
                    response_date: now,
                },
            );
        }

        let test = state
            .tests
            .get_mut(&instance.test_id)
            .ok_or_else(|| AppError::InternalServerError("Test vanished".to_string()))?;
        test.parts.insert(part, true);

        Ok(test.is_completed())
    }

    async fn is_completed(&self, test_id: TestId) -> Result<bool, AppError> {
        Ok(self
            .lock()
            .tests
            .get(&test_id)
            .is_some_and(StoredTest::is_completed))
    }

    async fn part_completed(&self, test_id: TestId, part: TestPart) -> Result<bool, AppError> {
        Ok(self
            .lock()
            .tests
            .get(&test_id)
            .and_then(|t| t.parts.get(&part).copied())
            .unwrap_or(false))
    }

    async fn assigned_answers(&self, test_id: TestId) -> Result<Vec<AssignedAnswer>, AppError> {
        let state = self.lock();
        let Some(test) = state.tests.get(&test_id) else {
            return Ok(Vec::new());
        };

        test.assignments
            .iter()
            .map(|a| {
                let question = state.questions.get(&a.question_id).ok_or_else(|| {
                    AppError::InternalServerError(format!("Question {} missing from bank", a.question_id))
                })?;
                let chapter = state.chapters.get(&question.chapter_id).ok_or_else(|| {
                    AppError::InternalServerError(format!(
                        "Chapter {} missing from bank",
                        question.chapter_id
                    ))
                })?;
                Ok(AssignedAnswer {
                    question_id: a.question_id,
                    part: a.part,
                    section: a.section,
                    subject: chapter.subject,
                    answer: question.answer.clone(),
                })
            })
            .collect()
    }

    async fn scoring_rows(&self, instance: &TestInstance) -> Result<Vec<ScoringRow>, AppError> {
        let state = self.lock();
        let Some(test) = state.tests.get(&instance.test_id) else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        for assignment in &test.assignments {
            let Some(stored) = state.responses.get(&(instance.id, assignment.question_id)) else {
                continue;
            };
            let question = state.questions.get(&assignment.question_id).ok_or_else(|| {
                AppError::InternalServerError(format!(
                    "Question {} missing from bank",
                    assignment.question_id
                ))
            })?;
            let chapter = state.chapters.get(&question.chapter_id).ok_or_else(|| {
                AppError::InternalServerError(format!(
                    "Chapter {} missing from bank",
                    question.chapter_id
                ))
            })?;

            rows.push(ScoringRow {
                question_id: question.id,
                chapter_id: chapter.id,
                subtopic_id: question.subtopic_id,
                subject: chapter.subject,
                section: assignment.section,
                position: assignment.position,
                response: stored.response.clone(),
                answer: question.answer.clone(),
                answering_time_seconds: stored.answering_time_seconds,
                response_date: stored.response_date,
            });
        }

        Ok(rows)
    }

    async fn commit_score(&self, scored: &ScoredTest, window: usize) -> Result<(), AppError> {
        let mut state = self.lock();
        let instance = &scored.instance;
        let summary = &scored.summary;

        let previous = state.history.get(&instance.id).cloned();
        let already_scored = previous.is_some();

        for (question_id, verdict) in &scored.verdicts {
            if let Some(stored) = state.responses.get_mut(&(instance.id, *question_id)) {
                stored.answer_correct = verdict.as_flag();
            }
        }

        state.history.insert(
            instance.id,
            HistoryRecord {
                student_id: instance.student_id,
                score: summary.score,
                questions_attempted: summary.questions_attempted,
                correct_answers: summary.correct_answers,
                incorrect_answers: summary.incorrect_answers,
                average_answering_time_seconds: summary.average_answering_time_seconds,
                last_test_attempt: summary.last_test_attempt,
                recorded_at: previous.map_or_else(Utc::now, |p| p.recorded_at),
            },
        );

        if !already_scored {
            for (chapter_id, tally) in &scored.chapter_tallies {
                state
                    .chapter_proficiency
                    .entry((instance.student_id, *chapter_id))
                    .or_default()
                    .add(*tally);
            }
            for (subtopic_id, tally) in &scored.subtopic_tallies {
                state
                    .subtopic_proficiency
                    .entry((instance.student_id, *subtopic_id))
                    .or_default()
                    .add(*tally);
            }
        }

        if instance.test_type.tracks_proficiency() {
            let recent = state.recent_points(instance.student_id, instance.test_type);
            if let Some(avg) = weighted_recent(&recent, window) {
                let key = (instance.student_id, instance.test_type);
                let (taken, last) = match state.type_proficiency.get(&key) {
                    Some(existing) => (
                        existing.total_tests_taken,
                        existing.last_response_date.max(summary.last_test_attempt),
                    ),
                    None => (0, summary.last_test_attempt),
                };

                state.type_proficiency.insert(
                    key,
                    TestTypeProficiency {
                        test_type: instance.test_type,
                        average_score: avg.average_score,
                        average_correct_answers: avg.average_correct_answers,
                        average_incorrect_answers: avg.average_incorrect_answers,
                        average_answering_time_seconds: avg.average_answering_time_seconds,
                        total_tests_taken: taken + i64::from(!already_scored),
                        last_response_date: last,
                    },
                );
            }
        }

        Ok(())
    }

    async fn list_tests(&self, student_id: StudentId) -> Result<Vec<TestSummary>, AppError> {
        let state = self.lock();
        let mut tests: Vec<TestSummary> = state
            .instances
            .values()
            .filter(|i| i.student_id == student_id)
            .map(|i| TestSummary {
                test_instance_id: i.id,
                test_id: i.test_id,
                test_type: i.test_type,
                created_at: i.created_at,
                is_completed: state
                    .tests
                    .get(&i.test_id)
                    .is_some_and(StoredTest::is_completed),
            })
            .collect();

        tests.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.test_instance_id.cmp(&a.test_instance_id))
        });
        Ok(tests)
    }

    async fn history(&self, student_id: StudentId) -> Result<Vec<TestHistoryEntry>, AppError> {
        let state = self.lock();
        let mut entries: Vec<TestHistoryEntry> = state
            .history
            .iter()
            .filter(|(_, h)| h.student_id == student_id)
            .filter_map(|(id, h)| {
                let instance = state.instances.get(id)?;
                Some(TestHistoryEntry {
                    test_instance_id: *id,
                    test_id: instance.test_id,
                    test_type: instance.test_type,
                    score: h.score,
                    questions_attempted: h.questions_attempted,
                    correct_answers: h.correct_answers,
                    incorrect_answers: h.incorrect_answers,
                    average_answering_time_seconds: h.average_answering_time_seconds,
                    last_test_attempt: h.last_test_attempt,
                    test_date_time: instance.created_at,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            b.test_date_time
                .cmp(&a.test_date_time)
                .then(b.test_instance_id.cmp(&a.test_instance_id))
        });
        Ok(entries)
    }

    async fn proficiency(&self, student_id: StudentId) -> Result<StudentProficiency, AppError> {
        let state = self.lock();

        let chapters = state
            .chapter_proficiency
            .iter()
            .filter(|((student, _), _)| *student == student_id)
            .filter_map(|((_, chapter_id), tally)| {
                let chapter = state.chapters.get(chapter_id)?;
                Some(ProficiencyEntry {
                    id: chapter.id,
                    name: chapter.title.clone(),
                    correct_answers: tally.correct,
                    incorrect_answers: tally.incorrect,
                })
            })
            .collect();

        let subtopics = state
            .subtopic_proficiency
            .iter()
            .filter(|((student, _), _)| *student == student_id)
            .filter_map(|((_, subtopic_id), tally)| {
                let subtopic = state.subtopics.get(subtopic_id)?;
                Some(ProficiencyEntry {
                    id: subtopic.id,
                    name: subtopic.name.clone(),
                    correct_answers: tally.correct,
                    incorrect_answers: tally.incorrect,
                })
            })
            .collect();

        let test_types = state
            .type_proficiency
            .iter()
            .filter(|((student, _), _)| *student == student_id)
            .map(|(_, p)| p.clone())
            .collect();

        Ok(StudentProficiency {
            student_id,
            chapters,
            subtopics,
            test_types,
        })
    }

    async fn chapter_response_tallies(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<ChapterResponseTally>, AppError> {
        let state = self.lock();
        let mut tallies: BTreeMap<ChapterId, ChapterResponseTally> = BTreeMap::new();

        for ((instance_id, question_id), stored) in &state.responses {
            let Some(flag) = stored.answer_correct else {
                continue;
            };
            let owned = state
                .instances
                .get(instance_id)
                .is_some_and(|i| i.student_id == student_id);
            if !owned {
                continue;
            }
            let Some(chapter) = state
                .questions
                .get(question_id)
                .and_then(|q| state.chapters.get(&q.chapter_id))
            else {
                continue;
            };

            let entry = tallies.entry(chapter.id).or_insert_with(|| ChapterResponseTally {
                subject: chapter.subject,
                chapter_id: chapter.id,
                title: chapter.title.clone(),
                tally: Tally::default(),
            });
            if flag {
                entry.tally.correct += 1;
            } else {
                entry.tally.incorrect += 1;
            }
        }

        Ok(tallies.into_values().collect())
    }

    async fn set_target(
        &self,
        student_id: StudentId,
        target_score: i32,
    ) -> Result<StudentTarget, AppError> {
        let target = StudentTarget {
            student_id,
            target_score,
            set_at: Utc::now(),
        };
        self.lock().targets.insert(student_id, target.clone());
        Ok(target)
    }

    async fn target(&self, student_id: StudentId) -> Result<Option<StudentTarget>, AppError> {
        Ok(self.lock().targets.get(&student_id).cloned())
    }
}

#[async_trait]
impl UsedQuestionCache for MemoryStore {
    async fn get_used(
        &self,
        student_id: StudentId,
        test_type: TestType,
    ) -> Result<HashSet<QuestionId>, AppError> {
        Ok(self
            .lock()
            .used
            .get(&(student_id, test_type))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_used(
        &self,
        student_id: StudentId,
        test_type: TestType,
        questions: &HashSet<QuestionId>,
    ) -> Result<(), AppError> {
        self.lock()
            .used
            .insert((student_id, test_type), questions.clone());
        Ok(())
    }

    async fn clear_used(
        &self,
        student_id: StudentId,
        test_type: Option<TestType>,
    ) -> Result<(), AppError> {
        self.lock()
            .used
            .retain(|(student, t), _| *student != student_id || test_type.is_some_and(|x| x != *t));
        Ok(())
    }
}
