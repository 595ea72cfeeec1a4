// src/store/postgres.rs

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    models::{
        proficiency::{
            ChapterResponseTally, HistoryPoint, ProficiencyEntry, ScoredTest, StudentProficiency,
            StudentTarget, Tally, TestHistoryEntry, TestTypeProficiency, weighted_recent,
        },
        question::{AnswerKey, Candidate, PublicQuestion, QuestionId, QuestionImage, QuestionOptions},
        response::{ResponseInput, ScoringRow},
        syllabus::{ChapterWeights, QuestionScope, Subject},
        test_instance::{
            AssignedAnswer, NewTest, QuestionAssignment, Section, StudentId, TestId, TestInstance,
            TestInstanceId, TestPart, TestSummary, TestType,
        },
    },
    store::{QuestionRepository, TestRepository, UsedQuestionCache},
};

/// PostgreSQL-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Logs the failing step and converts the error.
fn db_err(step: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        tracing::error!("Database step '{}' failed: {:?}", step, e);
        AppError::from(e)
    }
}

fn parse_column<T: FromStr<Err = String>>(raw: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|e: String| AppError::InternalServerError(format!("Corrupt row: {}", e)))
}

fn subject_column(id: i16) -> Result<Subject, AppError> {
    Subject::from_id(id)
        .ok_or_else(|| AppError::InternalServerError(format!("Unknown subject id {}", id)))
}

/// Appends the scope filter on the `c` (chapters) alias.
fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: &QuestionScope) {
    match scope {
        QuestionScope::Subjects(_) => {
            qb.push(" AND c.subject_id = ANY(");
            qb.push_bind(scope.subject_ids());
            qb.push(")");
        }
        QuestionScope::Chapters(chapter_ids) => {
            qb.push(" AND c.id = ANY(");
            qb.push_bind(chapter_ids.clone());
            qb.push(")");
        }
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    question: String,
    option_a: String,
    option_b: String,
    option_c: String,
    option_d: String,
}

#[derive(FromRow)]
struct AnswerRow {
    id: i64,
    answer: String,
    explanation: Option<String>,
    image_url: Option<String>,
}

#[derive(FromRow)]
struct InstanceRow {
    id: i64,
    student_id: i64,
    test_id: i64,
    test_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<InstanceRow> for TestInstance {
    type Error = AppError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(TestInstance {
            id: row.id,
            student_id: row.student_id,
            test_id: row.test_id,
            test_type: parse_column(&row.test_type)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    question_id: i64,
    part: String,
    section: Option<String>,
    position: i32,
}

#[derive(FromRow)]
struct ScoringRecord {
    question_id: i64,
    chapter_id: i64,
    subtopic_id: Option<i64>,
    subject_id: i16,
    section: Option<String>,
    position: i32,
    response: String,
    answer: String,
    answering_time_seconds: i32,
    response_date: DateTime<Utc>,
}

#[derive(FromRow)]
struct AssignedAnswerRow {
    question_id: i64,
    part: String,
    section: Option<String>,
    subject_id: i16,
    answer: String,
}

#[derive(FromRow)]
struct ChapterTallyRow {
    subject_id: i16,
    chapter_id: i64,
    title: String,
    correct_answers: i64,
    incorrect_answers: i64,
}

#[derive(FromRow)]
struct SummaryRow {
    test_instance_id: i64,
    test_id: i64,
    test_type: String,
    created_at: DateTime<Utc>,
    is_completed: bool,
}

#[derive(FromRow)]
struct HistoryRow {
    test_instance_id: i64,
    test_id: i64,
    test_type: String,
    score: i64,
    questions_attempted: i64,
    correct_answers: i64,
    incorrect_answers: i64,
    average_answering_time_seconds: Option<f64>,
    last_test_attempt: Option<DateTime<Utc>>,
    test_date_time: DateTime<Utc>,
}

#[derive(FromRow)]
struct TypeProficiencyRow {
    test_type: String,
    average_score: f64,
    average_correct_answers: f64,
    average_incorrect_answers: f64,
    average_answering_time_seconds: Option<f64>,
    total_tests_taken: i64,
    last_response_date: Option<DateTime<Utc>>,
}

#[async_trait]
impl QuestionRepository for PgStore {
    async fn candidates(&self, scope: &QuestionScope) -> Result<Vec<Candidate>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT q.id AS question_id, q.chapter_id
            FROM questions q
            JOIN chapters c ON c.id = q.chapter_id
            LEFT JOIN subtopics s ON s.id = q.subtopic_id
            WHERE q.is_active AND c.is_active AND (s.id IS NULL OR s.is_active)",
        );
        push_scope(&mut qb, scope);
        qb.push(" ORDER BY q.id");

        qb.build_query_as::<Candidate>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("fetch candidate questions"))
    }

    async fn chapter_weights(&self, scope: &QuestionScope) -> Result<ChapterWeights, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT c.id, c.weight FROM chapters c WHERE c.is_active",
        );
        push_scope(&mut qb, scope);

        let rows: Vec<(i64, f64)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("fetch chapter weights"))?;

        Ok(rows.into_iter().collect())
    }

    async fn question_details(
        &self,
        question_id: QuestionId,
    ) -> Result<Option<PublicQuestion>, AppError> {
        let Some(row) = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, question, option_a, option_b, option_c, option_d
            FROM questions
            WHERE id = $1
            "#,
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("fetch question"))?
        else {
            return Ok(None);
        };

        let images = sqlx::query_as::<_, QuestionImage>(
            r#"
            SELECT url, content_type
            FROM question_images
            WHERE question_id = $1 AND content_type <> 'EXP'
            ORDER BY id
            "#,
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch question images"))?;

        Ok(Some(PublicQuestion {
            id: row.id,
            question: row.question,
            options: QuestionOptions {
                a: row.option_a,
                b: row.option_b,
                c: row.option_c,
                d: row.option_d,
            },
            images,
        }))
    }

    async fn answer_key(&self, question_id: QuestionId) -> Result<Option<AnswerKey>, AppError> {
        let row = sqlx::query_as::<_, AnswerRow>(
            r#"
            SELECT
                q.id,
                q.answer,
                q.explanation,
                (SELECT i.url FROM question_images i
                 WHERE i.question_id = q.id AND i.content_type = 'EXP'
                 ORDER BY i.id LIMIT 1) AS image_url
            FROM questions q
            WHERE q.id = $1
            "#,
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("fetch answer key"))?;

        Ok(row.map(|r| AnswerKey {
            question_id: r.id,
            answer: r.answer,
            explanation: r.explanation,
            image_url: r.image_url,
        }))
    }
}

#[async_trait]
impl TestRepository for PgStore {
    async fn create_test(&self, test: &NewTest) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin create test"))?;

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tests WHERE id = $1)
                 OR EXISTS(SELECT 1 FROM test_instances WHERE id = $2)",
        )
        .bind(test.test_id)
        .bind(test.instance_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("check identifiers"))?;

        if taken {
            return Err(AppError::DuplicateIdentifier(format!(
                "Identifier {} or {} already in use",
                test.test_id, test.instance_id
            )));
        }

        sqlx::query("INSERT INTO tests (id, student_id, test_type) VALUES ($1, $2, $3)")
            .bind(test.test_id)
            .bind(test.student_id)
            .bind(test.test_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err("insert test header"))?;

        let mut parts = QueryBuilder::<Postgres>::new("INSERT INTO test_parts (test_id, part) ");
        parts.push_values(&test.parts, |mut b, part| {
            b.push_bind(test.test_id).push_bind(part.as_str());
        });
        parts
            .build()
            .execute(&mut *tx)
            .await
            .map_err(db_err("insert test parts"))?;

        if !test.assignments.is_empty() {
            let mut questions = QueryBuilder::<Postgres>::new(
                "INSERT INTO test_questions (test_id, question_id, part, section, position) ",
            );
            questions.push_values(&test.assignments, |mut b, a| {
                b.push_bind(test.test_id)
                    .push_bind(a.question_id)
                    .push_bind(a.part.as_str())
                    .push_bind(a.section.map(Section::as_str))
                    .push_bind(a.position);
            });
            questions
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err("insert question assignments"))?;
        }

        sqlx::query(
            "INSERT INTO test_instances (id, student_id, test_id, test_type) VALUES ($1, $2, $3, $4)",
        )
        .bind(test.instance_id)
        .bind(test.student_id)
        .bind(test.test_id)
        .bind(test.test_type.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err("insert test instance"))?;

        tx.commit().await.map_err(db_err("commit create test"))?;

        Ok(())
    }

    async fn find_instance(
        &self,
        instance_id: TestInstanceId,
        student_id: StudentId,
    ) -> Result<Option<TestInstance>, AppError> {
        sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT id, student_id, test_id, test_type, created_at
            FROM test_instances
            WHERE id = $1 AND student_id = $2
            "#,
        )
        .bind(instance_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("fetch test instance"))?
        .map(TestInstance::try_from)
        .transpose()
    }

    async fn assignments(&self, test_id: TestId) -> Result<Vec<QuestionAssignment>, AppError> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT question_id, part, section, position
            FROM test_questions
            WHERE test_id = $1
            ORDER BY position
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch assignments"))?;

        rows.into_iter()
            .map(|r| {
                Ok(QuestionAssignment {
                    question_id: r.question_id,
                    part: parse_column(&r.part)?,
                    section: r.section.as_deref().map(parse_column).transpose()?,
                    position: r.position,
                })
            })
            .collect()
    }

    async fn record_responses(
        &self,
        instance: &TestInstance,
        part: TestPart,
        responses: &[ResponseInput],
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin record responses"))?;

        let part_exists = sqlx::query_scalar::<_, bool>(
            "SELECT is_completed FROM test_parts WHERE test_id = $1 AND part = $2 FOR UPDATE",
        )
        .bind(instance.test_id)
        .bind(part.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("lock test part"))?
        .is_some();

        if !part_exists {
            return Err(AppError::SubjectNotFound(part.to_string()));
        }

        if !responses.is_empty() {
            let now = Utc::now();
            let mut upsert = QueryBuilder::<Postgres>::new(
                "INSERT INTO student_responses
                    (test_instance_id, student_id, question_id, response, answering_time_seconds, response_date) ",
            );
            upsert.push_values(responses, |mut b, r| {
                b.push_bind(instance.id)
                    .push_bind(instance.student_id)
                    .push_bind(r.question_id)
                    .push_bind(r.response.clone())
                    .push_bind(r.answering_time_seconds)
                    .push_bind(now);
            });
            upsert.push(
                " ON CONFLICT (test_instance_id, student_id, question_id) DO UPDATE SET
                    response = EXCLUDED.response,
                    answering_time_seconds = EXCLUDED.answering_time_seconds,
                    response_date = EXCLUDED.response_date,
                    answer_correct = NULL",
            );
            upsert
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err("upsert responses"))?;
        }

        sqlx::query(
            r#"
            UPDATE test_parts
            SET is_completed = TRUE, completed_at = NOW()
            WHERE test_id = $1 AND part = $2
            "#,
        )
        .bind(instance.test_id)
        .bind(part.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err("mark part completed"))?;

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM test_parts WHERE test_id = $1 AND NOT is_completed",
        )
        .bind(instance.test_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("count open parts"))?;

        tx.commit().await.map_err(db_err("commit record responses"))?;

        Ok(remaining == 0)
    }

    async fn is_completed(&self, test_id: TestId) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(SELECT 1 FROM test_parts WHERE test_id = $1)
               AND NOT EXISTS(SELECT 1 FROM test_parts WHERE test_id = $1 AND NOT is_completed)
            "#,
        )
        .bind(test_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("check completion"))
    }

    async fn part_completed(&self, test_id: TestId, part: TestPart) -> Result<bool, AppError> {
        let completed = sqlx::query_scalar::<_, bool>(
            "SELECT is_completed FROM test_parts WHERE test_id = $1 AND part = $2",
        )
        .bind(test_id)
        .bind(part.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("check part completion"))?;

        Ok(completed.unwrap_or(false))
    }

    async fn assigned_answers(&self, test_id: TestId) -> Result<Vec<AssignedAnswer>, AppError> {
        let rows = sqlx::query_as::<_, AssignedAnswerRow>(
            r#"
            SELECT tq.question_id, tq.part, tq.section, c.subject_id, q.answer
            FROM test_questions tq
            JOIN questions q ON q.id = tq.question_id
            JOIN chapters c ON c.id = q.chapter_id
            WHERE tq.test_id = $1
            ORDER BY tq.position
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch assigned answers"))?;

        rows.into_iter()
            .map(|r| {
                Ok(AssignedAnswer {
                    question_id: r.question_id,
                    part: parse_column(&r.part)?,
                    section: r.section.as_deref().map(parse_column).transpose()?,
                    subject: subject_column(r.subject_id)?,
                    answer: r.answer,
                })
            })
            .collect()
    }

    async fn scoring_rows(&self, instance: &TestInstance) -> Result<Vec<ScoringRow>, AppError> {
        let rows = sqlx::query_as::<_, ScoringRecord>(
            r#"
            SELECT
                sr.question_id,
                q.chapter_id,
                q.subtopic_id,
                c.subject_id,
                tq.section,
                tq.position,
                sr.response,
                q.answer,
                sr.answering_time_seconds,
                sr.response_date
            FROM student_responses sr
            JOIN questions q ON q.id = sr.question_id
            JOIN chapters c ON c.id = q.chapter_id
            JOIN test_questions tq ON tq.question_id = sr.question_id AND tq.test_id = $3
            WHERE sr.test_instance_id = $1 AND sr.student_id = $2
            ORDER BY tq.position
            "#,
        )
        .bind(instance.id)
        .bind(instance.student_id)
        .bind(instance.test_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch responses for scoring"))?;

        rows.into_iter()
            .map(|r| {
                Ok(ScoringRow {
                    question_id: r.question_id,
                    chapter_id: r.chapter_id,
                    subtopic_id: r.subtopic_id,
                    subject: subject_column(r.subject_id)?,
                    section: r.section.as_deref().map(parse_column).transpose()?,
                    position: r.position,
                    response: r.response,
                    answer: r.answer,
                    answering_time_seconds: r.answering_time_seconds,
                    response_date: r.response_date,
                })
            })
            .collect()
    }

    async fn commit_score(&self, scored: &ScoredTest, window: usize) -> Result<(), AppError> {
        let instance = &scored.instance;
        let summary = &scored.summary;
        let mut tx = self.pool.begin().await.map_err(db_err("begin commit score"))?;

        // Serializes concurrent scorings of the same instance. The history row
        // cannot be locked before it exists.
        sqlx::query("SELECT id FROM test_instances WHERE id = $1 AND student_id = $2 FOR NO KEY UPDATE")
            .bind(instance.id)
            .bind(instance.student_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("lock test instance"))?
            .ok_or(AppError::TestInstanceNotFound(instance.id))?;

        let already_scored: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM test_history WHERE test_instance_id = $1 AND student_id = $2)",
        )
        .bind(instance.id)
        .bind(instance.student_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("check history row"))?;

        if !scored.verdicts.is_empty() {
            let (question_ids, flags): (Vec<QuestionId>, Vec<Option<bool>>) = scored
                .verdicts
                .iter()
                .map(|(question_id, verdict)| (*question_id, verdict.as_flag()))
                .unzip();

            sqlx::query(
                r#"
                UPDATE student_responses sr
                SET answer_correct = v.flag
                FROM UNNEST($3::BIGINT[], $4::BOOLEAN[]) AS v(question_id, flag)
                WHERE sr.test_instance_id = $1 AND sr.student_id = $2 AND sr.question_id = v.question_id
                "#,
            )
            .bind(instance.id)
            .bind(instance.student_id)
            .bind(question_ids)
            .bind(flags)
            .execute(&mut *tx)
            .await
            .map_err(db_err("store response correctness"))?;
        }

        sqlx::query(
            r#"
            INSERT INTO test_history
                (test_instance_id, student_id, score, questions_attempted, correct_answers,
                 incorrect_answers, average_answering_time_seconds, last_test_attempt)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (test_instance_id, student_id) DO UPDATE SET
                score = EXCLUDED.score,
                questions_attempted = EXCLUDED.questions_attempted,
                correct_answers = EXCLUDED.correct_answers,
                incorrect_answers = EXCLUDED.incorrect_answers,
                average_answering_time_seconds = EXCLUDED.average_answering_time_seconds,
                last_test_attempt = EXCLUDED.last_test_attempt
            "#,
        )
        .bind(instance.id)
        .bind(instance.student_id)
        .bind(summary.score)
        .bind(summary.questions_attempted)
        .bind(summary.correct_answers)
        .bind(summary.incorrect_answers)
        .bind(summary.average_answering_time_seconds)
        .bind(summary.last_test_attempt)
        .execute(&mut *tx)
        .await
        .map_err(db_err("upsert test history"))?;

        if !already_scored {
            if !scored.chapter_tallies.is_empty() {
                let mut chapters = QueryBuilder::<Postgres>::new(
                    "INSERT INTO chapter_proficiency (student_id, chapter_id, correct_answers, incorrect_answers) ",
                );
                chapters.push_values(&scored.chapter_tallies, |mut b, (chapter_id, tally)| {
                    b.push_bind(instance.student_id)
                        .push_bind(*chapter_id)
                        .push_bind(tally.correct)
                        .push_bind(tally.incorrect);
                });
                chapters.push(
                    " ON CONFLICT (student_id, chapter_id) DO UPDATE SET
                        correct_answers = chapter_proficiency.correct_answers + EXCLUDED.correct_answers,
                        incorrect_answers = chapter_proficiency.incorrect_answers + EXCLUDED.incorrect_answers",
                );
                chapters
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err("increment chapter proficiency"))?;
            }

            if !scored.subtopic_tallies.is_empty() {
                let mut subtopics = QueryBuilder::<Postgres>::new(
                    "INSERT INTO subtopic_proficiency (student_id, subtopic_id, correct_answers, incorrect_answers) ",
                );
                subtopics.push_values(&scored.subtopic_tallies, |mut b, (subtopic_id, tally)| {
                    b.push_bind(instance.student_id)
                        .push_bind(*subtopic_id)
                        .push_bind(tally.correct)
                        .push_bind(tally.incorrect);
                });
                subtopics.push(
                    " ON CONFLICT (student_id, subtopic_id) DO UPDATE SET
                        correct_answers = subtopic_proficiency.correct_answers + EXCLUDED.correct_answers,
                        incorrect_answers = subtopic_proficiency.incorrect_answers + EXCLUDED.incorrect_answers",
                );
                subtopics
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err("increment subtopic proficiency"))?;
            }
        }

        if instance.test_type.tracks_proficiency() {
            let recent = sqlx::query_as::<_, HistoryPoint>(
                r#"
                SELECT th.correct_answers, th.incorrect_answers, th.average_answering_time_seconds
                FROM test_history th
                JOIN test_instances ti ON ti.id = th.test_instance_id
                WHERE th.student_id = $1 AND ti.test_type = $2
                ORDER BY COALESCE(th.last_test_attempt, th.recorded_at) DESC, th.test_instance_id DESC
                LIMIT $3
                "#,
            )
            .bind(instance.student_id)
            .bind(instance.test_type.as_str())
            .bind(window as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err("fetch recent history"))?;

            if let Some(avg) = weighted_recent(&recent, window) {
                let taken_increment: i64 = if already_scored { 0 } else { 1 };

                sqlx::query(
                    r#"
                    INSERT INTO test_type_proficiency
                        (student_id, test_type, average_score, average_correct_answers,
                         average_incorrect_answers, average_answering_time_seconds,
                         total_tests_taken, last_response_date)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (student_id, test_type) DO UPDATE SET
                        average_score = EXCLUDED.average_score,
                        average_correct_answers = EXCLUDED.average_correct_answers,
                        average_incorrect_answers = EXCLUDED.average_incorrect_answers,
                        average_answering_time_seconds = EXCLUDED.average_answering_time_seconds,
                        total_tests_taken = test_type_proficiency.total_tests_taken + $7,
                        last_response_date = GREATEST(test_type_proficiency.last_response_date, EXCLUDED.last_response_date)
                    "#,
                )
                .bind(instance.student_id)
                .bind(instance.test_type.as_str())
                .bind(avg.average_score)
                .bind(avg.average_correct_answers)
                .bind(avg.average_incorrect_answers)
                .bind(avg.average_answering_time_seconds)
                .bind(taken_increment)
                .bind(summary.last_test_attempt)
                .execute(&mut *tx)
                .await
                .map_err(db_err("upsert test type proficiency"))?;
            }
        }

        tx.commit().await.map_err(db_err("commit score"))?;

        Ok(())
    }

    async fn list_tests(&self, student_id: StudentId) -> Result<Vec<TestSummary>, AppError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT
                ti.id AS test_instance_id,
                ti.test_id,
                ti.test_type,
                ti.created_at,
                NOT EXISTS(
                    SELECT 1 FROM test_parts tp
                    WHERE tp.test_id = ti.test_id AND NOT tp.is_completed
                ) AS is_completed
            FROM test_instances ti
            WHERE ti.student_id = $1
            ORDER BY ti.created_at DESC, ti.id DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list tests"))?;

        rows.into_iter()
            .map(|r| {
                Ok(TestSummary {
                    test_instance_id: r.test_instance_id,
                    test_id: r.test_id,
                    test_type: parse_column(&r.test_type)?,
                    created_at: r.created_at,
                    is_completed: r.is_completed,
                })
            })
            .collect()
    }

    async fn history(&self, student_id: StudentId) -> Result<Vec<TestHistoryEntry>, AppError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT
                th.test_instance_id,
                ti.test_id,
                ti.test_type,
                th.score,
                th.questions_attempted,
                th.correct_answers,
                th.incorrect_answers,
                th.average_answering_time_seconds,
                th.last_test_attempt,
                ti.created_at AS test_date_time
            FROM test_history th
            JOIN test_instances ti ON ti.id = th.test_instance_id
            WHERE th.student_id = $1
            ORDER BY ti.created_at DESC, th.test_instance_id DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch test history"))?;

        rows.into_iter()
            .map(|r| {
                Ok(TestHistoryEntry {
                    test_instance_id: r.test_instance_id,
                    test_id: r.test_id,
                    test_type: parse_column(&r.test_type)?,
                    score: r.score,
                    questions_attempted: r.questions_attempted,
                    correct_answers: r.correct_answers,
                    incorrect_answers: r.incorrect_answers,
                    average_answering_time_seconds: r.average_answering_time_seconds,
                    last_test_attempt: r.last_test_attempt,
                    test_date_time: r.test_date_time,
                })
            })
            .collect()
    }

    async fn proficiency(&self, student_id: StudentId) -> Result<StudentProficiency, AppError> {
        let chapters = sqlx::query_as::<_, ProficiencyEntry>(
            r#"
            SELECT c.id, c.title AS name, cp.correct_answers, cp.incorrect_answers
            FROM chapter_proficiency cp
            JOIN chapters c ON c.id = cp.chapter_id
            WHERE cp.student_id = $1
            ORDER BY c.id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch chapter proficiency"))?;

        let subtopics = sqlx::query_as::<_, ProficiencyEntry>(
            r#"
            SELECT s.id, s.name, sp.correct_answers, sp.incorrect_answers
            FROM subtopic_proficiency sp
            JOIN subtopics s ON s.id = sp.subtopic_id
            WHERE sp.student_id = $1
            ORDER BY s.id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch subtopic proficiency"))?;

        let type_rows = sqlx::query_as::<_, TypeProficiencyRow>(
            r#"
            SELECT test_type, average_score, average_correct_answers, average_incorrect_answers,
                   average_answering_time_seconds, total_tests_taken, last_response_date
            FROM test_type_proficiency
            WHERE student_id = $1
            ORDER BY test_type
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch test type proficiency"))?;

        let test_types = type_rows
            .into_iter()
            .map(|r| {
                Ok(TestTypeProficiency {
                    test_type: parse_column(&r.test_type)?,
                    average_score: r.average_score,
                    average_correct_answers: r.average_correct_answers,
                    average_incorrect_answers: r.average_incorrect_answers,
                    average_answering_time_seconds: r.average_answering_time_seconds,
                    total_tests_taken: r.total_tests_taken,
                    last_response_date: r.last_response_date,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

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
        let rows = sqlx::query_as::<_, ChapterTallyRow>(
            r#"
            SELECT
                c.subject_id,
                c.id AS chapter_id,
                c.title,
                COUNT(*) FILTER (WHERE sr.answer_correct) AS correct_answers,
                COUNT(*) FILTER (WHERE NOT sr.answer_correct) AS incorrect_answers
            FROM student_responses sr
            JOIN questions q ON q.id = sr.question_id
            JOIN chapters c ON c.id = q.chapter_id
            WHERE sr.student_id = $1 AND sr.answer_correct IS NOT NULL
            GROUP BY c.subject_id, c.id, c.title
            ORDER BY c.id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetch chapter response tallies"))?;

        rows.into_iter()
            .map(|r| {
                Ok(ChapterResponseTally {
                    subject: subject_column(r.subject_id)?,
                    chapter_id: r.chapter_id,
                    title: r.title,
                    tally: Tally {
                        correct: r.correct_answers,
                        incorrect: r.incorrect_answers,
                    },
                })
            })
            .collect()
    }

    async fn set_target(
        &self,
        student_id: StudentId,
        target_score: i32,
    ) -> Result<StudentTarget, AppError> {
        sqlx::query_as::<_, StudentTarget>(
            r#"
            INSERT INTO student_targets (student_id, target_score, set_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (student_id) DO UPDATE SET
                target_score = EXCLUDED.target_score,
                set_at = EXCLUDED.set_at
            RETURNING student_id, target_score, set_at
            "#,
        )
        .bind(student_id)
        .bind(target_score)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("upsert student target"))
    }

    async fn target(&self, student_id: StudentId) -> Result<Option<StudentTarget>, AppError> {
        sqlx::query_as::<_, StudentTarget>(
            "SELECT student_id, target_score, set_at FROM student_targets WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("fetch student target"))
    }
}

#[async_trait]
impl UsedQuestionCache for PgStore {
    async fn get_used(
        &self,
        student_id: StudentId,
        test_type: TestType,
    ) -> Result<HashSet<QuestionId>, AppError> {
        let ids: Option<Vec<i64>> = sqlx::query_scalar(
            "SELECT question_ids FROM used_question_sets WHERE student_id = $1 AND test_type = $2",
        )
        .bind(student_id)
        .bind(test_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("fetch used questions"))?;

        Ok(ids.unwrap_or_default().into_iter().collect())
    }

    async fn set_used(
        &self,
        student_id: StudentId,
        test_type: TestType,
        questions: &HashSet<QuestionId>,
    ) -> Result<(), AppError> {
        let mut ids: Vec<i64> = questions.iter().copied().collect();
        ids.sort_unstable();

        sqlx::query(
            r#"
            INSERT INTO used_question_sets (student_id, test_type, question_ids, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (student_id, test_type) DO UPDATE SET
                question_ids = EXCLUDED.question_ids,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(student_id)
        .bind(test_type.as_str())
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(db_err("store used questions"))?;

        Ok(())
    }

    async fn clear_used(
        &self,
        student_id: StudentId,
        test_type: Option<TestType>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "DELETE FROM used_question_sets WHERE student_id = $1 AND ($2::TEXT IS NULL OR test_type = $2)",
        )
        .bind(student_id)
        .bind(test_type.map(TestType::as_str))
        .execute(&self.pool)
        .await
        .map_err(db_err("clear used questions"))?;

        Ok(())
    }
}
