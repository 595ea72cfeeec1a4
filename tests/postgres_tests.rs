// tests/postgres_tests.rs
//
// Runs the engine against a real database. Needs DATABASE_URL:
// cargo test --test postgres_tests -- --ignored

use std::collections::HashMap;
use std::sync::Arc;

use neet_backend::{
    engine::{EngineSettings, ExamEngine, RandomIdentifierAllocator},
    error::AppError,
    models::{
        question::QuestionId,
        response::{AnswerInput, SubmissionScope},
        syllabus::{PaperSubject, Subject},
        test_instance::{TestPart, TestType},
    },
    store::{PgStore, TestRepository, UsedQuestionCache},
};
use rand::Rng;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

async fn connect() -> PgPool {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    pool
}

/// Chapter `9000 + subject * 10 + n` with 40 questions whose answer is always `a`.
async fn seed_bank(pool: &PgPool) {
    for subject in Subject::ALL {
        for n in 1..=2_i64 {
            let chapter_id = 9000 + i64::from(subject.id()) * 10 + n;
            sqlx::query(
                "INSERT INTO chapters (id, subject_id, title, weight) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(chapter_id)
            .bind(subject.id())
            .bind(format!("Chapter {}", chapter_id))
            .bind(if n == 1 { 0.6 } else { 0.4 })
            .execute(pool)
            .await
            .unwrap();

            for q in 1..=40_i64 {
                sqlx::query(
                    "INSERT INTO questions (id, chapter_id, question, answer) VALUES ($1, $2, $3, 'a')
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(chapter_id * 100 + q)
                .bind(chapter_id)
                .bind(format!("Question {}", q))
                .execute(pool)
                .await
                .unwrap();
            }
        }
    }
}

fn engine(pool: PgPool) -> ExamEngine {
    ExamEngine::with_store(
        Arc::new(PgStore::new(pool)),
        Arc::new(RandomIdentifierAllocator::default()),
        EngineSettings::default(),
    )
}

#[tokio::test]
#[ignore]
async fn practice_flow_against_postgres() {
    // Arrange
    let pool = connect().await;
    seed_bank(&pool).await;
    let engine = engine(pool.clone());
    let student_id: i64 = rand::thread_rng().gen_range(1_000_000..9_000_000);

    // Act
    let generated = engine.generate_practice(student_id).await.unwrap();
    let instance_id = generated.test_instance_id;
    let paper = engine.test_paper(student_id, instance_id).await.unwrap();

    // Assert
    assert_eq!(generated.question_count, 90);
    assert_eq!(paper.sections.len(), 3);

    let err = engine.score_test(student_id, instance_id).await.unwrap_err();
    assert!(matches!(err, AppError::NotCompleted(_)));

    for section in &paper.sections {
        let TestPart::Paper(subject) = section.part else {
            panic!("practice sections are per paper");
        };
        let answers: HashMap<QuestionId, AnswerInput> = section
            .question_ids
            .iter()
            .map(|id| {
                (
                    *id,
                    AnswerInput {
                        answer: Some(if subject == PaperSubject::Physics { "b" } else { "a" }.into()),
                        time: Some(20),
                    },
                )
            })
            .collect();
        engine
            .submit_answers(student_id, instance_id, SubmissionScope::Paper(subject), answers)
            .await
            .unwrap();
    }

    let first = engine.score_test(student_id, instance_id).await.unwrap();
    let second = engine.score_test(student_id, instance_id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.correct_answers, 60);
    assert_eq!(first.incorrect_answers, 30);
    assert_eq!(first.score, 210);

    let proficiency = engine.proficiency(student_id).await.unwrap();
    assert_eq!(proficiency.test_types.len(), 1);
    assert_eq!(proficiency.test_types[0].total_tests_taken, 1);
    let counted: i64 = proficiency
        .chapters
        .iter()
        .map(|c| c.correct_answers + c.incorrect_answers)
        .sum();
    assert_eq!(counted, 90);

    let history = engine.history(student_id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
#[ignore]
async fn used_questions_round_trip_against_postgres() {
    let pool = connect().await;
    let store = PgStore::new(pool);
    let student_id: i64 = rand::thread_rng().gen_range(1_000_000..9_000_000);

    let ids = [3, 1, 2].into_iter().collect();
    store.set_used(student_id, TestType::Mock, &ids).await.unwrap();
    assert_eq!(store.get_used(student_id, TestType::Mock).await.unwrap(), ids);

    store.clear_used(student_id, None).await.unwrap();
    assert!(store.get_used(student_id, TestType::Mock).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn concurrent_scoring_counts_once_against_postgres() {
    // Arrange
    let pool = connect().await;
    seed_bank(&pool).await;
    let engine = Arc::new(engine(pool.clone()));
    let store = PgStore::new(pool);
    let chapter_id = 9000 + i64::from(Subject::Physics.id()) * 10 + 1;

    for _ in 0..5 {
        let student_id: i64 = rand::thread_rng().gen_range(1_000_000..9_000_000);
        let generated = engine
            .generate_custom(student_id, &[chapter_id], 10)
            .await
            .unwrap();
        let instance_id = generated.test_instance_id;
        let paper = engine.test_paper(student_id, instance_id).await.unwrap();
        let answers: HashMap<QuestionId, AnswerInput> = paper.sections[0]
            .question_ids
            .iter()
            .map(|id| {
                (
                    *id,
                    AnswerInput {
                        answer: Some("a".into()),
                        time: Some(15),
                    },
                )
            })
            .collect();
        engine
            .submit_answers(student_id, instance_id, SubmissionScope::Whole, answers.clone())
            .await
            .unwrap();

        // Act
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.score_test(student_id, instance_id).await })
            })
            .collect();

        // Assert
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().correct_answers, 10);
        }

        let proficiency = engine.proficiency(student_id).await.unwrap();
        assert_eq!(proficiency.chapters.len(), 1);
        assert_eq!(proficiency.chapters[0].correct_answers, 10);
        assert_eq!(engine.history(student_id).await.unwrap().len(), 1);

        // Resubmitting drops the stored flags until the test is scored again.
        assert_eq!(store.chapter_response_tallies(student_id).await.unwrap().len(), 1);
        engine
            .submit_answers(student_id, instance_id, SubmissionScope::Whole, answers)
            .await
            .unwrap();
        assert!(store.chapter_response_tallies(student_id).await.unwrap().is_empty());
    }
}
