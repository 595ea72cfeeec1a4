// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use neet_backend::{
    config::Config,
    engine::{EngineSettings, ExamEngine, RandomIdentifierAllocator},
    models::{
        question::{Question, QuestionId, QuestionImage, QuestionOptions},
        syllabus::{Chapter, ChapterId, Subject, Subtopic},
    },
    routes,
    state::AppState,
    store::MemoryStore,
};

pub const QUESTIONS_PER_CHAPTER: i64 = 40;

/// Chapters `11, 12` (Physics), `21, 22` (Chemistry), `31, 32` (Botany), `41, 42` (Zoology).
pub fn chapter_id(subject: Subject, n: i64) -> ChapterId {
    i64::from(subject.id()) * 10 + n
}

/// Questions of chapter `c` are `c * 100 + 1 ..= c * 100 + 40`.
pub fn question_ids(chapter_id: ChapterId) -> impl Iterator<Item = QuestionId> {
    (1..=QUESTIONS_PER_CHAPTER).map(move |n| chapter_id * 100 + n)
}

pub fn chapter_of(question_id: QuestionId) -> ChapterId {
    question_id / 100
}

pub fn subtopic_of(chapter_id: ChapterId) -> i64 {
    chapter_id * 10 + 1
}

pub fn correct_answer(question_id: QuestionId) -> &'static str {
    ["a", "b", "c", "d"][(question_id % 4) as usize]
}

pub fn wrong_answer(question_id: QuestionId) -> &'static str {
    ["b", "c", "d", "a"][(question_id % 4) as usize]
}

pub fn question(id: QuestionId, chapter_id: ChapterId, subtopic_id: Option<i64>) -> Question {
    Question {
        id,
        chapter_id,
        subtopic_id,
        question: format!("Question {}", id),
        options: QuestionOptions {
            a: "first".into(),
            b: "second".into(),
            c: "third".into(),
            d: "fourth".into(),
        },
        answer: correct_answer(id).to_string(),
        explanation: Some(format!("Because of {}", id)),
        images: Vec::new(),
        is_active: true,
    }
}

pub fn add_chapter(store: &MemoryStore, chapter_id: ChapterId, subject: Subject, weight: f64) {
    store.add_chapter(Chapter {
        id: chapter_id,
        subject,
        title: format!("Chapter {}", chapter_id),
        weight,
        is_active: true,
    });
    store.add_subtopic(Subtopic {
        id: subtopic_of(chapter_id),
        chapter_id,
        name: format!("Subtopic of {}", chapter_id),
        is_active: true,
    });
}

/// Two chapters of 40 questions per subject. Even questions carry a subtopic.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();

    for subject in Subject::ALL {
        for (n, weight) in [(1, 0.6), (2, 0.4)] {
            let chapter = chapter_id(subject, n);
            add_chapter(&store, chapter, subject, weight);
            for id in question_ids(chapter) {
                let subtopic = (id % 2 == 0).then(|| subtopic_of(chapter));
                store.add_question(question(id, chapter, subtopic));
            }
        }
    }

    let mut illustrated = question(1101, 11, None);
    illustrated.images = vec![
        QuestionImage {
            url: "https://img.example/1101-q.png".into(),
            content_type: "QUE".into(),
        },
        QuestionImage {
            url: "https://img.example/1101-exp.png".into(),
            content_type: "EXP".into(),
        },
    ];
    store.add_question(illustrated);

    Arc::new(store)
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        recent_tests_window: 5,
        max_id_attempts: 8,
        rng_seed: Some(42),
    }
}

pub fn engine(store: Arc<MemoryStore>) -> ExamEngine {
    ExamEngine::with_store(
        store,
        Arc::new(RandomIdentifierAllocator::default()),
        settings(),
    )
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        rust_log: "error".to_string(),
        port: 0,
        db_max_connections: 1,
        recent_tests_window: 5,
        id_max_attempts: 8,
    }
}

/// Spawns the app on a random port backed by `store`.
/// Returns the base URL (e.g., "http://127.0.0.1:12345").
pub async fn spawn_app(store: Arc<MemoryStore>) -> String {
    let state = AppState::new(engine(store), test_config());
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}
