// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{questions, students, tests},
    state::AppState,
};

/// Assembles the main application router.
///
/// * Nests the test, student and question routers under `/api`.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    let test_routes = Router::new()
        .route("/practice", post(tests::generate_practice))
        .route("/mock", post(tests::generate_mock))
        .route("/custom", post(tests::generate_custom))
        .route("/{instance_id}/questions", get(tests::get_test_paper))
        .route("/{instance_id}/submit", post(tests::submit_answers))
        .route("/{instance_id}/score", post(tests::score_test))
        .route("/{instance_id}/papers/{subject}/score", post(tests::score_paper))
        .route("/{instance_id}/answers", get(tests::get_answer_sheet));

    let student_routes = Router::new()
        .route("/{id}/tests", get(students::list_tests))
        .route("/{id}/history", get(students::get_history))
        .route("/{id}/proficiency", get(students::get_proficiency))
        .route("/{id}/chapter-report", get(students::get_chapter_report))
        .route("/{id}/target", get(students::get_target).put(students::set_target))
        .route("/{id}/used-questions", delete(students::clear_used_questions));

    let question_routes = Router::new()
        .route("/{id}", get(questions::get_question))
        .route("/{id}/answer", get(questions::get_answer));

    Router::new()
        .nest("/api/tests", test_routes)
        .nest("/api/students", student_routes)
        .nest("/api/questions", question_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
