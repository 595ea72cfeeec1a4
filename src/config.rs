// src/config.rs

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

/// Questions per paper subject in a practice test.
pub const PRACTICE_QUESTIONS_PER_SUBJECT: usize = 30;

/// Mock test section sizes, per subject.
pub const MOCK_SECTION_A_QUESTIONS: usize = 35;
pub const MOCK_SECTION_B_QUESTIONS: usize = 15;

/// Only this many attempted section B answers per subject are evaluated.
pub const MOCK_SECTION_B_EVALUATED: usize = 10;

pub const CUSTOM_MAX_QUESTIONS: usize = 200;

pub const CORRECT_MARKS: i64 = 4;
pub const INCORRECT_PENALTY: i64 = 1;

/// Full marks: 180 evaluated questions at `CORRECT_MARKS` each.
pub const MAX_SCORE: i32 = 720;

/// Used when a submitted answer carries no timing.
pub const DEFAULT_ANSWERING_TIME_SECONDS: i32 = 60;

/// Each chapter share of 1.0 becomes this many copies in the sampling pool.
pub const WEIGHT_SCALE: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rust_log: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Number of recent tests the per-type proficiency is averaged over.
    pub recent_tests_window: usize,
    /// Cap on identifier allocation retries when creating a test.
    pub id_max_attempts: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            rust_log,
            port: parse_or("PORT", 3000),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5),
            recent_tests_window: parse_or("RECENT_TESTS_WINDOW", 5),
            id_max_attempts: parse_or("ID_MAX_ATTEMPTS", 8),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_falls_back_when_unset() {
        assert_eq!(parse_or("NEET_BACKEND_TEST_UNSET_KEY", 42usize), 42);
    }

    #[test]
    fn test_mock_sections_fit_exam_pattern() {
        // 4 subjects x (35 + 15) = 200 questions, 180 of them evaluated.
        assert_eq!(4 * (MOCK_SECTION_A_QUESTIONS + MOCK_SECTION_B_QUESTIONS), 200);
        assert_eq!(4 * (MOCK_SECTION_A_QUESTIONS + MOCK_SECTION_B_EVALUATED), 180);
        assert_eq!(i64::from(MAX_SCORE), 180 * CORRECT_MARKS);
    }
}
