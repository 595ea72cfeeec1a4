// src/models/mod.rs

pub mod proficiency;
pub mod question;
pub mod response;
pub mod syllabus;
pub mod test_instance;
