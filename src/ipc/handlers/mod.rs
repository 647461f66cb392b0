pub mod auth;
pub mod core;
pub mod courses;
pub mod grades;
pub mod import;
pub mod me;
pub mod notifications;
pub mod reports;
pub mod semesters;
pub mod setup;
pub mod students;
