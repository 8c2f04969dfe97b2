use std::path::PathBuf;

use rollcall_core::{Secret, TeacherCredentials};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// API key for the Gemini recognition service.
    pub gemini_api_key: Option<String>,
    /// Gemini model name (default: gemini-2.5-flash).
    pub gemini_model: String,
    /// Base URL of the Gemini REST API.
    pub gemini_endpoint: String,
    /// The single teacher login.
    pub teacher: TeacherCredentials,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rollcall.db"));

        Self {
            db_path,
            gemini_api_key: std::env::var("ROLLCALL_GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            gemini_model: env_or("ROLLCALL_GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_endpoint: env_or(
                "ROLLCALL_GEMINI_ENDPOINT",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            teacher: TeacherCredentials {
                username: env_or("ROLLCALL_TEACHER_USERNAME", "teacher"),
                password: Secret::new(env_or("ROLLCALL_TEACHER_PASSWORD", "")),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
