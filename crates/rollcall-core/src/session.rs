//! Authenticated identity and the access rules that hang off it.

use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::secret::Secret;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("teacher login required")]
    TeacherOnly,
    #[error("student login required")]
    StudentOnly,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

/// Who is currently logged in. Lives only in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Teacher,
    Student {
        student_id: String,
        classroom_id: String,
    },
}

impl Session {
    pub fn role(&self) -> &'static str {
        match self {
            Session::Teacher => "teacher",
            Session::Student { .. } => "student",
        }
    }
}

/// Fail unless the current session is a teacher's.
pub fn require_teacher(session: Option<&Session>) -> Result<(), AccessError> {
    match session {
        Some(Session::Teacher) => Ok(()),
        Some(Session::Student { .. }) => Err(AccessError::TeacherOnly),
        None => Err(AccessError::NotLoggedIn),
    }
}

/// Fail unless the current session is a student's; returns (student_id, classroom_id).
pub fn require_student(session: Option<&Session>) -> Result<(&str, &str), AccessError> {
    match session {
        Some(Session::Student {
            student_id,
            classroom_id,
        }) => Ok((student_id.as_str(), classroom_id.as_str())),
        Some(Session::Teacher) => Err(AccessError::StudentOnly),
        None => Err(AccessError::NotLoggedIn),
    }
}

/// Reject blank credential fields before any lookup happens.
pub fn require_field(field: &'static str, value: &str) -> Result<(), AccessError> {
    if value.trim().is_empty() {
        Err(AccessError::MissingCredentials(field))
    } else {
        Ok(())
    }
}

/// The single teacher account, configured at daemon start.
#[derive(Debug, Clone)]
pub struct TeacherCredentials {
    pub username: String,
    pub password: Secret,
}

impl TeacherCredentials {
    pub fn verify(&self, username: &str, password: &Secret) -> Result<(), AccessError> {
        require_field("username", username)?;
        require_field("password", password.expose())?;
        let user_ok = self.username.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = self
            .password
            .expose()
            .as_bytes()
            .ct_eq(password.expose().as_bytes());
        if bool::from(user_ok & pass_ok) {
            Ok(())
        } else {
            Err(AccessError::InvalidCredentials)
        }
    }
}
