use std::sync::Mutex;

use rollcall_core::session::{self, AccessError};
use rollcall_core::{
    NewStudent, Photo, RosterError, Secret, Session, TeacherCredentials, UpdateStudentRequest,
};
use serde::Serialize;
use zbus::fdo;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};
use crate::gemini::GeminiClient;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Structured results are returned as JSON strings.
pub struct AttendanceService {
    engine: EngineHandle,
    backend: GeminiClient,
    teacher: TeacherCredentials,
    /// Current login. Memory only: cleared by logout and by a restart.
    session: Mutex<Option<Session>>,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, backend: GeminiClient, teacher: TeacherCredentials) -> Self {
        Self {
            engine,
            backend,
            teacher,
            session: Mutex::new(None),
        }
    }

    fn current_session(&self) -> Option<Session> {
        match self.session.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_session(&self, session: Option<Session>) {
        let mut guard = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = session;
    }

    fn require_teacher(&self) -> fdo::Result<()> {
        session::require_teacher(self.current_session().as_ref()).map_err(access_error)
    }
}

fn access_error(err: AccessError) -> fdo::Error {
    tracing::debug!(error = %err, "access denied");
    fdo::Error::AccessDenied(err.to_string())
}

fn engine_error(err: EngineError) -> fdo::Error {
    tracing::warn!(error = %err, "request failed");
    match err {
        EngineError::NotFound { .. } | EngineError::Roster(RosterError::NotFound { .. }) => {
            fdo::Error::UnknownObject(err.to_string())
        }
        EngineError::Roster(_) | EngineError::Validation(_) => {
            fdo::Error::InvalidArgs(err.to_string())
        }
        EngineError::Halted(_) => fdo::Error::IOError(err.to_string()),
        EngineError::Busy => fdo::Error::LimitsExceeded(err.to_string()),
        _ => fdo::Error::Failed(err.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn photo(mime_type: &str, data: Vec<u8>) -> Photo {
    Photo::new(mime_type.trim(), data)
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    // --- Session ---

    async fn login_teacher(&self, username: &str, password: &str) -> fdo::Result<()> {
        self.teacher
            .verify(username.trim(), &Secret::new(password))
            .map_err(access_error)?;
        self.set_session(Some(Session::Teacher));
        tracing::info!("teacher logged in");
        Ok(())
    }

    async fn login_student(
        &self,
        classroom_id: &str,
        roll_id: &str,
        secret: &str,
    ) -> fdo::Result<()> {
        session::require_field("classroom", classroom_id).map_err(access_error)?;
        session::require_field("roll id", roll_id).map_err(access_error)?;
        session::require_field("secret", secret).map_err(access_error)?;
        let student_id = self
            .engine
            .authenticate_student(classroom_id.into(), roll_id.into(), Secret::new(secret))
            .await
            .map_err(engine_error)?
            .ok_or_else(|| access_error(AccessError::InvalidCredentials))?;
        tracing::info!(student = %student_id, "student logged in");
        self.set_session(Some(Session::Student {
            student_id,
            classroom_id: classroom_id.to_string(),
        }));
        Ok(())
    }

    async fn logout(&self) -> fdo::Result<()> {
        self.set_session(None);
        tracing::info!("logged out");
        Ok(())
    }

    /// Current role and identity, or `null` when nobody is logged in.
    async fn whoami(&self) -> fdo::Result<String> {
        let value = match self.current_session() {
            None => serde_json::Value::Null,
            Some(Session::Teacher) => serde_json::json!({ "role": "teacher" }),
            Some(Session::Student {
                student_id,
                classroom_id,
            }) => serde_json::json!({
                "role": "student",
                "student_id": student_id,
                "classroom_id": classroom_id,
            }),
        };
        Ok(value.to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let engine = self.engine.status().await;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "recognition_configured": self.backend.is_configured(),
            "model": self.backend.model(),
            "session": self.current_session().map(|s| s.role()),
            "classrooms": engine.classrooms,
            "students": engine.students,
            "reports": engine.reports,
            "halted": engine.halted,
        })
        .to_string())
    }

    // --- Roster ---

    async fn list_classrooms(&self) -> fdo::Result<String> {
        self.require_teacher()?;
        to_json(&self.engine.classrooms().await.map_err(engine_error)?)
    }

    async fn get_classroom(&self, classroom_id: &str) -> fdo::Result<String> {
        self.require_teacher()?;
        to_json(&self.engine.classroom(classroom_id.into()).await.map_err(engine_error)?)
    }

    async fn create_classroom(&self, name: &str) -> fdo::Result<String> {
        self.require_teacher()?;
        let classroom = self.engine.create_classroom(name.into()).await.map_err(engine_error)?;
        Ok(classroom.id)
    }

    async fn rename_classroom(&self, classroom_id: &str, name: &str) -> fdo::Result<()> {
        self.require_teacher()?;
        self.engine
            .rename_classroom(classroom_id.into(), name.into())
            .await
            .map_err(engine_error)
    }

    /// Returns the number of reports deleted with the classroom.
    async fn delete_classroom(&self, classroom_id: &str) -> fdo::Result<u32> {
        self.require_teacher()?;
        let removed = self
            .engine
            .delete_classroom(classroom_id.into())
            .await
            .map_err(engine_error)?;
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }

    async fn add_student(
        &self,
        classroom_id: &str,
        name: &str,
        roll_id: &str,
        secret: &str,
        photo_mime_type: &str,
        photo_data: Vec<u8>,
    ) -> fdo::Result<String> {
        self.require_teacher()?;
        let student = NewStudent {
            name: name.into(),
            roll_id: roll_id.into(),
            secret: Secret::new(secret),
            photo: photo(photo_mime_type, photo_data),
        };
        let view = self
            .engine
            .add_student(classroom_id.into(), student)
            .await
            .map_err(engine_error)?;
        Ok(view.id)
    }

    /// An empty `new_secret` keeps the current secret.
    async fn update_student(
        &self,
        student_id: &str,
        name: &str,
        roll_id: &str,
        new_secret: &str,
    ) -> fdo::Result<String> {
        self.require_teacher()?;
        let update = UpdateStudentRequest {
            name: name.into(),
            roll_id: roll_id.into(),
            new_secret: (!new_secret.is_empty()).then(|| Secret::new(new_secret)),
        };
        to_json(
            &self
                .engine
                .update_student(student_id.into(), update)
                .await
                .map_err(engine_error)?,
        )
    }

    async fn remove_student(&self, student_id: &str) -> fdo::Result<()> {
        self.require_teacher()?;
        self.engine
            .remove_student(student_id.into())
            .await
            .map_err(engine_error)
    }

    // --- Reports ---

    /// Send a classroom photo for recognition and store the resulting report.
    async fn generate_report(
        &self,
        classroom_id: &str,
        period: &str,
        image_mime_type: &str,
        image_data: Vec<u8>,
    ) -> fdo::Result<String> {
        self.require_teacher()?;
        tracing::info!(
            classroom = classroom_id,
            bytes = image_data.len(),
            "generate report requested"
        );
        let report = self
            .engine
            .generate_report(
                &self.backend,
                classroom_id.into(),
                photo(image_mime_type, image_data),
                period.into(),
            )
            .await
            .map_err(engine_error)?;
        to_json(&report)
    }

    /// Report summaries, newest first. An empty id lists every classroom.
    async fn list_reports(&self, classroom_id: &str) -> fdo::Result<String> {
        self.require_teacher()?;
        let filter = (!classroom_id.is_empty()).then(|| classroom_id.to_string());
        to_json(&self.engine.reports(filter).await.map_err(engine_error)?)
    }

    async fn get_report(&self, report_id: &str) -> fdo::Result<String> {
        self.require_teacher()?;
        to_json(&self.engine.report(report_id.into()).await.map_err(engine_error)?)
    }

    /// Flip a student's status. Returns false when the report or student is gone.
    async fn toggle_status(&self, report_id: &str, student_id: &str) -> fdo::Result<bool> {
        self.require_teacher()?;
        self.engine
            .toggle_status(report_id.into(), student_id.into())
            .await
            .map_err(engine_error)
    }

    /// Ask the recognition service who a detected face is. Changes nothing.
    async fn identify_face(&self, report_id: &str, face_id: &str) -> fdo::Result<String> {
        self.require_teacher()?;
        let outcome = self
            .engine
            .identify_face(&self.backend, report_id.into(), face_id.into())
            .await
            .map_err(engine_error)?;
        Ok(outcome.to_string())
    }

    /// Confirm who an unknown face is: marks them present and relabels the face.
    /// Returns false when no matching student or face exists.
    async fn resolve_face(&self, report_id: &str, face_id: &str, name: &str) -> fdo::Result<bool> {
        self.require_teacher()?;
        let resolution = self
            .engine
            .resolve_face(report_id.into(), face_id.into(), name.into())
            .await
            .map_err(engine_error)?;
        Ok(matches!(resolution, rollcall_core::FaceResolution::Resolved { .. }))
    }

    /// `{"filename": ..., "csv": ...}` for one report.
    async fn export_csv(&self, report_id: &str) -> fdo::Result<String> {
        self.require_teacher()?;
        to_json(&self.engine.export_csv(report_id.into()).await.map_err(engine_error)?)
    }

    // --- Student dashboard ---

    /// The logged-in student's own attendance, newest first.
    async fn my_attendance(&self) -> fdo::Result<String> {
        let session = self.current_session();
        let (student_id, _) = session::require_student(session.as_ref()).map_err(access_error)?;
        to_json(
            &self
                .engine
                .student_history(student_id.to_string())
                .await
                .map_err(engine_error)?,
        )
    }
}
