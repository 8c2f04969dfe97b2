//! Application state: the roster and the report history, mutated together.

use chrono::{DateTime, Utc};

use crate::recognition::RecognitionResult;
use crate::report::{build_report, FaceResolution, ReportHistory};
use crate::roster::{Roster, RosterError};
use crate::types::{AttendanceReport, Classroom, Photo, Student};

/// Everything the application knows, passed explicitly to whoever mutates it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracker {
    pub roster: Roster,
    pub history: ReportHistory,
}

impl Tracker {
    pub fn new(roster: Roster, history: ReportHistory) -> Self {
        Self { roster, history }
    }

    /// Delete a classroom, its students and every report taken in it.
    ///
    /// Returns the removed classroom and the number of reports dropped.
    pub fn delete_classroom(
        &mut self,
        classroom_id: &str,
    ) -> Result<(Classroom, usize), RosterError> {
        let classroom = self.roster.delete_classroom(classroom_id)?;
        let reports = self.history.remove_for_classroom(classroom_id);
        tracing::info!(classroom = classroom_id, reports, "classroom reports removed");
        Ok((classroom, reports))
    }

    /// Build a report from a finished recognition call and add it to history.
    ///
    /// `students` is the roster snapshot the call was made with. Fails, and
    /// adds nothing, when the classroom was deleted while the call was in
    /// flight.
    pub fn commit_report(
        &mut self,
        classroom_id: &str,
        students: &[Student],
        result: RecognitionResult,
        image: Photo,
        period: &str,
        now: DateTime<Utc>,
    ) -> Result<&AttendanceReport, RosterError> {
        let classroom = self
            .roster
            .classroom(classroom_id)
            .ok_or_else(|| RosterError::classroom_not_found(classroom_id))?;
        let report = build_report(classroom, students, result, image, period, now);
        tracing::info!(
            report = %report.id,
            classroom = classroom_id,
            records = report.attendance.len(),
            faces = report.detected_faces.len(),
            "report created"
        );
        Ok(self.history.insert(report))
    }

    /// Confirm an unknown face against the report's classroom roster as it
    /// stands now.
    pub fn resolve_unknown_face(
        &mut self,
        report_id: &str,
        face_id: &str,
        confirmed_name: &str,
    ) -> FaceResolution {
        let Some(classroom_id) = self.history.get(report_id).map(|r| r.classroom_id.clone()) else {
            return FaceResolution::NotFound;
        };
        let students = self
            .roster
            .classroom(&classroom_id)
            .map(|c| c.students.as_slice())
            .unwrap_or_default();
        self.history
            .resolve_unknown_face(report_id, face_id, confirmed_name, students)
    }
}
