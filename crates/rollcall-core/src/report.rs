//! Report engine: turns a recognition result into an attendance report and
//! applies manual corrections to the report history.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::recognition::RecognitionResult;
use crate::types::{
    new_id, AttendanceRecord, AttendanceReport, AttendanceStatus, Classroom, Photo, Student,
};

/// Build a complete report for one capture.
///
/// Students are matched against `result.present` by exact name. Every
/// student gets exactly one record; records are sorted by name. Present and
/// unknown faces are kept, with the ids assigned when the response was parsed.
pub fn build_report(
    classroom: &Classroom,
    students: &[Student],
    result: RecognitionResult,
    image: Photo,
    period: &str,
    now: DateTime<Utc>,
) -> AttendanceReport {
    let present: HashSet<&str> = result.present.iter().map(|f| f.name.as_str()).collect();

    let mut attendance: Vec<AttendanceRecord> = students
        .iter()
        .map(|s| AttendanceRecord {
            student_id: s.id.clone(),
            name: s.name.clone(),
            roll_id: s.roll_id.clone(),
            status: if present.contains(s.name.as_str()) {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            },
        })
        .collect();
    attendance.sort_by(|a, b| a.name.cmp(&b.name));

    let unmatched = result
        .present
        .iter()
        .filter(|f| !students.iter().any(|s| s.name == f.name))
        .count();
    if unmatched > 0 {
        tracing::warn!(unmatched, "recognized names not on the roster");
    }

    let mut detected_faces = result.present;
    detected_faces.extend(result.unknown);

    AttendanceReport {
        id: new_id(),
        classroom_id: classroom.id.clone(),
        classroom_name: classroom.name.clone(),
        timestamp: now,
        period: period.trim().to_string(),
        attendance,
        image,
        detected_faces,
        engagement_summary: result.engagement_summary,
    }
}

/// Outcome of confirming who an unknown face is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceResolution {
    /// Record toggled and face relabeled.
    Resolved {
        student_id: String,
        status: AttendanceStatus,
    },
    /// No roster student carries the confirmed name; nothing changed.
    NoMatchingStudent,
    /// Report, face or the student's record is missing; nothing changed.
    NotFound,
}

/// All reports, newest first.
///
/// Deserializes from a plain array through [`ReportHistory::new`], so the
/// ordering holds however the history was stored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<AttendanceReport>")]
pub struct ReportHistory {
    reports: Vec<AttendanceReport>,
}

impl From<Vec<AttendanceReport>> for ReportHistory {
    fn from(reports: Vec<AttendanceReport>) -> Self {
        Self::new(reports)
    }
}

impl Serialize for ReportHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.reports.serialize(serializer)
    }
}

impl ReportHistory {
    /// Wrap loaded reports, restoring newest-first order.
    pub fn new(mut reports: Vec<AttendanceReport>) -> Self {
        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Self { reports }
    }

    pub fn reports(&self) -> &[AttendanceReport] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn get(&self, report_id: &str) -> Option<&AttendanceReport> {
        self.reports.iter().find(|r| r.id == report_id)
    }

    fn get_mut(&mut self, report_id: &str) -> Option<&mut AttendanceReport> {
        self.reports.iter_mut().find(|r| r.id == report_id)
    }

    pub fn for_classroom<'a>(
        &'a self,
        classroom_id: &'a str,
    ) -> impl Iterator<Item = &'a AttendanceReport> + 'a {
        self.reports.iter().filter(move |r| r.classroom_id == classroom_id)
    }

    /// Insert keeping newest-first order. Among equal timestamps the new
    /// report goes first.
    pub fn insert(&mut self, report: AttendanceReport) -> &AttendanceReport {
        let idx = self
            .reports
            .partition_point(|r| r.timestamp > report.timestamp);
        self.reports.insert(idx, report);
        &self.reports[idx]
    }

    /// Flip one student's status in one report. Returns `false` (and changes
    /// nothing) when the pair does not exist.
    pub fn toggle_status(&mut self, report_id: &str, student_id: &str) -> bool {
        let Some(record) = self
            .get_mut(report_id)
            .and_then(|r| r.attendance.iter_mut().find(|a| a.student_id == student_id))
        else {
            tracing::debug!(report = report_id, student = student_id, "toggle ignored: not found");
            return false;
        };
        record.status = record.status.toggled();
        tracing::info!(
            report = report_id,
            student = student_id,
            status = %record.status,
            "attendance toggled"
        );
        true
    }

    /// Confirm an unknown face as `confirmed_name`.
    ///
    /// Either both the student's record is toggled and the face relabeled,
    /// or nothing changes. Calling this twice toggles the record back.
    pub fn resolve_unknown_face(
        &mut self,
        report_id: &str,
        face_id: &str,
        confirmed_name: &str,
        roster: &[Student],
    ) -> FaceResolution {
        let Some(student) = roster.iter().find(|s| s.name == confirmed_name) else {
            tracing::debug!(name = confirmed_name, "resolve ignored: no such student");
            return FaceResolution::NoMatchingStudent;
        };
        let Some(report) = self.get_mut(report_id) else {
            return FaceResolution::NotFound;
        };
        let Some(face_idx) = report.detected_faces.iter().position(|f| f.id == face_id) else {
            return FaceResolution::NotFound;
        };
        let Some(record) = report
            .attendance
            .iter_mut()
            .find(|a| a.student_id == student.id)
        else {
            return FaceResolution::NotFound;
        };

        record.status = record.status.toggled();
        let status = record.status;
        report.detected_faces[face_idx].name = confirmed_name.to_string();
        tracing::info!(
            report = report_id,
            face = face_id,
            student = %student.id,
            status = %status,
            "unknown face resolved"
        );
        FaceResolution::Resolved {
            student_id: student.id.clone(),
            status,
        }
    }

    /// Drop every report of a classroom. Returns how many were removed.
    pub fn remove_for_classroom(&mut self, classroom_id: &str) -> usize {
        let before = self.reports.len();
        self.reports.retain(|r| r.classroom_id != classroom_id);
        before - self.reports.len()
    }

    /// A student's own history: (report, their record), newest first.
    pub fn records_for_student<'a>(
        &'a self,
        student_id: &'a str,
    ) -> impl Iterator<Item = (&'a AttendanceReport, &'a AttendanceRecord)> + 'a {
        self.reports
            .iter()
            .filter_map(move |r| r.record(student_id).map(|rec| (r, rec)))
    }
}
