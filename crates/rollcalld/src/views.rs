//! JSON shapes returned over D-Bus. Photos and secret digests never leave
//! the daemon.

use chrono::{DateTime, Utc};
use rollcall_core::{
    AttendanceRecord, AttendanceReport, AttendanceStatus, Classroom, DetectedFace, Student,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentView {
    pub id: String,
    pub name: String,
    pub roll_id: String,
}

impl From<&Student> for StudentView {
    fn from(s: &Student) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            roll_id: s.roll_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomView {
    pub id: String,
    pub name: String,
    pub students: Vec<StudentView>,
}

impl From<&Classroom> for ClassroomView {
    fn from(c: &Classroom) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            students: c.students.iter().map(StudentView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    pub classroom_id: String,
    pub classroom_name: String,
    pub timestamp: DateTime<Utc>,
    pub period: String,
    pub present: usize,
    pub absent: usize,
    pub unknown_faces: usize,
}

impl From<&AttendanceReport> for ReportSummary {
    fn from(r: &AttendanceReport) -> Self {
        Self {
            id: r.id.clone(),
            classroom_id: r.classroom_id.clone(),
            classroom_name: r.classroom_name.clone(),
            timestamp: r.timestamp,
            period: r.period.clone(),
            present: r.count(AttendanceStatus::Present),
            absent: r.count(AttendanceStatus::Absent),
            unknown_faces: r.detected_faces.iter().filter(|f| f.is_unknown()).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub summary: ReportSummary,
    pub attendance: Vec<AttendanceRecord>,
    pub detected_faces: Vec<DetectedFace>,
    pub engagement_summary: String,
}

impl From<&AttendanceReport> for ReportView {
    fn from(r: &AttendanceReport) -> Self {
        Self {
            summary: ReportSummary::from(r),
            attendance: r.attendance.clone(),
            detected_faces: r.detected_faces.clone(),
            engagement_summary: r.engagement_summary.clone(),
        }
    }
}

/// One line of a student's own dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecordView {
    pub report_id: String,
    pub classroom_name: String,
    pub timestamp: DateTime<Utc>,
    pub period: String,
    pub status: AttendanceStatus,
}

impl StudentRecordView {
    pub fn new(report: &AttendanceReport, record: &AttendanceRecord) -> Self {
        Self {
            report_id: report.id.clone(),
            classroom_name: report.classroom_name.clone(),
            timestamp: report.timestamp,
            period: report.period.clone(),
            status: record.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvExport {
    pub filename: String,
    pub csv: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub classrooms: usize,
    pub students: usize,
    pub reports: usize,
    pub halted: Option<String>,
}
