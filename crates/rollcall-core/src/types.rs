use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::secret::SecretDigest;

/// Name the recognition service gives a face it could not match to the roster.
pub const UNKNOWN_FACE_NAME: &str = "Unknown";

/// Generate a fresh identifier (UUID v4, hyphenated).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Raw image bytes plus their mime type.
///
/// Serialized with the bytes base64-encoded so reports and rosters stay
/// plain JSON documents.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Photo {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Base64 (standard alphabet, padded) encoding of the image bytes.
    pub fn to_base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

impl std::fmt::Debug for Photo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Photo")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Face location as fractions of the source image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl FaceBox {
    /// True when every edge lies in [0, 1] and the box is not inverted.
    pub fn is_normalized(&self) -> bool {
        let in_range = |v: f32| (0.0..=1.0).contains(&v);
        in_range(self.top)
            && in_range(self.right)
            && in_range(self.bottom)
            && in_range(self.left)
            && self.left <= self.right
            && self.top <= self.bottom
    }

    /// Clamp every edge into [0, 1] and swap inverted edges.
    ///
    /// NaN edges collapse to 0.
    pub fn normalized(&self) -> FaceBox {
        let clamp = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        let (top, bottom) = (clamp(self.top), clamp(self.bottom));
        let (left, right) = (clamp(self.left), clamp(self.right));
        FaceBox {
            top: top.min(bottom),
            bottom: top.max(bottom),
            left: left.min(right),
            right: left.max(right),
        }
    }
}

/// One face found in a capture, embedded in the report it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    /// Unique within the capture; targets identity corrections.
    pub id: String,
    /// Roster name, or [`UNKNOWN_FACE_NAME`].
    pub name: String,
    #[serde(rename = "box")]
    pub face_box: FaceBox,
}

impl DetectedFace {
    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_FACE_NAME
    }
}

/// An enrolled student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    /// Roll / library identifier, unique within the classroom.
    pub roll_id: String,
    /// Digest of the login secret; the plaintext is never stored.
    pub secret: SecretDigest,
    /// Reference photo sent to the recognition service.
    pub photo: Photo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: String,
    pub name: String,
    /// Always sorted by name.
    pub students: Vec<Student>,
}

impl Classroom {
    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == student_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn toggled(self) -> Self {
        match self {
            AttendanceStatus::Present => AttendanceStatus::Absent,
            AttendanceStatus::Absent => AttendanceStatus::Present,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student's status within one report.
///
/// Name and roll id are copied at capture time so history does not change
/// when the student record does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub name: String,
    pub roll_id: String,
    pub status: AttendanceStatus,
}

/// The persisted outcome of one capture.
///
/// Only `attendance[*].status` and `detected_faces[*].name` change after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub id: String,
    pub classroom_id: String,
    pub classroom_name: String,
    pub timestamp: DateTime<Utc>,
    /// Free-text period or session label.
    pub period: String,
    /// One record per student enrolled at capture time, sorted by name.
    pub attendance: Vec<AttendanceRecord>,
    pub image: Photo,
    pub detected_faces: Vec<DetectedFace>,
    pub engagement_summary: String,
}

impl AttendanceReport {
    pub fn record(&self, student_id: &str) -> Option<&AttendanceRecord> {
        self.attendance.iter().find(|r| r.student_id == student_id)
    }

    pub fn face(&self, face_id: &str) -> Option<&DetectedFace> {
        self.detected_faces.iter().find(|f| f.id == face_id)
    }

    pub fn count(&self, status: AttendanceStatus) -> usize {
        self.attendance.iter().filter(|r| r.status == status).count()
    }

    /// Names of students currently marked absent, in roster order.
    pub fn absent_names(&self) -> Vec<String> {
        self.attendance
            .iter()
            .filter(|r| r.status == AttendanceStatus::Absent)
            .map(|r| r.name.clone())
            .collect()
    }
}
