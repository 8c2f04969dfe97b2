//! rollcall-core: attendance roster, recognition adapter and report engine.
//!
//! Face matching itself happens in a remote generative-AI service; this crate
//! owns everything around it: the roster, the translation to and from the
//! service, and the reconciliation of its output into editable reports.

pub mod export;
pub mod imaging;
pub mod recognition;
pub mod report;
pub mod roster;
pub mod secret;
pub mod session;
pub mod tracker;
pub mod types;

pub use recognition::{IdentifyOutcome, RecognitionBackend, RecognitionError, RecognitionResult};
pub use report::{FaceResolution, ReportHistory};
pub use roster::{NewStudent, Roster, RosterError, UpdateStudentRequest};
pub use secret::{Secret, SecretDigest};
pub use session::{AccessError, Session, TeacherCredentials};
pub use tracker::Tracker;
pub use types::{
    AttendanceRecord, AttendanceReport, AttendanceStatus, Classroom, DetectedFace, FaceBox,
    Photo, Student, UNKNOWN_FACE_NAME,
};
