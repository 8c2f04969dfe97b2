use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rollcall_core::export::{self, ExportError};
use rollcall_core::imaging::{self, ImagingError};
use rollcall_core::recognition::{self, IdentifyOutcome};
use rollcall_core::{
    FaceResolution, NewStudent, Photo, RecognitionBackend, RecognitionError, RosterError, Secret,
    Tracker, UpdateStudentRequest,
};
use rollcall_store::{Store, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::views::{
    ClassroomView, CsvExport, EngineStatus, ReportSummary, ReportView, StudentRecordView,
    StudentView,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error("face crop failed: {0}")]
    Imaging(#[from] ImagingError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("{0} must not be empty")]
    Validation(&'static str),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("face {0} has already been identified")]
    FaceAlreadyResolved(String),
    #[error("a recognition request is already in flight")]
    Busy,
    #[error("state could not be saved; all operations are halted: {0}")]
    Halted(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

fn not_found(kind: &'static str, id: &str) -> EngineError {
    EngineError::NotFound {
        kind,
        id: id.to_string(),
    }
}

/// Where the engine writes state after every mutation.
pub trait Persistence: Send + 'static {
    fn save(&mut self, tracker: &Tracker) -> Result<(), StoreError>;
}

impl Persistence for Store {
    fn save(&mut self, tracker: &Tracker) -> Result<(), StoreError> {
        Store::save(self, tracker)
    }
}

/// State owned by the engine thread.
struct EngineState<P> {
    tracker: Tracker,
    persistence: P,
    /// Set once a save fails; every later request is refused.
    halted: Option<String>,
}

impl<P: Persistence> EngineState<P> {
    fn query<T>(
        &self,
        f: impl FnOnce(&Tracker) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if let Some(reason) = &self.halted {
            return Err(EngineError::Halted(reason.clone()));
        }
        f(&self.tracker)
    }

    /// Apply a mutation, then persist the complete resulting state.
    ///
    /// Mutations validate before they touch state, so an `Err` from `f`
    /// means nothing changed and nothing is written.
    fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut Tracker) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if let Some(reason) = &self.halted {
            return Err(EngineError::Halted(reason.clone()));
        }
        let value = f(&mut self.tracker)?;
        if let Err(err) = self.persistence.save(&self.tracker) {
            tracing::error!(error = %err, "saving state failed; halting engine");
            let reason = err.to_string();
            self.halted = Some(reason.clone());
            return Err(EngineError::Halted(reason));
        }
        Ok(value)
    }
}

type EngineTask<P> = Box<dyn FnOnce(&mut EngineState<P>) + Send + 'static>;

/// Clone-safe handle to the engine thread.
pub struct EngineHandle<P = Store> {
    tx: mpsc::Sender<EngineTask<P>>,
    remote_busy: Arc<AtomicBool>,
}

impl<P> Clone for EngineHandle<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            remote_busy: self.remote_busy.clone(),
        }
    }
}

/// Marks a remote call in flight; cleared on drop.
struct RemoteCall(Arc<AtomicBool>);

impl Drop for RemoteCall {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the state and processes one request at a time, so every
/// mutation runs to completion, and is saved, before the next one starts.
pub fn spawn_engine<P: Persistence>(
    tracker: Tracker,
    persistence: P,
) -> Result<EngineHandle<P>, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineTask<P>>(16);
    let mut state = EngineState {
        tracker,
        persistence,
        halted: None,
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(task) = rx.blocking_recv() {
                task(&mut state);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        remote_busy: Arc::new(AtomicBool::new(false)),
    })
}

impl<P: Persistence> EngineHandle<P> {
    async fn run<T: Send + 'static>(
        &self,
        task: impl FnOnce(&mut EngineState<P>) -> Result<T, EngineError> + Send + 'static,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |state| {
                let _ = reply_tx.send(task(state));
            }))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn query<T: Send + 'static>(
        &self,
        f: impl FnOnce(&Tracker) -> Result<T, EngineError> + Send + 'static,
    ) -> Result<T, EngineError> {
        self.run(move |state| state.query(f)).await
    }

    async fn mutate<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Tracker) -> Result<T, EngineError> + Send + 'static,
    ) -> Result<T, EngineError> {
        self.run(move |state| state.mutate(f)).await
    }

    fn begin_remote_call(&self) -> Result<RemoteCall, EngineError> {
        if self.remote_busy.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Busy);
        }
        Ok(RemoteCall(self.remote_busy.clone()))
    }

    pub async fn status(&self) -> EngineStatus {
        let status = self
            .run(|state| {
                let roster = state.tracker.roster.classrooms();
                Ok(EngineStatus {
                    classrooms: roster.len(),
                    students: roster.iter().map(|c| c.students.len()).sum(),
                    reports: state.tracker.history.len(),
                    halted: state.halted.clone(),
                })
            })
            .await;
        status.unwrap_or_else(|err| EngineStatus {
            classrooms: 0,
            students: 0,
            reports: 0,
            halted: Some(err.to_string()),
        })
    }

    // --- Roster ---

    pub async fn classrooms(&self) -> Result<Vec<ClassroomView>, EngineError> {
        self.query(|t| Ok(t.roster.classrooms().iter().map(ClassroomView::from).collect()))
            .await
    }

    pub async fn classroom(&self, classroom_id: String) -> Result<ClassroomView, EngineError> {
        self.query(move |t| {
            t.roster
                .classroom(&classroom_id)
                .map(ClassroomView::from)
                .ok_or_else(|| not_found("classroom", &classroom_id))
        })
        .await
    }

    pub async fn create_classroom(&self, name: String) -> Result<ClassroomView, EngineError> {
        self.mutate(move |t| Ok(ClassroomView::from(t.roster.create_classroom(&name)?)))
            .await
    }

    pub async fn rename_classroom(
        &self,
        classroom_id: String,
        name: String,
    ) -> Result<(), EngineError> {
        self.mutate(move |t| Ok(t.roster.rename_classroom(&classroom_id, &name)?))
            .await
    }

    /// Delete a classroom with its students and reports; returns the number
    /// of reports removed.
    pub async fn delete_classroom(&self, classroom_id: String) -> Result<usize, EngineError> {
        self.mutate(move |t| Ok(t.delete_classroom(&classroom_id)?.1))
            .await
    }

    pub async fn add_student(
        &self,
        classroom_id: String,
        student: NewStudent,
    ) -> Result<StudentView, EngineError> {
        if student.photo.data.is_empty() {
            return Err(EngineError::Validation("student photo"));
        }
        self.mutate(move |t| Ok(StudentView::from(t.roster.add_student(&classroom_id, student)?)))
            .await
    }

    pub async fn update_student(
        &self,
        student_id: String,
        update: UpdateStudentRequest,
    ) -> Result<StudentView, EngineError> {
        self.mutate(move |t| Ok(StudentView::from(t.roster.update_student(&student_id, update)?)))
            .await
    }

    pub async fn remove_student(&self, student_id: String) -> Result<(), EngineError> {
        self.mutate(move |t| t.roster.remove_student(&student_id).map(|_| ()).map_err(Into::into))
            .await
    }

    /// Returns the student id on a successful login.
    pub async fn authenticate_student(
        &self,
        classroom_id: String,
        roll_id: String,
        secret: Secret,
    ) -> Result<Option<String>, EngineError> {
        self.query(move |t| {
            Ok(t.roster
                .authenticate_student(&classroom_id, &roll_id, &secret)
                .map(|s| s.id.clone()))
        })
        .await
    }

    // --- Reports ---

    /// Reports newest first, optionally for one classroom.
    pub async fn reports(
        &self,
        classroom_id: Option<String>,
    ) -> Result<Vec<ReportSummary>, EngineError> {
        self.query(move |t| {
            Ok(t.history
                .reports()
                .iter()
                .filter(|r| classroom_id.as_deref().map_or(true, |c| r.classroom_id == c))
                .map(ReportSummary::from)
                .collect())
        })
        .await
    }

    pub async fn report(&self, report_id: String) -> Result<ReportView, EngineError> {
        self.query(move |t| {
            t.history
                .get(&report_id)
                .map(ReportView::from)
                .ok_or_else(|| not_found("report", &report_id))
        })
        .await
    }

    /// Run recognition on a classroom photo and commit the resulting report.
    ///
    /// The remote call happens outside the engine thread. Nothing is
    /// committed unless it succeeds; the classroom may not be deleted in
    /// the meantime.
    pub async fn generate_report<B: RecognitionBackend>(
        &self,
        backend: &B,
        classroom_id: String,
        image: Photo,
        period: String,
    ) -> Result<ReportView, EngineError> {
        if image.data.is_empty() {
            return Err(EngineError::Validation("classroom image"));
        }
        let _call = self.begin_remote_call()?;

        let id = classroom_id.clone();
        let students = self
            .query(move |t| {
                t.roster
                    .classroom(&id)
                    .map(|c| c.students.clone())
                    .ok_or_else(|| not_found("classroom", &id))
            })
            .await?;

        let result = recognition::recognize(backend, &image, &students).await?;

        self.mutate(move |t| {
            let report =
                t.commit_report(&classroom_id, &students, result, image, &period, Utc::now())?;
            Ok(ReportView::from(report))
        })
        .await
    }

    /// Flip one record. Returns `false` when the pair no longer exists.
    pub async fn toggle_status(
        &self,
        report_id: String,
        student_id: String,
    ) -> Result<bool, EngineError> {
        self.mutate(move |t| Ok(t.history.toggle_status(&report_id, &student_id)))
            .await
    }

    /// Crop a detected face and ask the service who it is, among the
    /// students still marked absent in that report.
    pub async fn identify_face<B: RecognitionBackend>(
        &self,
        backend: &B,
        report_id: String,
        face_id: String,
    ) -> Result<IdentifyOutcome, EngineError> {
        let _call = self.begin_remote_call()?;

        let (face, candidates) = self
            .query(move |t| {
                let report = t
                    .history
                    .get(&report_id)
                    .ok_or_else(|| not_found("report", &report_id))?;
                let face = report
                    .face(&face_id)
                    .ok_or_else(|| not_found("face", &face_id))?;
                let crop = imaging::crop(&report.image, &face.face_box)?;
                Ok((crop, report.absent_names()))
            })
            .await?;

        Ok(recognition::identify(backend, &face, &candidates).await?)
    }

    /// Confirm an unknown face. Faces already relabeled are refused so a
    /// repeated confirmation cannot toggle attendance back.
    pub async fn resolve_face(
        &self,
        report_id: String,
        face_id: String,
        confirmed_name: String,
    ) -> Result<FaceResolution, EngineError> {
        self.mutate(move |t| {
            let already = t
                .history
                .get(&report_id)
                .and_then(|r| r.face(&face_id))
                .is_some_and(|f| !f.is_unknown());
            if already {
                return Err(EngineError::FaceAlreadyResolved(face_id));
            }
            Ok(t.resolve_unknown_face(&report_id, &face_id, confirmed_name.trim()))
        })
        .await
    }

    pub async fn export_csv(&self, report_id: String) -> Result<CsvExport, EngineError> {
        self.query(move |t| {
            let report = t
                .history
                .get(&report_id)
                .ok_or_else(|| not_found("report", &report_id))?;
            Ok(CsvExport {
                filename: export::export_filename(report),
                csv: export::to_csv(report)?,
            })
        })
        .await
    }

    /// A student's own attendance, newest first.
    pub async fn student_history(
        &self,
        student_id: String,
    ) -> Result<Vec<StudentRecordView>, EngineError> {
        self.query(move |t| {
            Ok(t.history
                .records_for_student(&student_id)
                .map(|(report, record)| StudentRecordView::new(report, record))
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::recognition::RecognitionRequest;
    use rollcall_core::AttendanceStatus;
    use std::future::Future;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const RECOGNIZED: &str = r#"{
        "present": [{"name": "Ann",
                     "box": {"top": 0.1, "right": 0.3, "bottom": 0.4, "left": 0.1}}],
        "unknown": [{"name": "Unknown",
                     "box": {"top": 0.5, "right": 0.9, "bottom": 0.9, "left": 0.6}}],
        "absent": ["Bob"],
        "engagementSummary": "Most students are taking notes."
    }"#;

    /// Backend that answers with a fixed text, optionally after a delay.
    struct FakeBackend {
        answer: Result<String, RecognitionError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn answering(answer: &str) -> Self {
            Self {
                answer: Ok(answer.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                answer: Err(RecognitionError::Transport("connection refused".into())),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl RecognitionBackend for FakeBackend {
        fn generate(
            &self,
            _request: &RecognitionRequest,
        ) -> impl Future<Output = Result<String, RecognitionError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answer.clone();
            let delay = self.delay;
            async move {
                tokio::time::sleep(delay).await;
                answer
            }
        }
    }

    /// Counts saves; fails every save once `fail` is set.
    struct MemorySink {
        saves: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    impl Persistence for MemorySink {
        fn save(&mut self, _tracker: &Tracker) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn png() -> Photo {
        let img = image::RgbImage::from_pixel(40, 40, image::Rgb([90, 120, 150]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        Photo::new("image/png", out.into_inner())
    }

    fn student(name: &str, roll: &str) -> NewStudent {
        NewStudent {
            name: name.into(),
            roll_id: roll.into(),
            secret: Secret::new("pw"),
            photo: Photo::new("image/jpeg", vec![1, 2, 3]),
        }
    }

    struct Harness {
        engine: EngineHandle<MemorySink>,
        saves: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
        classroom_id: String,
    }

    async fn harness() -> Harness {
        let saves = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let sink = MemorySink {
            saves: saves.clone(),
            fail: fail.clone(),
        };
        let engine = spawn_engine(Tracker::default(), sink).unwrap();
        let classroom_id = engine.create_classroom("Physics".into()).await.unwrap().id;
        engine.add_student(classroom_id.clone(), student("Bob", "2")).await.unwrap();
        engine.add_student(classroom_id.clone(), student("Ann", "1")).await.unwrap();
        Harness {
            engine,
            saves,
            fail,
            classroom_id,
        }
    }

    fn status_of(report: &ReportView, name: &str) -> AttendanceStatus {
        report
            .attendance
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
            .unwrap()
    }

    #[tokio::test]
    async fn test_generate_report_end_to_end() {
        let h = harness().await;
        let backend = FakeBackend::answering(RECOGNIZED);
        let report = h
            .engine
            .generate_report(&backend, h.classroom_id.clone(), png(), "Period 1".into())
            .await
            .unwrap();

        assert_eq!(status_of(&report, "Ann"), AttendanceStatus::Present);
        assert_eq!(status_of(&report, "Bob"), AttendanceStatus::Absent);
        assert_eq!(report.detected_faces.len(), 2);
        assert_eq!(report.summary.period, "Period 1");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.reports(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_recognition_commits_nothing() {
        let h = harness().await;
        let saves_before = h.saves.load(Ordering::SeqCst);
        let err = h
            .engine
            .generate_report(&FakeBackend::failing(), h.classroom_id.clone(), png(), "P".into())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Recognition(RecognitionError::Transport(_))));

        let malformed = FakeBackend::answering(r#"{"present": []}"#);
        let err = h
            .engine
            .generate_report(&malformed, h.classroom_id.clone(), png(), "P".into())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Recognition(RecognitionError::ResponseShape(_))));

        assert!(h.engine.reports(None).await.unwrap().is_empty());
        assert_eq!(h.saves.load(Ordering::SeqCst), saves_before);
    }

    #[tokio::test]
    async fn test_second_recognition_while_busy_is_rejected() {
        let h = harness().await;
        let slow = FakeBackend {
            answer: Ok(RECOGNIZED.to_string()),
            delay: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        };
        let first = h
            .engine
            .generate_report(&slow, h.classroom_id.clone(), png(), "P".into());
        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.engine
                .generate_report(&slow, h.classroom_id.clone(), png(), "P".into())
                .await
        };
        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert!(matches!(second, Err(EngineError::Busy)));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);

        // The guard is released once the call finishes.
        let fast = FakeBackend::answering(RECOGNIZED);
        assert!(h
            .engine
            .generate_report(&fast, h.classroom_id.clone(), png(), "P".into())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_classroom_deleted_mid_flight_commits_nothing() {
        let h = harness().await;
        let slow = FakeBackend {
            answer: Ok(RECOGNIZED.to_string()),
            delay: Duration::from_millis(100),
            calls: AtomicUsize::new(0),
        };
        let generate = h
            .engine
            .generate_report(&slow, h.classroom_id.clone(), png(), "P".into());
        let delete = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.engine.delete_classroom(h.classroom_id.clone()).await
        };
        let (generated, deleted) = tokio::join!(generate, delete);
        assert!(deleted.is_ok());
        assert!(matches!(
            generated,
            Err(EngineError::Roster(RosterError::NotFound { .. }))
        ));
        assert!(h.engine.reports(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identify_then_resolve_face() {
        let h = harness().await;
        let backend = FakeBackend::answering(RECOGNIZED);
        let report = h
            .engine
            .generate_report(&backend, h.classroom_id.clone(), png(), "P".into())
            .await
            .unwrap();
        let unknown = report
            .detected_faces
            .iter()
            .find(|f| f.is_unknown())
            .unwrap()
            .id
            .clone();

        let outcome = h
            .engine
            .identify_face(
                &FakeBackend::answering("Bob"),
                report.summary.id.clone(),
                unknown.clone(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, IdentifyOutcome::Match("Bob".into()));

        let resolution = h
            .engine
            .resolve_face(report.summary.id.clone(), unknown.clone(), "Bob".into())
            .await
            .unwrap();
        assert!(matches!(
            resolution,
            FaceResolution::Resolved {
                status: AttendanceStatus::Present,
                ..
            }
        ));

        let again = h
            .engine
            .resolve_face(report.summary.id.clone(), unknown.clone(), "Bob".into())
            .await;
        assert!(matches!(again, Err(EngineError::FaceAlreadyResolved(_))));

        let view = h.engine.report(report.summary.id.clone()).await.unwrap();
        assert_eq!(status_of(&view, "Bob"), AttendanceStatus::Present);
        assert_eq!(view.summary.unknown_faces, 0);
    }

    #[tokio::test]
    async fn test_identify_with_everyone_present_skips_remote_call() {
        let h = harness().await;
        let all_present = r#"{
            "present": [{"name": "Ann",
                         "box": {"top": 0.1, "right": 0.3, "bottom": 0.4, "left": 0.1}},
                        {"name": "Bob",
                         "box": {"top": 0.1, "right": 0.6, "bottom": 0.4, "left": 0.4}}],
            "unknown": [{"name": "Unknown",
                         "box": {"top": 0.5, "right": 0.9, "bottom": 0.9, "left": 0.6}}],
            "absent": [], "engagementSummary": "Busy."
        }"#;
        let recognizer = FakeBackend::answering(all_present);
        let report = h
            .engine
            .generate_report(&recognizer, h.classroom_id.clone(), png(), "P".into())
            .await
            .unwrap();
        let unknown = report.detected_faces[2].id.clone();
        let backend = FakeBackend::answering("Ann");
        let outcome = h
            .engine
            .identify_face(&backend, report.summary.id.clone(), unknown)
            .await
            .unwrap();
        assert_eq!(outcome, IdentifyOutcome::NoCandidates);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_toggle_stale_reference_is_silent() {
        let h = harness().await;
        assert!(!h
            .engine
            .toggle_status("gone".into(), "nobody".into())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_export_and_student_history() {
        let h = harness().await;
        let backend = FakeBackend::answering(RECOGNIZED);
        let report = h
            .engine
            .generate_report(&backend, h.classroom_id.clone(), png(), "P 1".into())
            .await
            .unwrap();
        let export = h.engine.export_csv(report.summary.id.clone()).await.unwrap();
        assert_eq!(
            export.csv.lines().collect::<Vec<_>>(),
            ["Roll No,Name,Status", "1,Ann,Present", "2,Bob,Absent"]
        );
        assert!(export.filename.starts_with("attendance_Physics_P_1_"));

        let ann = h
            .engine
            .authenticate_student(h.classroom_id.clone(), "1".into(), Secret::new("pw"))
            .await
            .unwrap()
            .unwrap();
        let mine = h.engine.student_history(ann).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_save() {
        let h = harness().await;
        let before = h.saves.load(Ordering::SeqCst);
        assert!(h.engine.create_classroom("  ".into()).await.is_err());
        assert!(h
            .engine
            .add_student(h.classroom_id.clone(), student("Ann", "9"))
            .await
            .is_err());
        assert_eq!(h.saves.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_save_failure_halts_engine() {
        let h = harness().await;
        h.fail.store(true, Ordering::SeqCst);
        let err = h.engine.create_classroom("Chemistry".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Halted(_)));

        h.fail.store(false, Ordering::SeqCst);
        assert!(matches!(h.engine.classrooms().await, Err(EngineError::Halted(_))));
        assert!(h.engine.status().await.halted.is_some());
    }
}
