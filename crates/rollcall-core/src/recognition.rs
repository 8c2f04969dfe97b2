//! Translation between the roster and the remote recognition service.
//!
//! The service is a generative model: it takes a multi-part prompt (text and
//! images) and answers with text. This module builds those prompts and turns
//! the answers back into typed results. Transport lives behind
//! [`RecognitionBackend`].

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{new_id, DetectedFace, FaceBox, Photo, Student, UNKNOWN_FACE_NAME};

/// Reply the service gives when a cropped face matches none of the candidates.
pub const IDENTIFY_UNABLE: &str = "unable to identify";

/// Returned without a remote call when there is nobody left to match against.
pub const IDENTIFY_NO_CANDIDATES: &str = "no candidates";

const RECOGNITION_PROMPT: &str = r#"You are taking attendance for a classroom.

The first image is a photo of the classroom. Every following image is the
reference photo of one enrolled student, preceded by a caption with that
student's exact name.

Return ONLY valid JSON, with no markdown and no extra text, in this shape:
{
  "present": [{"name": "<exact student name>",
               "box": {"top": 0.0, "right": 0.0, "bottom": 0.0, "left": 0.0}}],
  "unknown": [{"name": "Unknown", "box": {"top": 0.0, "right": 0.0, "bottom": 0.0, "left": 0.0}}],
  "absent": ["<exact student name>"],
  "engagementSummary": "<two or three sentences on how engaged the class looks>"
}

RULES:
- Every face in the classroom photo appears exactly once, in "present" or "unknown".
- Use student names exactly as captioned.
- Every enrolled student who is not present is listed in "absent".
- Box coordinates are fractions of the classroom photo's width and height, between 0 and 1."#;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("recognition service not configured: {0}")]
    NotConfigured(String),
    #[error("recognition service unreachable: {0}")]
    Transport(String),
    #[error("recognition service error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed recognition response: {0}")]
    ResponseShape(String),
}

/// One part of a multi-part prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Image(Photo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionRequest {
    pub parts: Vec<Part>,
}

impl RecognitionRequest {
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::Image(_)))
            .count()
    }
}

/// Transport to the generative model.
///
/// One call per user action: implementations must not retry, and no local
/// timeout applies.
pub trait RecognitionBackend: Send + Sync {
    /// Send a prompt, return the model's text answer.
    fn generate(
        &self,
        request: &RecognitionRequest,
    ) -> impl Future<Output = Result<String, RecognitionError>> + Send;
}

/// Parsed outcome of one classroom recognition call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub present: Vec<DetectedFace>,
    pub unknown: Vec<DetectedFace>,
    pub absent: Vec<String>,
    pub engagement_summary: String,
}

/// Outcome of asking the service who a single cropped face is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyOutcome {
    Match(String),
    Unable,
    NoCandidates,
}

impl std::fmt::Display for IdentifyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifyOutcome::Match(name) => f.write_str(name),
            IdentifyOutcome::Unable => f.write_str(IDENTIFY_UNABLE),
            IdentifyOutcome::NoCandidates => f.write_str(IDENTIFY_NO_CANDIDATES),
        }
    }
}

/// Build the recognition prompt: instructions, the classroom image, then a
/// captioned reference photo per student.
pub fn build_request(classroom_image: &Photo, students: &[Student]) -> RecognitionRequest {
    let mut parts = Vec::with_capacity(2 + students.len() * 2);
    parts.push(Part::Text(RECOGNITION_PROMPT.to_string()));
    parts.push(Part::Image(classroom_image.clone()));
    for student in students {
        parts.push(Part::Text(format!("Reference photo for {}", student.name)));
        parts.push(Part::Image(student.photo.clone()));
    }
    RecognitionRequest { parts }
}

#[derive(Deserialize)]
struct RawFace {
    name: String,
    #[serde(rename = "box")]
    face_box: FaceBox,
}

#[derive(Deserialize)]
struct RawRecognition {
    present: Option<Vec<RawFace>>,
    unknown: Option<Vec<RawFace>>,
    absent: Option<Vec<String>>,
    #[serde(rename = "engagementSummary", alias = "engagement_summary")]
    engagement_summary: Option<String>,
}

/// Parse the service's answer into a [`RecognitionResult`].
///
/// The answer may wrap the JSON object in markdown fences or prose, and the
/// prose may itself contain braces. Every detected face gets a fresh id.
/// Faces in `unknown` are always labeled [`UNKNOWN_FACE_NAME`]; boxes are
/// clamped into [0, 1].
pub fn parse_response(raw: &str) -> Result<RecognitionResult, RecognitionError> {
    let mut shape_error = None;
    let mut syntax_error = None;
    for (start, _) in raw.match_indices('{') {
        let mut values =
            serde_json::Deserializer::from_str(&raw[start..]).into_iter::<RawRecognition>();
        match values.next() {
            Some(Ok(parsed)) => match validate(parsed) {
                Ok(result) => return Ok(result),
                Err(err) => {
                    shape_error.get_or_insert(err);
                }
            },
            Some(Err(err)) => {
                syntax_error.get_or_insert(err.to_string());
            }
            None => {}
        }
    }
    Err(shape_error.unwrap_or_else(|| {
        RecognitionError::ResponseShape(
            syntax_error.unwrap_or_else(|| "response contains no JSON object".to_string()),
        )
    }))
}

fn validate(parsed: RawRecognition) -> Result<RecognitionResult, RecognitionError> {
    let missing =
        |field: &str| RecognitionError::ResponseShape(format!("missing field `{field}`"));
    let present = parsed.present.ok_or_else(|| missing("present"))?;
    let unknown = parsed.unknown.ok_or_else(|| missing("unknown"))?;
    let absent = parsed.absent.ok_or_else(|| missing("absent"))?;
    let engagement_summary = parsed
        .engagement_summary
        .ok_or_else(|| missing("engagementSummary"))?;

    let present: Vec<DetectedFace> = present
        .into_iter()
        .map(|f| detected(f.name.trim().to_string(), f.face_box))
        .collect();
    let unknown: Vec<DetectedFace> = unknown
        .into_iter()
        .map(|f| detected(UNKNOWN_FACE_NAME.to_string(), f.face_box))
        .collect();

    tracing::debug!(
        present = present.len(),
        unknown = unknown.len(),
        absent = absent.len(),
        "parsed recognition response"
    );

    Ok(RecognitionResult {
        present,
        unknown,
        absent,
        engagement_summary,
    })
}

fn detected(name: String, face_box: FaceBox) -> DetectedFace {
    if !face_box.is_normalized() {
        tracing::warn!(?face_box, "face box outside [0,1]; clamping");
    }
    DetectedFace {
        id: new_id(),
        name,
        face_box: face_box.normalized(),
    }
}

/// Send a classroom photo and the roster to the service and parse the answer.
pub async fn recognize<B: RecognitionBackend>(
    backend: &B,
    classroom_image: &Photo,
    students: &[Student],
) -> Result<RecognitionResult, RecognitionError> {
    let request = build_request(classroom_image, students);
    tracing::info!(
        students = students.len(),
        images = request.image_count(),
        "sending recognition request"
    );
    let raw = backend.generate(&request).await?;
    parse_response(&raw)
}

fn build_identify_request(face: &Photo, candidates: &[String]) -> RecognitionRequest {
    let list = candidates
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let instructions = format!(
        "The image is a cropped face from a classroom photo. Which of these students is it?\n\
         {list}\n\
         Answer with exactly one name from the list, \
         or exactly \"{IDENTIFY_UNABLE}\" if none match. \
         Answer with nothing else."
    );
    RecognitionRequest {
        parts: vec![Part::Text(instructions), Part::Image(face.clone())],
    }
}

/// Map the service's free-text identify answer onto the candidate list.
///
/// Anything that is not exactly one of the candidates counts as
/// [`IdentifyOutcome::Unable`].
pub fn parse_identification(raw: &str, candidates: &[String]) -> IdentifyOutcome {
    let answer = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .trim();
    candidates
        .iter()
        .find(|c| c.as_str() == answer)
        .map(|c| IdentifyOutcome::Match(c.clone()))
        .unwrap_or(IdentifyOutcome::Unable)
}

/// Ask the service which candidate a cropped face belongs to.
///
/// An empty candidate list short-circuits to [`IdentifyOutcome::NoCandidates`]
/// without a remote call.
pub async fn identify<B: RecognitionBackend>(
    backend: &B,
    face: &Photo,
    candidates: &[String],
) -> Result<IdentifyOutcome, RecognitionError> {
    if candidates.is_empty() {
        tracing::debug!("identify skipped: no candidates");
        return Ok(IdentifyOutcome::NoCandidates);
    }
    let request = build_identify_request(face, candidates);
    tracing::info!(candidates = candidates.len(), "sending identify request");
    let raw = backend.generate(&request).await?;
    let outcome = parse_identification(&raw, candidates);
    tracing::info!(outcome = %outcome, "identify answered");
    Ok(outcome)
}
