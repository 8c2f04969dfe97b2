//! Gemini `generateContent` transport for the recognition service.

use std::future::Future;

use rollcall_core::recognition::{Part, RecognitionRequest};
use rollcall_core::{RecognitionBackend, RecognitionError};
use serde::{Deserialize, Serialize};

// ============================================================================
// Gemini API types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<ApiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ApiPart {
    Text { text: String },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl From<&RecognitionRequest> for GenerateRequest {
    fn from(request: &RecognitionRequest) -> Self {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => ApiPart::Text { text: text.clone() },
                Part::Image(photo) => ApiPart::Image {
                    inline_data: InlineData {
                        mime_type: photo.mime_type.clone(),
                        data: photo.to_base64(),
                    },
                },
            })
            .collect();
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            // Low temperature for more consistent output
            generation_config: GenerationConfig { temperature: 0.2 },
        }
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(response: GenerateResponse) -> Result<String, RecognitionError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(RecognitionError::ResponseShape(
            "no text in first candidate".to_string(),
        ));
    }
    Ok(text)
}

/// HTTP client for the Gemini REST API.
///
/// No request timeout is set: a call waits until the service answers or the
/// connection fails.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: &str, endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, body: GenerateRequest) -> Result<String, RecognitionError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RecognitionError::NotConfigured("ROLLCALL_GEMINI_API_KEY is not set".to_string())
        })?;
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            tracing::warn!(status = status.as_u16(), %message, "Gemini request failed");
            return Err(RecognitionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::ResponseShape(e.to_string()))?;
        response_text(parsed)
    }
}

impl RecognitionBackend for GeminiClient {
    fn generate(
        &self,
        request: &RecognitionRequest,
    ) -> impl Future<Output = Result<String, RecognitionError>> + Send {
        let body = GenerateRequest::from(request);
        tracing::debug!(
            model = %self.model,
            parts = body.contents[0].parts.len(),
            "calling Gemini"
        );
        self.send(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Photo;

    #[test]
    fn test_request_body_shape() {
        let request = RecognitionRequest {
            parts: vec![
                Part::Text("who is here?".into()),
                Part::Image(Photo::new("image/jpeg", vec![0, 1, 2])),
            ],
        };
        let body = serde_json::to_value(GenerateRequest::from(&request)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(parts[0]["text"], "who is here?");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], "AAEC");
        assert!(body["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw = r#"{"candidates": [
            {"content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}
        ]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response_text(parsed).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_response_without_candidates() {
        let parsed: GenerateResponse = serde_json::from_str(r#"{"promptFeedback": {}}"#).unwrap();
        assert!(matches!(
            response_text(parsed),
            Err(RecognitionError::ResponseShape(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_without_network() {
        let client = GeminiClient::new(None, "m", "http://127.0.0.1:9");
        let request = RecognitionRequest { parts: Vec::new() };
        assert!(matches!(
            client.generate(&request).await,
            Err(RecognitionError::NotConfigured(_))
        ));
    }
}
