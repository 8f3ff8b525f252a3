//! Google Gemini `generateContent` adapter.

use super::{
    GenerationClient, GenerationClientError, GenerationOutput, GenerationRequest, http_client,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Client for the Gemini REST API.
pub struct GeminiGenerationClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiGenerationClient {
    /// Create a client; `base_url` defaults to the public Gemini endpoint.
    pub fn new(
        base_url: Option<String>,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, GenerationClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string()),
            model,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<i64>,
}

impl GenerateContentResponse {
    fn into_output(self) -> GenerationOutput {
        let text = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        GenerationOutput {
            text,
            tokens_used: self
                .usage_metadata
                .and_then(|usage| usage.total_token_count),
        }
    }
}

#[async_trait]
impl GenerationClient for GeminiGenerationClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationClientError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt() }],
            }],
        });

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to reach Gemini at {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GenerationClientError::ProviderUnavailable(format!(
                "Gemini rejected the API key ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "Gemini returned {status}: {body}"
            )));
        }

        let body: GenerateContentResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Gemini response: {error}"
            ))
        })?;

        Ok(body.into_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client(server: &MockServer) -> GeminiGenerationClient {
        GeminiGenerationClient::new(
            Some(server.base_url()),
            "gemini-2.0-flash-001".into(),
            "test-key".into(),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            context: "hello world".into(),
            question: "hi?".into(),
        }
    }

    #[tokio::test]
    async fn returns_candidate_text_and_usage() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash-001:generateContent")
                    .header("x-goog-api-key", "test-key")
                    .body_contains("Answer this question: hi?");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": " Hello! " }], "role": "model" }
                    }],
                    "usageMetadata": { "totalTokenCount": 17 }
                }));
            })
            .await;

        let output = client(&server).generate(request()).await.expect("output");

        mock.assert_async().await;
        assert_eq!(output.text, " Hello! ");
        assert_eq!(output.tokens_used, Some(17));
    }

    #[tokio::test]
    async fn missing_candidates_yield_empty_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({ "promptFeedback": {} }));
            })
            .await;

        let output = client(&server).generate(request()).await.expect("output");
        assert!(output.text.is_empty());
        assert_eq!(output.tokens_used, None);
    }

    #[tokio::test]
    async fn error_status_is_generation_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500).body("boom");
            })
            .await;

        let error = client(&server).generate(request()).await.unwrap_err();
        assert!(
            matches!(&error, GenerationClientError::GenerationFailed(message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn rejected_key_is_provider_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(403).body("denied");
            })
            .await;

        let error = client(&server).generate(request()).await.unwrap_err();
        assert!(matches!(error, GenerationClientError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn undecodable_body_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).body("not json");
            })
            .await;

        let error = client(&server).generate(request()).await.unwrap_err();
        assert!(matches!(error, GenerationClientError::InvalidResponse(_)));
    }
}
