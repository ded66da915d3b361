use super::{parse_choice, parse_list, Choice, Extraction, Oracle};
use crate::config::OracleConfig;
use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::rate_limiter::{Limits, RateLimiter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Gemini `generateContent` client. Every request, of either shape, draws from the
/// same token bucket.
pub struct GeminiOracle {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    model: String,
    limiter: RateLimiter,
}

impl GeminiOracle {
    pub fn new(api_key: &str, config: &OracleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            limiter: RateLimiter::new(Limits {
                requests_per_min: config.requests_per_min,
                burst: config.burst,
            }),
        })
    }

    /// Reads the key from `GEMINI_API_KEY`.
    pub fn from_env(config: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            PipelineError::Config("GEMINI_API_KEY environment variable not set".to_string())
        })?;
        Self::new(&api_key, config)
    }

    fn request(prompt: &str, response_mime_type: &'static str, response_schema: Value) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type,
                response_schema,
            },
        }
    }

    async fn generate(&self, kind: &'static str, request: &GenerateRequest) -> Result<String> {
        self.limiter.acquire().await;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, kind, "Gemini generateContent request");

        let result = self.send(&url, request).await;
        metrics::record_oracle_request(kind, result.is_ok());
        result
    }

    async fn send(&self, url: &str, request: &GenerateRequest) -> Result<String> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::Oracle {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.text())
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    #[instrument(skip(self, prompt))]
    async fn choose_one(&self, prompt: &str, allowed: &[String]) -> Result<Choice> {
        let schema = json!({ "type": "STRING", "enum": allowed });
        let request = Self::request(prompt, "text/x.enum", schema);
        let raw = self.generate("choose_one", &request).await?;
        Ok(parse_choice(&raw, allowed))
    }

    #[instrument(skip(self, prompt))]
    async fn extract_list(&self, prompt: &str) -> Result<Extraction> {
        let schema = json!({ "type": "ARRAY", "items": { "type": "STRING" } });
        let request = Self::request(prompt, "application/json", schema);
        let raw = self.generate("extract_list", &request).await?;
        Ok(parse_list(&raw))
    }
}
