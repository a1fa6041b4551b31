//! Grounded answer generation against a hosted generative model.
//!
//! The client holds a pool of API keys. A call that fails because the active
//! key is exhausted or rejected moves the pool to the next key; the caller
//! decides whether to try again.

use crate::error::{is_credential_status, FailureKind, GenerationError};
use crate::CorpusError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const REFUSAL: &str = "I apologize, but the information needed to answer this specific question is not available in the provided government documents.";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/";

/// Instruction prompt as separate text parts.
pub fn build_prompt(context: &str, query: &str) -> Vec<String> {
    vec![
        "You are an exceptionally accurate and helpful Government Helpdesk Assistant.".to_string(),
        String::new(),
        "**Instructions:**".to_string(),
        "1.  **General Queries**: If the user's question is a general greeting or conversational statement, respond naturally.".to_string(),
        "2.  **Specific Queries**: If the question asks for specific government info, use **only** the provided `Context`.".to_string(),
        "    - If the answer is found, provide it.".to_string(),
        format!("    - If not, respond: \"{REFUSAL}\""),
        String::new(),
        "Context:".to_string(),
        context.to_string(),
        String::new(),
        "Question:".to_string(),
        query.to_string(),
        String::new(),
        "Answer:".to_string(),
    ]
}

/// Ordered API keys plus the index of the active one. Keys are never removed
/// or reordered.
pub struct CredentialPool {
    credentials: Vec<String>,
    active: Mutex<usize>,
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("size", &self.credentials.len())
            .field("active", &self.active_index())
            .finish()
    }
}

impl CredentialPool {
    pub fn new(credentials: Vec<String>) -> Result<Self, CorpusError> {
        let credentials = credentials
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect::<Vec<_>>();

        if credentials.is_empty() {
            return Err(CorpusError::EmptyCredentialPool);
        }

        Ok(Self {
            credentials,
            active: Mutex::new(0),
        })
    }

    /// Comma-separated keys, as read from one environment variable.
    pub fn from_list(raw: &str) -> Result<Self, CorpusError> {
        Self::new(raw.split(',').map(str::to_string).collect())
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn active_index(&self) -> usize {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index and key of the active credential, read under the lock.
    pub fn active(&self) -> (usize, &str) {
        let index = self.active_index();
        (index, self.credentials[index].as_str())
    }

    /// Advances past `failed` if it is still the active key and returns the
    /// key now active. A second caller that failed on the same key finds the
    /// pool already moved and leaves it alone.
    pub fn rotate_from(&self, failed: usize) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active == failed {
            *active = (failed + 1) % self.credentials.len();
            info!(from = failed, to = *active, "rotated api key");
        }
        *active
    }
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(
        &self,
        api_key: &str,
        prompt_parts: &[String],
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Google Gemini `generateContent` over HTTPS.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: Client,
    endpoint: Url,
}

impl GeminiModel {
    pub fn new(model: &str, base_url: Option<&str>) -> Result<Self, GenerationError> {
        let base = Url::parse(base_url.unwrap_or(GEMINI_BASE_URL))
            .map_err(|error| GenerationError::new(FailureKind::Transport, error.to_string()))?;
        let endpoint = base
            .join(&format!("v1beta/models/{model}:generateContent"))
            .map_err(|error| GenerationError::new(FailureKind::Transport, error.to_string()))?;
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    async fn generate(
        &self,
        api_key: &str,
        prompt_parts: &[String],
    ) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: prompt_parts
                    .iter()
                    .map(|part| TextPart { text: part })
                    .collect(),
            }],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }

        response_text(&body)
    }
}

/// Gemini reports an invalid key as 400 with `API_KEY_INVALID` in the body.
fn classify_failure(status: u16, body: &str) -> GenerationError {
    let kind = if is_credential_status(status) || body.contains("API_KEY_INVALID") {
        FailureKind::Credential
    } else {
        FailureKind::Response
    };
    GenerationError::new(kind, format!("upstream returned {status}: {}", body.trim()))
}

fn response_text(body: &str) -> Result<String, GenerationError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|error| GenerationError::new(FailureKind::Response, error.to_string()))?;

    parsed
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .find(|text| !text.trim().is_empty())
        .ok_or_else(|| {
            GenerationError::new(FailureKind::Response, "response contained no text".to_string())
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Answer(String),
    UpstreamFailure { kind: FailureKind, reason: String },
}

impl AnswerOutcome {
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Self::UpstreamFailure {
                kind: FailureKind::Credential,
                ..
            }
        )
    }

    /// Text shown to the end user; failures become an inline error message.
    pub fn render(&self) -> String {
        match self {
            Self::Answer(text) => text.clone(),
            Self::UpstreamFailure { reason, .. } => format!("Error querying Gemini LLM: {reason}"),
        }
    }
}

pub struct AnswerClient {
    pool: CredentialPool,
    model: Arc<dyn GenerativeModel>,
}

impl AnswerClient {
    pub fn new(pool: CredentialPool, model: Arc<dyn GenerativeModel>) -> Self {
        Self { pool, model }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// One upstream call with the active key. Never retries; a credential
    /// failure rotates the pool so the next call uses another key.
    pub async fn answer(&self, context: &str, query: &str) -> AnswerOutcome {
        let (index, api_key) = self.pool.active();
        let parts = build_prompt(context, query);

        match self.model.generate(api_key, &parts).await {
            Ok(text) => AnswerOutcome::Answer(text.trim().to_string()),
            Err(error) => {
                warn!(key_index = index, kind = ?error.kind, reason = %error.reason, "generation failed");
                if error.is_credential_failure() {
                    self.pool.rotate_from(index);
                }
                AnswerOutcome::UpstreamFailure {
                    kind: error.kind,
                    reason: error.reason,
                }
            }
        }
    }

    pub async fn answer_text(&self, context: &str, query: &str) -> String {
        self.answer(context, query).await.render()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::GenerativeModel;
    use crate::error::GenerationError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results and records the key used for each call.
    #[derive(Default)]
    pub(crate) struct ScriptedModel {
        pub(crate) script: Mutex<VecDeque<Result<String, GenerationError>>>,
        pub(crate) keys_seen: Mutex<Vec<String>>,
        pub(crate) prompts: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(script: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        pub(crate) fn keys_seen(&self) -> Vec<String> {
            self.keys_seen.lock().map(|keys| keys.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(
            &self,
            api_key: &str,
            prompt_parts: &[String],
        ) -> Result<String, GenerationError> {
            if let Ok(mut keys) = self.keys_seen.lock() {
                keys.push(api_key.to_string());
            }
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt_parts.to_vec());
            }
            self.script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front())
                .unwrap_or_else(|| Ok("default answer".to_string()))
        }
    }
}
