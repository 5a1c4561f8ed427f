// AI Provider Service
// OpenAI-compatible moderation and chat-completion calls behind the Classifier trait

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::{CategoryScore, ClassificationVerdict, MisinformationJudgment};
use crate::services::classifier::{Classifier, ClassifierError};
use crate::services::config_store::AppConfig;
use crate::services::ConfigStore;

const MODERATION_DEFAULT_URL: &str = "https://api.openai.com/v1/moderations";
const CHAT_DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const MODERATION_DEFAULT_MODEL: &str = "omni-moderation-latest";
pub const MISINFORMATION_DEFAULT_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT_SECS: u64 = 80;

const MISINFORMATION_SYSTEM_PROMPT: &str =
    "Analyze the text for misinformation. Return only definite misinformation with high confidence.";

#[derive(Debug, Clone, Serialize)]
struct ModerationRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: HashMap<String, Option<bool>>,
    #[serde(default)]
    category_scores: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: i32,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Classifier backed by the OpenAI moderation and chat-completion endpoints.
pub struct OpenAiClassifier {
    client: Client,
    api_key: String,
    moderation_url: String,
    chat_url: String,
    moderation_model: String,
    misinformation_model: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ClassifierError> {
        Self::build(api_key.into(), None)
    }

    /// Build from stored configuration: API key, proxy, per-provider model and URL.
    pub fn from_config(config: &AppConfig) -> Result<Self, ClassifierError> {
        let api_key = get_api_key("openai")
            .or_else(|| config.api_keys.get("openai").filter(|k| !k.trim().is_empty()).cloned())
            .ok_or(ClassifierError::MissingApiKey)?;
        let proxy = config.proxy.as_ref().and_then(|p| p.active_url());
        let mut classifier = Self::build(api_key, proxy)?;

        if let Some(provider) = config.providers.get("openai").filter(|p| p.enabled) {
            if let Some(model) = provider.model.as_deref().filter(|m| !m.trim().is_empty()) {
                classifier.misinformation_model = model.to_string();
            }
            if let Some(base) = provider.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
                let base = base.trim_end_matches('/');
                classifier.moderation_url = format!("{}/moderations", base);
                classifier.chat_url = format!("{}/chat/completions", base);
            }
        }
        Ok(classifier)
    }

    fn build(api_key: String, proxy_url: Option<&str>) -> Result<Self, ClassifierError> {
        if api_key.trim().is_empty() {
            return Err(ClassifierError::MissingApiKey);
        }

        let mut builder = Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        if let Some(url) = proxy_url {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| ClassifierError::Permanent(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ClassifierError::Permanent(format!("HTTP client: {}", e)))?;

        let moderation_url =
            env::var("OPENAI_MODERATION_URL").unwrap_or_else(|_| MODERATION_DEFAULT_URL.to_string());
        let chat_url = env::var("OPENAI_CHAT_URL").unwrap_or_else(|_| CHAT_DEFAULT_URL.to_string());

        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            moderation_url,
            chat_url,
            moderation_model: MODERATION_DEFAULT_MODEL.to_string(),
            misinformation_model: MISINFORMATION_DEFAULT_MODEL.to_string(),
        })
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<String, ClassifierError> {
        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ClassifierError::Permanent(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| e.to_string());
        debug!(
            "[PROVIDER] POST {} status={} latency_ms={}",
            url,
            status.as_u16(),
            start.elapsed().as_millis()
        );

        classify_status(status, text)
    }
}

/// Map an HTTP status and the outcome of reading its body to the classifier
/// failure taxonomy. A 429 stays rate limited even if its body was lost.
fn classify_status(status: StatusCode, body: Result<String, String>) -> Result<String, ClassifierError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let detail = body.unwrap_or_else(|e| format!("(body unreadable: {})", e));
        return Err(ClassifierError::RateLimited(format!("{} - {}", status.as_u16(), detail)));
    }
    let body = body.map_err(|e| {
        ClassifierError::Permanent(format!("failed to read response body ({}): {}", status.as_u16(), e))
    })?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ClassifierError::Permanent(format!("API error: {} - {}", status.as_u16(), body)))
    }
}

fn parse_moderation_response(body: &str) -> Result<ClassificationVerdict, ClassifierError> {
    let data: ModerationResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::MalformedResponse(format!("moderation JSON: {}", e)))?;
    let result = data
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ClassifierError::MalformedResponse("no moderation results".to_string()))?;

    // Scores drive the category set; flags missing from `categories` count as not flagged.
    let categories: BTreeMap<String, CategoryScore> = result
        .category_scores
        .into_iter()
        .map(|(name, score)| {
            let is_flagged = result
                .categories
                .get(&name)
                .copied()
                .flatten()
                .unwrap_or(false);
            (name, CategoryScore { is_flagged, score })
        })
        .collect();

    let verdict = ClassificationVerdict {
        flagged: result.flagged,
        categories,
    };
    if let Some((name, score)) = verdict.invalid_category() {
        return Err(ClassifierError::MalformedResponse(format!(
            "category {} score {} outside [0, 1]",
            name, score
        )));
    }
    Ok(verdict)
}

fn parse_misinformation_response(body: &str) -> Result<MisinformationJudgment, ClassifierError> {
    let data: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::MalformedResponse(format!("chat JSON: {}", e)))?;
    let content = data
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| ClassifierError::MalformedResponse("missing content in response".to_string()))?;

    let json_str = extract_json(content.trim())?;
    let mut judgment: MisinformationJudgment = serde_json::from_str(json_str)
        .map_err(|e| ClassifierError::MalformedResponse(format!("judgment JSON: {}", e)))?;
    judgment.confidence = judgment.confidence.clamp(0.0, 1.0);
    Ok(judgment)
}

/// Extract the JSON object from response content that may carry prose around it.
fn extract_json(content: &str) -> Result<&str, ClassifierError> {
    if content.starts_with('{') {
        Ok(content)
    } else if let Some(start) = content.find('{') {
        match content.rfind('}') {
            Some(end) if end > start => Ok(&content[start..=end]),
            _ => Err(ClassifierError::MalformedResponse("invalid JSON response".to_string())),
        }
    } else {
        Err(ClassifierError::MalformedResponse("no JSON in response".to_string()))
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, text: &str) -> Result<ClassificationVerdict, ClassifierError> {
        let request = ModerationRequest {
            model: &self.moderation_model,
            input: text,
        };
        let body = self.post_json(&self.moderation_url, &request).await?;
        parse_moderation_response(&body)
    }

    async fn analyze_misinformation(
        &self,
        text: &str,
    ) -> Result<MisinformationJudgment, ClassifierError> {
        let request = ChatRequest {
            model: &self.misinformation_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MISINFORMATION_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Text:\n\n{}\n\nReturn JSON: is_misinformation (boolean), confidence (0-1), explanation, correction.",
                        text
                    ),
                },
            ],
            max_tokens: 300,
            temperature: 0.1,
            response_format: ResponseFormat {
                r#type: "json_object".to_string(),
            },
        };
        let body = self.post_json(&self.chat_url, &request).await?;
        parse_misinformation_response(&body)
    }
}

/// Get API key from environment or config file
pub fn get_api_key(provider: &str) -> Option<String> {
    // Try environment variables first
    let env_keys = match provider {
        "openai" => vec!["OPENAI_API_KEY", "TRANSCRIPT_GUARD_OPENAI_API_KEY"],
        _ => vec![],
    };

    for key in env_keys {
        if let Ok(val) = env::var(key) {
            let v = val.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }

    // Try config file
    if let Some(config_dir) = ConfigStore::default_config_dir() {
        let store = ConfigStore::new(config_dir);
        if let Ok(Some(key)) = store.get_api_key(provider) {
            return Some(key);
        }
    }

    None
}
