//! Claude-backed narrator using the Anthropic Messages API.

use super::{NarrativeError, Narrator, OutcomeSummary, RoundSummary};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_SYSTEM_PROMPT: &str = "You are the announcer of a gladiatorial arena. \
Describe what happened in two or three vivid sentences. Use the fighters' names, \
the abilities they used and the exact damage numbers given. Never change the outcome.";

/// Configuration for the Claude narrator.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// The model to use (defaults to claude-sonnet-4-20250514).
    pub model: Option<String>,

    /// Maximum tokens for responses.
    pub max_tokens: usize,

    /// Temperature for generation.
    pub temperature: Option<f32>,

    /// System prompt customization.
    pub custom_system_prompt: Option<String>,

    /// Upper bound on a whole request, including reading the body.
    pub request_timeout: Duration,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 300,
            temperature: Some(0.9),
            custom_system_prompt: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    system: &'a str,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Narrator that asks Claude for flavour text.
#[derive(Clone)]
pub struct ClaudeNarrator {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    config: NarratorConfig,
}

impl ClaudeNarrator {
    /// Create a narrator with the given API key.
    pub fn new(api_key: impl Into<String>, config: NarratorConfig) -> Result<Self, NarrativeError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| NarrativeError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            api_base: API_BASE.to_string(),
            config,
        })
    }

    /// Point the narrator at a different Messages API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Create a narrator from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env(config: NarratorConfig) -> Result<Self, NarrativeError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| NarrativeError::NoApiKey)?;
        Self::new(api_key, config)
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    fn build_headers(&self) -> Result<HeaderMap, NarrativeError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| NarrativeError::NoApiKey)?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    async fn complete(&self, prompt: String) -> Result<String, NarrativeError> {
        let request = ApiRequest {
            model: self.config.model.as_deref().unwrap_or(DEFAULT_MODEL),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: self
                .config
                .custom_system_prompt
                .as_deref()
                .unwrap_or(DEFAULT_SYSTEM_PROMPT),
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.api_base))
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| NarrativeError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NarrativeError::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| NarrativeError::Parse(e.to_string()))?;

        let text: String = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ApiContent::Text { text } => Some(text),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(NarrativeError::Empty);
        }
        Ok(text.trim().to_string())
    }
}

pub(crate) fn round_prompt(summary: &RoundSummary) -> String {
    format!(
        "Round {round}. {first} moved first.\n\
         {red} (red) used {red_action}: {red_damage} damage{red_crit}. {red} has {red_hp} HP left.\n\
         {blue} (blue) used {blue_action}: {blue_damage} damage{blue_crit}. {blue} has {blue_hp} HP left.\n\
         Crowd energy: {energy}/100.",
        round = summary.round,
        first = summary.first,
        red = summary.red_name,
        red_action = summary.red_action,
        red_damage = summary.red_damage,
        red_crit = if summary.red_critical { " (critical hit)" } else { "" },
        red_hp = summary.red_hp,
        blue = summary.blue_name,
        blue_action = summary.blue_action,
        blue_damage = summary.blue_damage,
        blue_crit = if summary.blue_critical { " (critical hit)" } else { "" },
        blue_hp = summary.blue_hp,
        energy = summary.crowd_energy,
    )
}

pub(crate) fn outcome_prompt(outcome: &OutcomeSummary) -> String {
    format!(
        "The battle is over after {} rounds. {} defeated {}{} with {} HP remaining.{}",
        outcome.rounds,
        outcome.winner_name,
        outcome.loser_name,
        if outcome.knockout { " by knockout" } else { " on points" },
        outcome.winner_hp,
        if outcome.epic { " Call it an epic victory." } else { "" }
    )
}

#[async_trait]
impl Narrator for ClaudeNarrator {
    async fn narrate_round(&self, summary: &RoundSummary) -> Result<String, NarrativeError> {
        self.complete(round_prompt(summary)).await
    }

    async fn narrate_outcome(&self, outcome: &OutcomeSummary) -> Result<String, NarrativeError> {
        self.complete(outcome_prompt(outcome)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::Side;

    #[test]
    fn test_round_prompt_mentions_numbers() {
        let summary = RoundSummary {
            round: 1,
            red_name: "Ash".to_string(),
            blue_name: "Bryn".to_string(),
            red_action: "Strike".to_string(),
            blue_action: "Defend".to_string(),
            red_damage: 14,
            blue_damage: 6,
            red_critical: true,
            blue_critical: false,
            first: Side::Red,
            red_hp: 125,
            blue_hp: 111,
            crowd_energy: 40,
        };
        let prompt = round_prompt(&summary);
        assert!(prompt.starts_with("Round 1. red moved first."));
        assert!(prompt.contains("Strike: 14 damage (critical hit)"));
        assert!(prompt.contains("Defend: 6 damage."));
        assert!(prompt.contains("Crowd energy: 40/100."));
    }

    #[test]
    fn test_request_serialization() {
        let request = ApiRequest {
            model: DEFAULT_MODEL,
            max_tokens: 300,
            temperature: None,
            system: DEFAULT_SYSTEM_PROMPT,
            messages: vec![ApiMessage {
                role: "user",
                content: "hi".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_parsing_skips_non_text() {
        let body = r#"{"content":[{"type":"text","text":"Blades ring out."},{"type":"tool_use","id":"x"}]}"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(
            &parsed.content[0],
            ApiContent::Text { text } if text == "Blades ring out."
        ));
    }

    #[tokio::test]
    async fn test_stalled_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = NarratorConfig {
            request_timeout: Duration::from_millis(200),
            ..NarratorConfig::default()
        };
        let narrator = ClaudeNarrator::new("test-key", config)
            .unwrap()
            .with_api_base(format!("http://{addr}"));
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            narrator.narrate_outcome(&OutcomeSummary {
                winner_name: "Ash".to_string(),
                loser_name: "Bryn".to_string(),
                winner_side: Side::Red,
                rounds: 3,
                winner_hp: 40,
                epic: false,
                knockout: true,
            }),
        )
        .await
        .expect("client timeout should fire first");
        assert!(matches!(result, Err(NarrativeError::Network(_))));
        server.abort();
    }
}
