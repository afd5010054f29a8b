//! Hypotheses from an OpenAI-compatible chat-completions endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rules::similar_incidents;
use super::HypothesisGenerator;
use crate::config::AnalyzerConfig;
use crate::event::Event;
use crate::storage::{IncidentMemory, SimilarIncident};

const SYSTEM_PROMPT: &str = "You are an SRE. Given an ITOps event and past cases, produce a concise root cause hypothesis and first remediation step.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct LlmAnalyzer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    memory: Arc<dyn IncidentMemory>,
    similar_k: usize,
}

impl LlmAnalyzer {
    pub fn new(config: &AnalyzerConfig, api_key: String, memory: Arc<dyn IncidentMemory>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            memory,
            similar_k: config.similar_k,
        })
    }
}

/// User turn: the event and the similar cases, one per line.
fn user_prompt(event: &Event, similar: &[SimilarIncident]) -> Result<String> {
    let event_json = serde_json::to_string(event)?;
    let similar_text = if similar.is_empty() {
        "(none)".to_string()
    } else {
        similar
            .iter()
            .map(|s| format!("- {}", s.text))
            .collect::<Vec<_>>()
            .join("\n")
    };
    Ok(format!(
        "Event: {event_json}\nSimilarCases: {similar_text}\nRespond in two sentences."
    ))
}

fn extract_content(response: ChatResponse) -> Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.trim().to_string())
        .context("model returned no choices")?;
    anyhow::ensure!(!content.is_empty(), "model returned an empty hypothesis");
    Ok(content)
}

#[async_trait]
impl HypothesisGenerator for LlmAnalyzer {
    async fn analyze(&self, event: &Event) -> Result<String> {
        let similar = similar_incidents(self.memory.as_ref(), event, self.similar_k).await;
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(event, &similar)?,
                },
            ],
        };

        debug!(event_id = %event.id, model = %self.model, "requesting hypothesis");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("hypothesis request failed")?
            .error_for_status()
            .context("hypothesis request rejected")?
            .json::<ChatResponse>()
            .await
            .context("failed to decode hypothesis response")?;

        extract_content(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::{json, Value};

    #[test]
    fn test_user_prompt_lists_similar_cases() {
        let evt = Event::with_json(EventType::ServiceDown, "test", json!({"service": "payments-api"}));
        let similar = vec![SimilarIncident {
            text: "Service down after deploy fixed by rollback".into(),
            metadata: Value::Null,
            score: 0.4,
        }];
        let prompt = user_prompt(&evt, &similar).unwrap();
        assert!(prompt.contains("\"type\":\"service.down\""));
        assert!(prompt.contains("- Service down after deploy fixed by rollback"));
        assert!(prompt.ends_with("Respond in two sentences."));

        let bare = user_prompt(&evt, &[]).unwrap();
        assert!(bare.contains("SimilarCases: (none)"));
    }

    #[test]
    fn test_extract_content() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "  Bad deploy. Roll back.  "}}]
        }))
        .unwrap();
        assert_eq!(extract_content(response).unwrap(), "Bad deploy. Roll back.");

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(extract_content(empty).is_err());
    }

    #[test]
    fn test_endpoint_normalized() {
        struct NoMemory;
        #[async_trait]
        impl IncidentMemory for NoMemory {
            async fn search(&self, _q: &str, _k: usize) -> Result<Vec<SimilarIncident>> {
                Ok(Vec::new())
            }
            async fn record(&self, _s: &str, _m: Value) -> Result<()> {
                Ok(())
            }
        }

        let config = AnalyzerConfig {
            api_base: "http://localhost:1234/v1/".to_string(),
            ..AnalyzerConfig::default()
        };
        let analyzer = LlmAnalyzer::new(&config, "k".to_string(), Arc::new(NoMemory)).unwrap();
        assert_eq!(analyzer.endpoint, "http://localhost:1234/v1/chat/completions");
    }
}
