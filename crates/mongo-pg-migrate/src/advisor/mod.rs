//! HTTP advisor backed by a chat-completions endpoint.
//!
//! The advisor is asked for two things: a destination table for a collection
//! schema, and a field mapping onto existing columns. Answers are expected as
//! JSON, optionally wrapped in a fenced code block. Anything that fails
//! (transport, status, shape) is logged and surfaces as `None`, which callers
//! treat exactly like an unconfigured advisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::AdvisorConfig;
use crate::core::{Advisor, CollectionSchema, ColumnDescriptor, ColumnMapping, Document};
use crate::error::{MigrateError, Result};

const MAX_ATTEMPTS: u32 = 3;

/// Advisor talking to an OpenAI-compatible chat-completions API.
pub struct HttpAdvisor {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct TableProposal {
    columns: Vec<ColumnDescriptor>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MappingProposal {
    Wrapped { mappings: Vec<ColumnMapping> },
    Bare(Vec<ColumnMapping>),
}

impl HttpAdvisor {
    /// Build an advisor. Returns `None` when no API key is available.
    pub fn from_config(config: &AdvisorConfig) -> Option<Self> {
        let Some(api_key) = config.resolved_api_key() else {
            warn!("Advisor configured without an API key; using deterministic fallback");
            return None;
        };

        let client = match Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("mongo-pg-migrate/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build advisor HTTP client: {}", e);
                return None;
            }
        };

        Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Shared handle for the orchestrator.
    pub fn shared(config: Option<&AdvisorConfig>) -> Option<Arc<dyn Advisor>> {
        config
            .and_then(Self::from_config)
            .map(|a| Arc::new(a) as Arc<dyn Advisor>)
    }

    /// Send a prompt and return the assistant's reply text.
    async fn complete(&self, system: &str, user: String) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
        };

        let mut delay = Duration::from_millis(500);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Advisor request {}/{} to {}", attempt, MAX_ATTEMPTS, self.endpoint);

            let retryable = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| MigrateError::Advisor(format!("invalid response body: {}", e)))?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| MigrateError::Advisor("response had no choices".into()));
                }
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Err(MigrateError::Advisor(format!("HTTP {}", status)));
                    }
                    format!("HTTP {}", status)
                }
                Err(e) => e.to_string(),
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(MigrateError::Advisor(format!(
                    "giving up after {} attempts: {}",
                    attempt, retryable
                )));
            }
            warn!("Advisor request failed ({}), retrying", retryable);
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, Duration::from_secs(8));
        }
    }
}

const TABLE_SYSTEM_PROMPT: &str = "You design PostgreSQL tables for MongoDB collections. \
Reply with JSON only: {\"columns\": [{\"name\": string, \"type\": string, \"nullable\": bool, \
\"primary_key\": bool, \"unique\": bool}]}. Use snake_case names. Include a primary key column \
named id for the document _id.";

const MAPPING_SYSTEM_PROMPT: &str = "You map MongoDB document fields onto existing PostgreSQL \
columns. Reply with JSON only: {\"mappings\": [{\"source_field\": dotted path, \
\"destination_column\": column name, \"transformation\": optional string}]}. Only use columns \
that exist. Omit fields that have no suitable column.";

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn propose_table(&self, schema: &CollectionSchema) -> Option<Vec<ColumnDescriptor>> {
        let prompt = match serde_json::to_string_pretty(schema) {
            Ok(s) => format!("Collection schema:\n{}", s),
            Err(e) => {
                warn!("Could not encode schema for advisor: {}", e);
                return None;
            }
        };

        let result = self
            .complete(TABLE_SYSTEM_PROMPT, prompt)
            .await
            .and_then(|reply| parse_reply::<TableProposal>(&reply));

        match result {
            Ok(proposal) if !proposal.columns.is_empty() => Some(proposal.columns),
            Ok(_) => None,
            Err(e) => {
                warn!("Advisor table proposal for {} unavailable: {}", schema.name, e);
                None
            }
        }
    }

    async fn propose_mapping(
        &self,
        sample: &Document,
        columns: &[ColumnDescriptor],
    ) -> Option<Vec<ColumnMapping>> {
        let prompt = json!({
            "sample_document": sample.to_json(),
            "columns": columns,
        });
        let prompt = format!("Input:\n{}", prompt);

        let result = self
            .complete(MAPPING_SYSTEM_PROMPT, prompt)
            .await
            .and_then(|reply| parse_reply::<MappingProposal>(&reply));

        match result {
            Ok(MappingProposal::Wrapped { mappings }) | Ok(MappingProposal::Bare(mappings))
                if !mappings.is_empty() =>
            {
                Some(mappings)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Advisor mapping proposal unavailable: {}", e);
                None
            }
        }
    }
}

/// Pull the JSON payload out of a reply.
///
/// Prefers a fenced code block; otherwise takes the span from the first
/// opening brace or bracket to the last matching closer.
pub fn extract_json_block(reply: &str) -> Option<&str> {
    if let Some(start) = reply.find("```") {
        let after = &reply[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }

    let open = reply.find(|c: char| c == '{' || c == '[')?;
    let closer = if reply[open..].starts_with('{') { '}' } else { ']' };
    let close = reply.rfind(closer)?;
    (close > open).then(|| &reply[open..=close])
}

fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let block = extract_json_block(reply)
        .ok_or_else(|| MigrateError::Advisor("reply contained no JSON".into()))?;
    serde_json::from_str(block).map_err(|e| MigrateError::Advisor(format!("unexpected reply shape: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_block() {
        let reply = "Here you go:\n```json\n{\"columns\": []}\n```\nThanks";
        assert_eq!(extract_json_block(reply), Some("{\"columns\": []}"));
    }

    #[test]
    fn test_extract_bare_json() {
        assert_eq!(extract_json_block("sure: [1, 2] ok"), Some("[1, 2]"));
        assert_eq!(extract_json_block("{\"a\": {\"b\": 1}}"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn test_parse_table_proposal() {
        let reply = r#"```json
{"columns": [
  {"name": "id", "type": "varchar(24)", "primary_key": true, "nullable": false},
  {"name": "email", "type": "text", "unique": true}
]}
```"#;
        let proposal: TableProposal = parse_reply(reply).unwrap();
        assert_eq!(
            proposal.columns,
            vec![
                ColumnDescriptor::new("id", "varchar(24)").primary(),
                ColumnDescriptor::new("email", "text").unique(),
            ]
        );
    }

    #[test]
    fn test_parse_mapping_wrapped_and_bare() {
        let wrapped = r#"{"mappings": [{"source_field": "_id", "destination_column": "id"}]}"#;
        let bare = r#"[{"sourceField": "_id", "destinationColumn": "id"}]"#;
        for reply in [wrapped, bare] {
            let mappings = match parse_reply::<MappingProposal>(reply).unwrap() {
                MappingProposal::Wrapped { mappings } | MappingProposal::Bare(mappings) => mappings,
            };
            assert_eq!(mappings, vec![ColumnMapping::new("_id", "id")]);
        }
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_reply::<TableProposal>("I cannot help with that").is_err());
        assert!(parse_reply::<TableProposal>("{\"rows\": 1}").is_err());
    }

    #[test]
    fn test_missing_key_disables_advisor() {
        let config = AdvisorConfig {
            api_key: String::new(),
            endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            model: "m".to_string(),
            timeout_secs: 1,
        };
        if std::env::var(crate::config::ADVISOR_KEY_ENV).is_err() {
            assert!(HttpAdvisor::from_config(&config).is_none());
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_none() {
        let config = AdvisorConfig {
            api_key: "k".to_string(),
            // Discard port; nothing listens there.
            endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            model: "m".to_string(),
            timeout_secs: 1,
        };
        let advisor = HttpAdvisor::from_config(&config).unwrap();
        let schema = CollectionSchema::empty("users");
        assert!(advisor.propose_table(&schema).await.is_none());
    }
}
