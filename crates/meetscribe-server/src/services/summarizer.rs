//! Transcript summarization through a hosted language model.

use anyhow::{Context, Result};
use async_trait::async_trait;
use meetscribe_protocol::Summary;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `transcript`, optionally for a single speaker.
    async fn summarize(&self, transcript: &str, speaker: Option<&str>) -> Result<Summary>;
}

pub struct GeminiSummarizer {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GeminiSummarizer {
    pub fn new(api_key: Option<String>, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
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

impl GenerateContentResponse {
    fn first_text(&self) -> &str {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.as_deref())
            .unwrap_or("")
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    async fn summarize(&self, transcript: &str, speaker: Option<&str>) -> Result<Summary> {
        let api_key = self
            .api_key
            .as_deref()
            .context("GEMINI_API_KEY is not configured")?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(transcript, speaker) }] }]
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .context("Failed to reach summarizer")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Summarizer returned {}: {}", status, text);
        }

        let reply: GenerateContentResponse = response.json().await?;
        Ok(parse_summary(reply.first_text(), speaker))
    }
}

pub fn build_prompt(transcript: &str, speaker: Option<&str>) -> String {
    match speaker {
        Some(speaker) => format!(
            "You are a meeting assistant. Summarize the following transcript for the speaker {speaker} \
             into concise bullet points, and highlight any important action items or decisions.\n\n\
             Transcript:\n{transcript}\n\n\
             Return strictly in JSON format like:\n\
             {{\n  \"summary\": [\n    \"summary point 1\",\n    \"action item 1\",\n    \"decision 1\"\n  ]\n}}"
        ),
        None => format!(
            "You are a meeting assistant. Summarize the following meeting transcript. For each speaker, \
             provide a brief summary of what they said. Then, provide an overall meeting summary.\n\n\
             Transcript:\n{transcript}\n\n\
             Return strictly in JSON format like:\n\
             {{\n  \"per_speaker\": {{\n    \"User_A\": \"summary for User_A\",\n    \"User_B\": \"summary for User_B\"\n  }},\n  \
             \"overall_summary\": \"overall meeting summary\"\n}}"
        ),
    }
}

/// Interpret a model reply. Anything that is not the requested JSON shape
/// is kept as a single free-text summary.
pub fn parse_summary(raw: &str, speaker: Option<&str>) -> Summary {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    let parsed: Option<Value> = serde_json::from_str(cleaned).ok();

    match speaker {
        Some(_) => {
            let summary = match parsed.as_ref().and_then(|v| v.get("summary")) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
                Some(Value::String(s)) => vec![s.clone()],
                _ if parsed.is_some() => Vec::new(),
                _ => vec![cleaned.to_string()],
            };
            Summary::Speaker { summary }
        }
        None => match parsed {
            Some(value) => {
                let per_speaker: BTreeMap<String, String> = value
                    .get("per_speaker")
                    .and_then(Value::as_object)
                    .map(|map| {
                        map.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                let overall_summary = value
                    .get("overall_summary")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Summary::Meeting {
                    per_speaker,
                    overall_summary,
                }
            }
            None => Summary::Meeting {
                per_speaker: BTreeMap::new(),
                overall_summary: cleaned.to_string(),
            },
        },
    }
}
