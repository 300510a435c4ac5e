use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A room member as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberData {
    pub session_id: Uuid,
    pub name: String,
}

impl MemberData {
    pub fn new(session_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            session_id,
            name: name.into(),
        }
    }
}

/// Body of `POST /summarize-transcript`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub transcript: String,
    /// Restrict the summary to a single speaker. An empty string means no filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl SummarizeRequest {
    /// The speaker filter, treating a blank name as absent
    pub fn speaker_filter(&self) -> Option<&str> {
        self.speaker
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Summarizer output
///
/// A single-speaker request yields bullet points; an unfiltered request
/// yields one summary per speaker plus an overall summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Summary {
    Speaker {
        summary: Vec<String>,
    },
    Meeting {
        per_speaker: BTreeMap<String, String>,
        overall_summary: String,
    },
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        match self {
            Summary::Speaker { summary } => summary.is_empty(),
            Summary::Meeting {
                per_speaker,
                overall_summary,
            } => per_speaker.is_empty() && overall_summary.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_speaker_is_no_filter() {
        let request = SummarizeRequest {
            transcript: "A: hi".to_string(),
            speaker: Some("  ".to_string()),
        };
        assert_eq!(request.speaker_filter(), None);

        let request: SummarizeRequest =
            serde_json::from_value(json!({ "transcript": "A: hi", "speaker": "A" })).unwrap();
        assert_eq!(request.speaker_filter(), Some("A"));
    }

    #[test]
    fn summary_shapes_are_distinguished_by_fields() {
        let bullets: Summary =
            serde_json::from_value(json!({ "summary": ["greeted everyone"] })).unwrap();
        assert_eq!(
            bullets,
            Summary::Speaker {
                summary: vec!["greeted everyone".to_string()]
            }
        );

        let meeting: Summary = serde_json::from_value(json!({
            "per_speaker": { "A": "said hello", "B": "said goodbye" },
            "overall_summary": "short meeting"
        }))
        .unwrap();
        match meeting {
            Summary::Meeting {
                per_speaker,
                overall_summary,
            } => {
                assert_eq!(per_speaker.len(), 2);
                assert_eq!(overall_summary, "short meeting");
            }
            other => panic!("expected meeting summary, got {:?}", other),
        }
    }
}
