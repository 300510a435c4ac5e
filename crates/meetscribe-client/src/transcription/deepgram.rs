use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::{RecognitionResult, RecognitionSession, SpeechRecognizer};
use crate::media::audio::pcm16_le_bytes;

pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Deepgram streaming speech-to-text over a WebSocket
pub struct DeepgramRecognizer {
    api_key: String,
    endpoint: String,
}

impl DeepgramRecognizer {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, DEEPGRAM_LISTEN_URL.to_string())
    }

    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self { api_key, endpoint }
    }

    fn listen_url(&self, sample_rate: u32) -> String {
        format!(
            "{}?punctuate=true&interim_results=true&encoding=linear16&sample_rate={}&channels=1",
            self.endpoint, sample_rate
        )
    }
}

#[async_trait]
impl SpeechRecognizer for DeepgramRecognizer {
    async fn open(&self, sample_rate: u32) -> Result<RecognitionSession> {
        let mut request = self.listen_url(sample_rate).into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_str(&format!("token, {}", self.api_key))?,
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to Deepgram")?;
        let (mut write, mut read) = ws_stream.split();

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(64);
        let (results_tx, results_rx) = mpsc::channel::<RecognitionResult>(64);

        tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                if write
                    .send(Message::Binary(pcm16_le_bytes(&frame).into()))
                    .await
                    .is_err()
                {
                    tracing::warn!("Failed to stream audio to Deepgram");
                    return;
                }
            }
            // Flush whatever Deepgram still holds before closing
            let _ = write
                .send(Message::Text(r#"{"type":"CloseStream"}"#.to_string().into()))
                .await;
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(result) = parse_result(text.as_str()) {
                            if results_tx.send(result).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("Deepgram closed the stream: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Deepgram WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(RecognitionSession {
            audio: audio_tx,
            results: results_rx,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    channel: Option<Channel>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Extract the top hypothesis from a Deepgram message. Metadata messages
/// and empty transcripts yield nothing.
pub fn parse_result(raw: &str) -> Option<RecognitionResult> {
    let response: ListenResponse = serde_json::from_str(raw).ok()?;
    let text = response.channel?.alternatives.into_iter().next()?.transcript;
    if text.is_empty() {
        return None;
    }
    Some(RecognitionResult {
        text,
        is_final: response.is_final,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_hypothesis() {
        let raw = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":"hello world","confidence":0.98},{"transcript":"hollow world"}]}}"#;
        assert_eq!(
            parse_result(raw),
            Some(RecognitionResult {
                text: "hello world".to_string(),
                is_final: true
            })
        );
    }

    #[test]
    fn interim_hypothesis_is_not_final() {
        let raw = r#"{"channel":{"alternatives":[{"transcript":"hel"}]},"is_final":false}"#;
        assert_eq!(parse_result(raw).map(|r| r.is_final), Some(false));
    }

    #[test]
    fn ignores_metadata_and_silence() {
        assert_eq!(parse_result(r#"{"type":"Metadata","request_id":"abc"}"#), None);
        assert_eq!(
            parse_result(r#"{"is_final":true,"channel":{"alternatives":[{"transcript":""}]}}"#),
            None
        );
        assert_eq!(parse_result("not json"), None);
    }

    #[test]
    fn listen_url_carries_audio_format() {
        let recognizer = DeepgramRecognizer::new("key".to_string());
        assert_eq!(
            recognizer.listen_url(48000),
            "wss://api.deepgram.com/v1/listen?punctuate=true&interim_results=true&encoding=linear16&sample_rate=48000&channels=1"
        );
    }
}
