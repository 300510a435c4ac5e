//! Live transcription of the local microphone.
//!
//! The [`CaptureBridge`] owns at most one recognition session at a time and
//! forwards only finalized, non-empty text. Mute is checked where text
//! leaves the bridge, so results already in flight when the user mutes are
//! discarded too.

mod deepgram;

pub use deepgram::{DeepgramRecognizer, parse_result};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::media::PcmFrame;

/// A recognizer hypothesis for the audio heard so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,
    pub is_final: bool,
}

/// One open recognition stream. Dropping `audio` ends it.
pub struct RecognitionSession {
    pub audio: mpsc::Sender<Vec<i16>>,
    pub results: mpsc::Receiver<RecognitionResult>,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a session for mono 16-bit PCM at `sample_rate`.
    async fn open(&self, sample_rate: u32) -> Result<RecognitionSession>;
}

pub struct CaptureBridge {
    recognizer: Arc<dyn SpeechRecognizer>,
    audio: broadcast::Sender<PcmFrame>,
    sample_rate: u32,
    output: mpsc::UnboundedSender<String>,
    muted: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    listening: bool,
    active: Option<JoinHandle<()>>,
}

impl CaptureBridge {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        audio: broadcast::Sender<PcmFrame>,
        sample_rate: u32,
        output: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            recognizer,
            audio,
            sample_rate,
            output,
            muted: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            listening: false,
            active: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Request transcription. Capture starts now unless muted, in which
    /// case it starts on unmute. A failure to reach the recognizer leaves
    /// capture stopped.
    pub async fn start_listening(&mut self) -> Result<()> {
        self.listening = true;
        if self.is_muted() || self.active.is_some() {
            return Ok(());
        }
        self.start_session().await
    }

    pub fn stop_listening(&mut self) {
        self.listening = false;
        self.stop_session();
    }

    /// Muting stops capture but keeps the listening request. Unmuting while
    /// listening restarts capture from a clean state.
    pub async fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.muted.store(muted, Ordering::SeqCst);
        if muted {
            self.stop_session();
            Ok(())
        } else if self.listening {
            self.start_session().await
        } else {
            Ok(())
        }
    }

    async fn start_session(&mut self) -> Result<()> {
        self.stop_session();

        let session = self.recognizer.open(self.sample_rate).await?;
        let generation = self.generation.load(Ordering::SeqCst);
        let frames = self.audio.subscribe();

        tracing::info!("Transcription capture started");
        self.active = Some(tokio::spawn(run_session(
            session,
            frames,
            self.output.clone(),
            self.muted.clone(),
            self.generation.clone(),
            generation,
        )));
        Ok(())
    }

    fn stop_session(&mut self) {
        if let Some(task) = self.active.take() {
            // Anything the old session still produces is stale from here on
            self.generation.fetch_add(1, Ordering::SeqCst);
            task.abort();
            tracing::info!("Transcription capture stopped");
        }
    }
}

impl Drop for CaptureBridge {
    fn drop(&mut self) {
        self.stop_session();
    }
}

async fn run_session(
    session: RecognitionSession,
    mut frames: broadcast::Receiver<PcmFrame>,
    output: mpsc::UnboundedSender<String>,
    muted: Arc<AtomicBool>,
    current: Arc<AtomicU64>,
    generation: u64,
) {
    let RecognitionSession { audio, mut results } = session;

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if audio.send(frame.to_vec()).await.is_err() {
                        tracing::warn!("Recognizer stopped accepting audio");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Transcription skipped {} capture blocks", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            result = results.recv() => match result {
                Some(result) => {
                    let text = result.text.trim();
                    if !result.is_final || text.is_empty() {
                        continue;
                    }
                    let stale = current.load(Ordering::SeqCst) != generation;
                    if muted.load(Ordering::SeqCst) || stale {
                        tracing::debug!("Discarding transcript produced while muted");
                        continue;
                    }
                    if output.send(text.to_string()).is_err() {
                        break;
                    }
                }
                None => {
                    tracing::info!("Recognizer closed the session");
                    break;
                }
            },
        }
    }
}
