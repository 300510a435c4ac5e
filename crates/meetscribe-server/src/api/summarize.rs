use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{Json, extract::State};
use meetscribe_protocol::{SummarizeRequest, Summary};

pub async fn summarize_transcript(
    State(state): State<AppState>,
    Json(request): Json<SummarizeRequest>,
) -> Result<Json<Summary>> {
    if request.transcript.trim().is_empty() {
        return Err(AppError::BadRequest("Transcript must not be empty".to_string()));
    }

    let speaker = request.speaker_filter();
    tracing::debug!(
        "Summarizing {} bytes of transcript (speaker: {:?})",
        request.transcript.len(),
        speaker
    );

    let summary = state
        .summarizer
        .summarize(&request.transcript, speaker)
        .await
        .map_err(AppError::Upstream)?;

    Ok(Json(summary))
}
