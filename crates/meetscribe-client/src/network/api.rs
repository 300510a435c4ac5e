use anyhow::Result;
use meetscribe_protocol::{SummarizeRequest, Summary};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

async fn get<T: DeserializeOwned>(url: &str) -> Result<T> {
    let response = reqwest::Client::new().get(url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("Request failed with status {}: {}", status, text);
    }

    Ok(response.json().await?)
}

async fn post<T: DeserializeOwned, B: Serialize>(url: &str, body: &B) -> Result<T> {
    let response = reqwest::Client::new().post(url).json(body).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("Request failed with status {}: {}", status, text);
    }

    Ok(response.json().await?)
}

/// Ask the server to summarize a transcript. Any failure, including an
/// empty reply, comes back as `None`.
pub async fn summarize(
    server_url: &str,
    transcript: &str,
    speaker: Option<&str>,
) -> Option<Summary> {
    let request = SummarizeRequest {
        transcript: transcript.to_string(),
        speaker: speaker.map(str::to_string),
    };

    match post::<Summary, _>(&format!("{}/summarize-transcript", server_url), &request).await {
        Ok(summary) if !summary.is_empty() => Some(summary),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Summarization failed: {}", e);
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct IceServer {
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IceServersResponse {
    ice_servers: Vec<IceServer>,
}

/// STUN urls advertised by the server, or the public default.
pub async fn ice_servers(server_url: &str) -> Vec<String> {
    let url = format!("{}/api/rtc/ice-servers", server_url);
    let urls = match get::<IceServersResponse>(&url).await {
        Ok(response) => response
            .ice_servers
            .into_iter()
            .flat_map(|server| server.urls)
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to fetch ICE servers, using default: {}", e);
            Vec::new()
        }
    };

    if urls.is_empty() {
        vec![DEFAULT_STUN_SERVER.to_string()]
    } else {
        urls
    }
}
