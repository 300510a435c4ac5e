use anyhow::Result;
use clap::Parser;
use meetscribe_client::console::{self, ConsoleInput};
use meetscribe_client::media::{LocalMedia, MicrophoneCapture, WebRtcConnector};
use meetscribe_client::network::{RelayClient, api};
use meetscribe_client::state::RoomState;
use meetscribe_client::transcription::DeepgramRecognizer;
use meetscribe_client::{Command, RoomSession};
use meetscribe_protocol::Summary;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "meetscribe")]
#[command(about = "Join a MeetScribe room with live transcription")]
struct Args {
    /// Server base URL
    #[arg(long, env = "MEETSCRIBE_SERVER_URL", default_value = "http://localhost:5000")]
    server_url: String,

    /// Room code to join
    #[arg(long, env = "MEETSCRIBE_ROOM")]
    room: String,

    /// Display name shown to other participants
    #[arg(long, env = "MEETSCRIBE_NAME")]
    name: String,

    /// Deepgram API key; transcription is unavailable without it
    #[arg(long, env = "DEEPGRAM_API_KEY", hide_env_values = true)]
    deepgram_api_key: Option<String>,

    /// Start transcribing as soon as the room is joined
    #[arg(long)]
    transcribe: bool,

    /// Join with the microphone muted
    #[arg(long)]
    muted: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meetscribe=debug,meetscribe_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let server_url = args.server_url.trim_end_matches('/').to_string();

    tracing::info!("Starting MeetScribe client...");

    let ice_servers = api::ice_servers(&server_url).await;

    let microphone = match MicrophoneCapture::start() {
        Ok(mic) => Some(mic),
        Err(e) => {
            tracing::warn!("Microphone unavailable, joining without audio: {}", e);
            None
        }
    };

    let local_media = LocalMedia::new();
    let publisher = microphone
        .as_ref()
        .map(|mic| local_media.spawn_publisher(mic.frames().subscribe(), mic.sample_rate()));

    let connector = Arc::new(WebRtcConnector::new(ice_servers, local_media.clone())?);

    let ws_url = format!(
        "{}/ws",
        server_url
            .replace("http://", "ws://")
            .replace("https://", "wss://")
    );
    let (relay, inbound) = RelayClient::connect(&ws_url).await?;

    let state = RoomState::new();
    let mut session =
        RoomSession::new(relay, inbound, connector, state.clone()).with_local_media(local_media);

    match (&args.deepgram_api_key, &microphone) {
        (Some(key), Some(mic)) => {
            session = session.with_capture(
                Arc::new(DeepgramRecognizer::new(key.clone())),
                mic.frames(),
                mic.sample_rate(),
            );
        }
        _ if args.transcribe => {
            tracing::warn!("Transcription needs both a microphone and DEEPGRAM_API_KEY");
        }
        _ => {}
    }

    let (commands, command_rx) = mpsc::unbounded_channel();
    if args.muted {
        let _ = commands.send(Command::Mute(true));
    }
    if args.transcribe {
        let _ = commands.send(Command::StartListening);
    }

    let console_task = tokio::spawn(run_console(commands.clone(), state, server_url));

    let ctrl_c_commands = commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_commands.send(Command::Leave);
        }
    });
    drop(commands);

    session.run(&args.room, &args.name, command_rx).await?;

    console_task.abort();
    if let Some(publisher) = publisher {
        publisher.abort();
    }
    drop(microphone);

    tracing::info!("Goodbye");
    Ok(())
}

async fn run_console(
    commands: mpsc::UnboundedSender<Command>,
    state: RoomState,
    server_url: String,
) {
    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(input) = console::parse(&line) else {
            continue;
        };

        match input {
            ConsoleInput::Session(cmd) => {
                if commands.send(cmd).is_err() {
                    break;
                }
            }
            ConsoleInput::Summary(speaker) => {
                let state = state.clone();
                let server_url = server_url.clone();
                tokio::spawn(async move {
                    summarize(&state, &server_url, speaker.as_deref()).await;
                });
            }
            ConsoleInput::Members => {
                for member in state.members().await {
                    println!("{} ({})", member.name, member.session_id);
                }
            }
            ConsoleInput::Help => println!("{}", console::HELP),
            ConsoleInput::Unknown(line) => println!("unknown command: {}\n{}", line, console::HELP),
        }
    }
}

async fn summarize(state: &RoomState, server_url: &str, speaker: Option<&str>) {
    let (transcript, speaker) = match speaker {
        None => (state.full_transcript().await, None),
        Some(name) => {
            let member = match state.find_member(name).await {
                Ok(member) => member,
                Err(e) => {
                    println!("{}", e);
                    return;
                }
            };
            match state.speaker_transcript(member.session_id).await {
                Some((name, lines)) => (lines, Some(name)),
                None => {
                    println!("{} has not said anything yet", member.name);
                    return;
                }
            }
        }
    };

    if transcript.trim().is_empty() {
        println!("Nothing to summarize yet");
        return;
    }

    match api::summarize(server_url, &transcript, speaker.as_deref()).await {
        Some(Summary::Speaker { summary }) => {
            for point in summary {
                println!("- {}", point);
            }
        }
        Some(Summary::Meeting {
            per_speaker,
            overall_summary,
        }) => {
            for (name, summary) in per_speaker {
                println!("{}: {}", name, summary);
            }
            println!("Overall: {}", overall_summary);
        }
        None => println!("No summary available"),
    }
}
