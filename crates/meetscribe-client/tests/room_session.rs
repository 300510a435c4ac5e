//! End-to-end tests for room sessions
//!
//! Participants run full `RoomSession`s against a real relay on an
//! ephemeral port. Peer media and speech recognition are replaced with
//! in-memory doubles.
//!
//! Run with: cargo test -p meetscribe-client --test room_session

use anyhow::Result;
use async_trait::async_trait;
use meetscribe_client::media::PcmFrame;
use meetscribe_client::negotiation::{
    LinkContext, LinkEventKind, MediaConnection, PeerConnector, RemoteStream, Role,
};
use meetscribe_client::network::RelayClient;
use meetscribe_client::state::RoomState;
use meetscribe_client::transcription::{RecognitionResult, RecognitionSession, SpeechRecognizer};
use meetscribe_client::{Command, RoomSession};
use meetscribe_server::state::Config;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

struct FakeConnection {
    ctx: LinkContext,
    signals: AtomicUsize,
    closed: AtomicBool,
}

#[async_trait]
impl MediaConnection for FakeConnection {
    async fn signal(&self, payload: Value) -> Result<()> {
        self.signals.fetch_add(1, Ordering::SeqCst);
        let stream = LinkEventKind::Stream(RemoteStream {
            stream_id: self.ctx.remote.to_string(),
            track_id: "audio".to_string(),
            kind: "audio".to_string(),
        });
        match (self.ctx.role, payload["type"].as_str()) {
            (Role::Receiver, Some("offer")) => {
                self.ctx.emit_signal(json!({ "type": "answer" }));
                self.ctx.emit(stream);
            }
            (Role::Initiator, Some("answer")) => self.ctx.emit(stream),
            _ => {}
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnector {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnector {
    /// Role toward each remote with a live connection
    fn open_roles(&self) -> HashMap<Uuid, Role> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .map(|c| (c.ctx.remote, c.ctx.role))
            .collect()
    }

    /// Every live connection has seen its single handshake payload
    fn settled(&self, expected: usize) -> bool {
        let connections = self.connections.lock().unwrap();
        let open: Vec<_> = connections
            .iter()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .collect();
        open.len() == expected && open.iter().all(|c| c.signals.load(Ordering::SeqCst) == 1)
    }

    fn closed_toward(&self, remote: Uuid) -> bool {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.ctx.remote == remote)
            .all(|c| c.closed.load(Ordering::SeqCst))
    }

    fn all_closed(&self) -> bool {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .all(|c| c.closed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, ctx: LinkContext) -> Result<Arc<dyn MediaConnection>> {
        if ctx.role == Role::Initiator {
            ctx.emit_signal(json!({ "type": "offer" }));
        }
        let connection = Arc::new(FakeConnection {
            ctx,
            signals: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

#[derive(Default)]
struct FakeRecognizer {
    sessions: Mutex<Vec<(mpsc::Receiver<Vec<i16>>, mpsc::Sender<RecognitionResult>)>>,
}

impl FakeRecognizer {
    fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    async fn hear(&self, session: usize, text: &str) {
        let results = self.sessions.lock().unwrap()[session].1.clone();
        let _ = results
            .send(RecognitionResult {
                text: text.to_string(),
                is_final: true,
            })
            .await;
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn open(&self, _sample_rate: u32) -> Result<RecognitionSession> {
        let (audio_tx, audio_rx) = mpsc::channel(16);
        let (results_tx, results_rx) = mpsc::channel(16);
        self.sessions.lock().unwrap().push((audio_rx, results_tx));
        Ok(RecognitionSession {
            audio: audio_tx,
            results: results_rx,
        })
    }
}

struct TestServer {
    addr: std::net::SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let config = Config {
            bind_address: "127.0.0.1:0".to_string(),
            gemini_api_key: None,
            gemini_base_url: "http://127.0.0.1:9".to_string(),
            gemini_model: "test".to_string(),
            stun_servers: vec![],
        };
        let router = meetscribe_server::create_app(config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

struct Participant {
    id: Uuid,
    state: RoomState,
    connector: Arc<FakeConnector>,
    recognizer: Arc<FakeRecognizer>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<Result<()>>,
    _mic: broadcast::Sender<PcmFrame>,
}

impl Participant {
    async fn join(server: &TestServer, room: &str, name: &str) -> Self {
        let (relay, inbound) = RelayClient::connect(&server.ws_url()).await.unwrap();
        let id = relay.session_id();

        let state = RoomState::new();
        let connector = Arc::new(FakeConnector::default());
        let recognizer = Arc::new(FakeRecognizer::default());
        let (mic, _) = broadcast::channel(16);

        let session = RoomSession::new(relay, inbound, connector.clone(), state.clone())
            .with_capture(recognizer.clone(), mic.clone(), 48000);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (room, name) = (room.to_string(), name.to_string());
        let task = tokio::spawn(async move { session.run(&room, &name, command_rx).await });

        Self {
            id,
            state,
            connector,
            recognizer,
            commands,
            task,
            _mic: mic,
        }
    }

    fn send(&self, cmd: Command) {
        self.commands.send(cmd).unwrap();
    }

    async fn member_count(&self) -> usize {
        self.state.members().await.len()
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Join participants one at a time so arrival order is fixed
async fn join_in_order(server: &TestServer, room: &str, names: &[&str]) -> Vec<Participant> {
    let mut participants: Vec<Participant> = Vec::new();
    for name in names {
        let p = Participant::join(server, room, name).await;
        let expected = participants.len() + 1;
        let joined = &p;
        eventually("join to settle", move || async move {
            joined.member_count().await == expected
        })
        .await;
        participants.push(p);
    }
    participants
}

#[tokio::test]
async fn two_participants_link_with_complementary_roles() {
    let server = TestServer::start().await;
    let ps = join_in_order(&server, "abc", &["A", "B"]).await;
    let (a, b) = (&ps[0], &ps[1]);

    eventually("handshake", move || async move {
        a.connector.settled(1) && b.connector.settled(1)
    })
    .await;

    assert_eq!(a.connector.open_roles(), HashMap::from([(b.id, Role::Initiator)]));
    assert_eq!(b.connector.open_roles(), HashMap::from([(a.id, Role::Receiver)]));
}

#[tokio::test]
async fn three_participants_form_full_mesh() {
    let server = TestServer::start().await;
    let ps = join_in_order(&server, "abc", &["A", "B", "C"]).await;
    let all = &ps;

    eventually("mesh", move || async move { all.iter().all(|p| p.connector.settled(2)) }).await;

    // Six directed entries, every pair with one initiator and one receiver
    let roles: Vec<HashMap<Uuid, Role>> = ps.iter().map(|p| p.connector.open_roles()).collect();
    assert_eq!(roles.iter().map(HashMap::len).sum::<usize>(), 6);
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        assert_eq!(roles[i][&ps[j].id], Role::Initiator);
        assert_eq!(roles[j][&ps[i].id], Role::Receiver);
    }

    for p in &ps {
        let names: Vec<String> = p.state.members().await.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }
}

#[tokio::test]
async fn transcripts_reach_others_only_while_unmuted() {
    let server = TestServer::start().await;
    let ps = join_in_order(&server, "abc", &["A", "B"]).await;
    let (a, b) = (&ps[0], &ps[1]);

    a.send(Command::StartListening);
    eventually("capture", move || async move { a.recognizer.opened() == 1 }).await;

    a.recognizer.hear(0, "hello from A").await;
    eventually("transcript at B", move || async move {
        b.state.full_transcript().await == "A:\nhello from A"
    })
    .await;
    assert_eq!(a.state.full_transcript().await, "A:\nhello from A");

    a.send(Command::Mute(true));
    eventually("mute", move || async move { a.state.read().await.is_muted }).await;
    a.recognizer.hear(0, "secret").await;

    a.send(Command::Mute(false));
    eventually("fresh capture", move || async move { a.recognizer.opened() == 2 }).await;
    a.recognizer.hear(1, "back again").await;

    eventually("second transcript at B", move || async move {
        b.state.full_transcript().await == "A:\nhello from A back again"
    })
    .await;
}

#[tokio::test]
async fn leaving_cleans_up_everywhere() {
    let server = TestServer::start().await;
    let mut ps = join_in_order(&server, "abc", &["A", "B", "C"]).await;
    let all = &ps;
    eventually("mesh", move || async move { all.iter().all(|p| p.connector.settled(2)) }).await;

    let (a, c) = (&ps[0], &ps[2]);
    c.send(Command::StartListening);
    eventually("capture", move || async move { c.recognizer.opened() == 1 }).await;
    c.recognizer.hear(0, "bye everyone").await;
    eventually("transcript at A", move || async move {
        a.state.full_transcript().await.contains("bye everyone")
    })
    .await;
    let c_id = c.id;

    let c = ps.remove(2);
    c.send(Command::Leave);
    c.task.await.unwrap().unwrap();
    assert!(c.connector.all_closed());

    for p in &ps {
        eventually("departure", move || async move { p.member_count().await == 2 }).await;
        assert!(p.connector.closed_toward(c_id));
        assert_eq!(p.connector.open_roles().len(), 1);
        assert!(p.state.full_transcript().await.is_empty());
    }
}
