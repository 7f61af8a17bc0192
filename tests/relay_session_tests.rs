//! Relay session tests.
//!
//! Drive the session core through its channels the way the live engine
//! does: feed parsed client/provider events in, capture the outbound
//! traffic on both legs, and assert on state and hook invocations. No
//! sockets involved.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use callbridge_gateway::core::directory::CallContext;
use callbridge_gateway::core::realtime::{
    ClientEvent, RealtimeConfig, ServerEvent, TranscriptLine,
};
use callbridge_gateway::core::relay::{
    Flow, FunctionRegistry, RelayChannels, RelayDeps, RelayError, RelayEvent, RelaySession,
    SpeechSynthesizer,
};
use callbridge_gateway::core::session::{IdleFollowUpPolicy, RelaySessionConfig, SessionHooks};
use callbridge_gateway::core::telephony::{ClientMessageRoute, TelephonyInbound};
use callbridge_gateway::jobs::{Job, JobError, JobKind, JobQueue};

// =============================================================================
// Test Doubles
// =============================================================================

struct CaptureQueue {
    jobs: Mutex<Vec<Job>>,
}

impl CaptureQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl JobQueue for CaptureQueue {
    async fn submit(&self, job: Job) -> Result<(), JobError> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

#[derive(Default)]
struct CaptureHooks {
    started: Mutex<Vec<(String, String)>>,
    function_calls: Mutex<Vec<String>>,
    transcripts: Mutex<Option<Vec<TranscriptLine>>>,
}

#[async_trait]
impl SessionHooks for CaptureHooks {
    async fn client_started(&self, call_id: &str, stream_id: &str) {
        self.started
            .lock()
            .push((call_id.to_string(), stream_id.to_string()));
    }

    async fn function_call(&self, name: &str, _arguments: &str) {
        self.function_calls.lock().push(name.to_string());
    }

    async fn transcription_completed(&self, lines: &[TranscriptLine]) {
        *self.transcripts.lock() = Some(lines.to_vec());
    }
}

struct FailingSynth;

#[async_trait]
impl SpeechSynthesizer for FailingSynth {
    async fn summarize_order(&self, _audio: Bytes) -> Result<Bytes, RelayError> {
        Err(RelayError::Handler("summarizer unavailable".to_string()))
    }
}

struct FixedSynth;

#[async_trait]
impl SpeechSynthesizer for FixedSynth {
    async fn summarize_order(&self, _audio: Bytes) -> Result<Bytes, RelayError> {
        Ok(Bytes::from_static(&[0xFF; 160]))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    session: RelaySession,
    client_rx: mpsc::Receiver<ClientMessageRoute>,
    provider_rx: mpsc::Receiver<ClientEvent>,
    events_rx: mpsc::Receiver<RelayEvent>,
    hooks: Arc<CaptureHooks>,
    jobs: Arc<CaptureQueue>,
}

fn harness_with(
    config_fn: impl FnOnce(&mut RelaySessionConfig),
    ctx_fn: impl FnOnce(&mut CallContext),
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
) -> Harness {
    let hooks = Arc::new(CaptureHooks::default());
    let jobs = CaptureQueue::new();

    let mut config = RelaySessionConfig {
        provider: RealtimeConfig::default(),
        greeting: None,
        recording: false,
        idle: None,
        hooks: hooks.clone(),
    };
    config_fn(&mut config);

    let mut ctx = CallContext {
        call_id: "C1".to_string(),
        ..Default::default()
    };
    ctx_fn(&mut ctx);

    let (client_tx, client_rx) = mpsc::channel(64);
    let (provider_tx, provider_rx) = mpsc::channel(64);
    let (events_tx, events_rx) = mpsc::channel(64);

    let session = RelaySession::new(
        ctx,
        config,
        RelayChannels {
            client: client_tx,
            provider: provider_tx,
            events: events_tx,
        },
        RelayDeps {
            jobs: jobs.clone(),
            functions: Arc::new(FunctionRegistry::standard(jobs.clone(), synthesizer)),
            hold_clip: None,
            recording_dir: PathBuf::from("recordings"),
        },
        CancellationToken::new(),
    );

    Harness {
        session,
        client_rx,
        provider_rx,
        events_rx,
        hooks,
        jobs,
    }
}

fn harness() -> Harness {
    harness_with(|_| {}, |_| {}, None)
}

fn client_event(json: &str) -> RelayEvent {
    RelayEvent::Client(serde_json::from_str::<TelephonyInbound>(json).expect("valid frame"))
}

fn provider_event(json: &str) -> RelayEvent {
    RelayEvent::Provider(serde_json::from_str::<ServerEvent>(json).expect("valid event"))
}

/// Serialize whatever went out to the client for easy assertions.
fn client_json(route: ClientMessageRoute) -> String {
    match route {
        ClientMessageRoute::Outgoing(event) => serde_json::to_string(&event).unwrap(),
        ClientMessageRoute::Close => "close".to_string(),
    }
}

fn provider_json(event: ClientEvent) -> String {
    serde_json::to_string(&event).unwrap()
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[tokio::test]
async fn test_start_invokes_client_started_hook() {
    let mut h = harness();
    let flow = h
        .session
        .handle_event(client_event(
            r#"{"event":"start","start":{"streamSid":"S1","callSid":"C1"}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(
        h.hooks.started.lock().clone(),
        vec![("C1".to_string(), "S1".to_string())]
    );
    assert_eq!(h.session.state().stream_id, "S1");
}

#[tokio::test]
async fn test_media_forwarded_as_audio_append() {
    let mut h = harness();
    tokio_test::assert_ok!(
        h.session
            .handle_event(client_event(
                r#"{"event":"media","media":{"payload":"QQ=="},"timestamp":500}"#,
            ))
            .await
    );

    let out = provider_json(h.provider_rx.try_recv().expect("frame forwarded"));
    assert!(out.contains("input_audio_buffer.append"));
    assert!(out.contains(r#""audio":"QQ==""#));
    assert_eq!(h.session.state().latest_media_ts_ms, 500);
}

#[tokio::test]
async fn test_audio_delta_relayed_with_mark() {
    let mut h = harness();
    h.session
        .handle_event(client_event(
            r#"{"event":"start","start":{"streamSid":"S1","callSid":"C1"}}"#,
        ))
        .await
        .unwrap();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.audio.delta","delta":"//8=","item_id":"item_1","response_id":"r1"}"#,
        ))
        .await
        .unwrap();

    let media = client_json(h.client_rx.try_recv().unwrap());
    assert!(media.contains(r#""event":"media""#));
    assert!(media.contains(r#""streamSid":"S1""#));
    assert!(media.contains("//8="));

    let mark = client_json(h.client_rx.try_recv().unwrap());
    assert!(mark.contains(r#""event":"mark""#));

    assert_eq!(
        h.session.state().last_assistant_item.as_deref(),
        Some("item_1")
    );
    assert_eq!(h.session.state().pending_marks.len(), 1);
}

#[tokio::test]
async fn test_first_delta_wins_for_response_start() {
    let mut h = harness();
    h.session
        .handle_event(client_event(
            r#"{"event":"media","media":{"payload":"QQ=="},"timestamp":1000}"#,
        ))
        .await
        .unwrap();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.audio.delta","delta":"//8=","item_id":"item_1","response_id":"r1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(h.session.state().response_start_ts_ms, Some(1000));

    // Clock advances between deltas of the same response
    h.session
        .handle_event(client_event(
            r#"{"event":"media","media":{"payload":"QQ=="},"timestamp":2000}"#,
        ))
        .await
        .unwrap();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.audio.delta","delta":"//8=","item_id":"item_1","response_id":"r1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(h.session.state().response_start_ts_ms, Some(1000));
}

#[tokio::test]
async fn test_barge_in_truncates_and_clears() {
    let mut h = harness();
    h.session
        .handle_event(client_event(
            r#"{"event":"start","start":{"streamSid":"S1","callSid":"C1"}}"#,
        ))
        .await
        .unwrap();
    h.session
        .handle_event(client_event(
            r#"{"event":"media","media":{"payload":"QQ=="},"timestamp":1000}"#,
        ))
        .await
        .unwrap();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.audio.delta","delta":"//8=","item_id":"item_1","response_id":"r1"}"#,
        ))
        .await
        .unwrap();
    h.session
        .handle_event(client_event(
            r#"{"event":"media","media":{"payload":"QQ=="},"timestamp":4500}"#,
        ))
        .await
        .unwrap();

    // Caller starts talking over the assistant
    h.session
        .handle_event(provider_event(
            r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":4400,"item_id":"vad_1"}"#,
        ))
        .await
        .unwrap();

    // Drain the provider leg: two appends, then the truncate
    let first = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(first.contains("input_audio_buffer.append"));
    let second = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(second.contains("input_audio_buffer.append"));
    let truncate = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(truncate.contains("conversation.item.truncate"));
    assert!(truncate.contains(r#""item_id":"item_1""#));
    assert!(truncate.contains(r#""audio_end_ms":3500"#));

    // Drain the client leg: media + mark from the delta, then the clear
    let _media = h.client_rx.try_recv().unwrap();
    let _mark = h.client_rx.try_recv().unwrap();
    let clear = client_json(h.client_rx.try_recv().unwrap());
    assert_eq!(clear, r#"{"event":"clear","streamSid":"S1"}"#);

    // Interruption bookkeeping fully reset
    let state = h.session.state();
    assert!(state.last_assistant_item.is_none());
    assert!(state.response_start_ts_ms.is_none());
    assert!(state.pending_marks.is_empty());
}

#[tokio::test]
async fn test_barge_in_without_playing_response_is_noop() {
    let mut h = harness();
    h.session
        .handle_event(provider_event(
            r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":100,"item_id":"vad_1"}"#,
        ))
        .await
        .unwrap();
    assert!(h.provider_rx.try_recv().is_err());
    assert!(h.client_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_mark_echo_pops_queue() {
    let mut h = harness();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.audio.delta","delta":"//8=","item_id":"item_1","response_id":"r1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(h.session.state().pending_marks.len(), 1);

    h.session
        .handle_event(client_event(r#"{"event":"mark","mark":{"name":"resp-1"}}"#))
        .await
        .unwrap();
    assert!(h.session.state().pending_marks.is_empty());
}

#[tokio::test]
async fn test_greeting_is_one_shot() {
    let mut h = harness_with(
        |config| config.greeting = Some("Thanks for calling!".to_string()),
        |_| {},
        None,
    );

    let ready = r#"{"type":"session.updated","session":{"id":"sess_1"}}"#;
    h.session.handle_event(provider_event(ready)).await.unwrap();
    h.session.handle_event(provider_event(ready)).await.unwrap();

    let item = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(item.contains("conversation.item.create"));
    assert!(item.contains("Thanks for calling!"));
    let response = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(response.contains("response.create"));

    // Second ready signal sent nothing more
    assert!(h.provider_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unknown_function_is_ignored() {
    let mut h = harness();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.done","response":{"id":"r1","status":"completed","output":[
                {"type":"function_call","name":"invent_a_function","call_id":"call_1","arguments":"{}"}
            ]}}"#,
        ))
        .await
        .unwrap();

    // Observed by the hook, but nothing sent anywhere
    assert_eq!(
        h.hooks.function_calls.lock().clone(),
        vec!["invent_a_function".to_string()]
    );
    assert!(h.provider_rx.try_recv().is_err());
    assert!(h.client_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_transfer_without_contact_returns_apology_and_no_job() {
    let mut h = harness();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.done","response":{"id":"r1","status":"completed","output":[
                {"type":"function_call","name":"transfer_to_human","call_id":"call_9","arguments":"{}"}
            ]}}"#,
        ))
        .await
        .unwrap();

    let output = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(output.contains("function_call_output"));
    assert!(output.contains(r#""call_id":"call_9""#));
    assert!(output.contains("Apologize"));
    let response = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(response.contains("response.create"));

    assert!(h.jobs.jobs.lock().is_empty());
    assert!(!h.session.context().is_transferred);
}

#[tokio::test]
async fn test_transfer_with_contact_schedules_delayed_job() {
    let mut h = harness_with(
        |_| {},
        |ctx| ctx.human_contact_phone = Some("+15550100123".to_string()),
        None,
    );
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.done","response":{"id":"r1","status":"completed","output":[
                {"type":"function_call","name":"transfer_to_human","call_id":"call_9","arguments":"{}"}
            ]}}"#,
        ))
        .await
        .unwrap();

    let jobs = h.jobs.jobs.lock();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::TransferToHuman);
    assert_eq!(jobs[0].delay, Some(std::time::Duration::from_secs(4)));
    drop(jobs);
    assert!(h.session.context().is_transferred);
}

#[tokio::test]
async fn test_suspension_drops_media_and_cleanup_runs_on_failure() {
    let mut h = harness_with(|_| {}, |_| {}, Some(Arc::new(FailingSynth)));

    h.session
        .handle_event(provider_event(
            r#"{"type":"response.done","response":{"id":"r1","status":"completed","output":[
                {"type":"function_call","name":"repeat_order","call_id":"call_2","arguments":"{}"}
            ]}}"#,
        ))
        .await
        .unwrap();
    assert!(h.session.state().audio_forwarding_suspended);

    // Media arriving during suspension is dropped, not buffered
    h.session
        .handle_event(client_event(
            r#"{"event":"media","media":{"payload":"QQ=="},"timestamp":600}"#,
        ))
        .await
        .unwrap();
    assert!(h.provider_rx.try_recv().is_err());
    // The clock still advanced
    assert_eq!(h.session.state().latest_media_ts_ms, 600);

    // The failed side computation re-enters the loop and clears the flag
    let finished = h.events_rx.recv().await.expect("side task reports back");
    assert!(matches!(finished, RelayEvent::SideTaskFinished { .. }));
    h.session.handle_event(finished).await.unwrap();
    assert!(!h.session.state().audio_forwarding_suspended);

    // The dropped frame was not replayed and no function output was sent
    assert!(h.provider_rx.try_recv().is_err());
    assert!(h.client_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_suspension_streams_synthesized_audio_on_success() {
    let mut h = harness_with(|_| {}, |_| {}, Some(Arc::new(FixedSynth)));
    h.session
        .handle_event(client_event(
            r#"{"event":"start","start":{"streamSid":"S1","callSid":"C1"}}"#,
        ))
        .await
        .unwrap();

    h.session
        .handle_event(provider_event(
            r#"{"type":"response.done","response":{"id":"r1","status":"completed","output":[
                {"type":"function_call","name":"repeat_order","call_id":"call_2","arguments":"{}"}
            ]}}"#,
        ))
        .await
        .unwrap();

    let finished = h.events_rx.recv().await.expect("side task reports back");
    h.session.handle_event(finished).await.unwrap();
    assert!(!h.session.state().audio_forwarding_suspended);

    // Synthesized audio went straight to the caller
    let media = client_json(h.client_rx.try_recv().unwrap());
    assert!(media.contains(r#""event":"media""#));

    // And the conversation continues
    let output = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(output.contains("function_call_output"));
    let response = provider_json(h.provider_rx.try_recv().unwrap());
    assert!(response.contains("response.create"));
}

#[tokio::test]
async fn test_idle_follow_up_respects_max_injections() {
    let mut h = harness_with(
        |config| {
            config.idle = Some(IdleFollowUpPolicy {
                timeout_secs: 10,
                message: "Are you still there?".to_string(),
                max_injections: 2,
            })
        },
        |_| {},
        None,
    );

    h.session.handle_idle().await.unwrap();
    assert!(!h.session.idle_exhausted());
    h.session.handle_idle().await.unwrap();
    assert!(h.session.idle_exhausted());
    h.session.handle_idle().await.unwrap();

    // Two injections, two events each; the third attempt sent nothing
    let mut count = 0;
    while h.provider_rx.try_recv().is_ok() {
        count += 1;
    }
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_stop_ends_session_and_finalize_fires_hooks() {
    let mut h = harness();
    h.session
        .handle_event(provider_event(
            r#"{"type":"conversation.item.input_audio_transcription.completed","item_id":"i1","transcript":"One large pizza please"}"#,
        ))
        .await
        .unwrap();
    h.session
        .handle_event(provider_event(
            r#"{"type":"response.audio_transcript.done","item_id":"i2","transcript":"Coming right up"}"#,
        ))
        .await
        .unwrap();

    let flow = h
        .session
        .handle_event(client_event(r#"{"event":"stop"}"#))
        .await
        .unwrap();
    assert_eq!(flow, Flow::Stop);

    h.session.finalize().await;
    let lines = h.hooks.transcripts.lock().clone().expect("hook fired");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].text, "One large pizza please");
    assert_eq!(lines[1].text, "Coming right up");

    let jobs = h.jobs.jobs.lock();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::FinalizeCall);
    assert_eq!(jobs[0].payload["call_id"], "C1");
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let mut h = harness();
    h.session.finalize().await;
    h.session.finalize().await;
    assert_eq!(h.jobs.jobs.lock().len(), 1);
}

#[tokio::test]
async fn test_client_close_stops_flow() {
    let mut h = harness();
    let flow = h.session.handle_event(RelayEvent::ClientClosed).await.unwrap();
    assert_eq!(flow, Flow::Stop);
    let flow = h
        .session
        .handle_event(RelayEvent::ProviderClosed)
        .await
        .unwrap();
    assert_eq!(flow, Flow::Stop);
}
