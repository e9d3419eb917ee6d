use super::*;
use async_trait::async_trait;
use ledger_integration::{
    ActionSubmitter, EventSource, EventStream, InMemoryLedger, SourceError,
};
use shared::{
    domain::{AccountId, BlockNumber, BlockTag, ContractAddress, GameId},
    protocol::{EventFilter, EventPayload, LocalAction, SubmitReceipt},
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::{io::AsyncBufReadExt, sync::mpsc, time::timeout};

#[derive(Clone, Default)]
struct RecordingRenderer {
    frames: Arc<StdMutex<Vec<Vec<String>>>>,
    notices: Arc<StdMutex<Vec<String>>>,
    fail_renders: Arc<StdMutex<HashSet<usize>>>,
    render_calls: Arc<StdMutex<usize>>,
}

impl RecordingRenderer {
    fn failing_on(render_indices: &[usize]) -> Self {
        let renderer = Self::default();
        renderer
            .fail_renders
            .lock()
            .expect("lock")
            .extend(render_indices.iter().copied());
        renderer
    }

    fn frames(&self) -> Vec<Vec<String>> {
        self.frames.lock().expect("lock").clone()
    }

    fn notices(&self) -> Vec<String> {
        self.notices.lock().expect("lock").clone()
    }
}

impl Renderer for RecordingRenderer {
    fn render_view(
        &mut self,
        _header: &str,
        events: &[shared::protocol::LedgerEvent],
    ) -> Result<(), RenderError> {
        let index = {
            let mut calls = self.render_calls.lock().expect("lock");
            let index = *calls;
            *calls += 1;
            index
        };
        if self.fail_renders.lock().expect("lock").contains(&index) {
            return Err(RenderError::Closed);
        }
        self.frames
            .lock()
            .expect("lock")
            .push(events.iter().map(format_event).collect());
        Ok(())
    }

    fn notice(&mut self, message: &str) -> Result<(), RenderError> {
        self.notices.lock().expect("lock").push(message.to_string());
        Ok(())
    }
}

struct FailingSubmitter;

#[async_trait]
impl ActionSubmitter for FailingSubmitter {
    async fn submit(&self, _action: LocalAction) -> anyhow::Result<SubmitReceipt> {
        Err(anyhow::anyhow!("gas estimation failed"))
    }
}

/// Accepts every action but never mines it.
struct BlackHoleSubmitter;

#[async_trait]
impl ActionSubmitter for BlackHoleSubmitter {
    async fn submit(&self, _action: LocalAction) -> anyhow::Result<SubmitReceipt> {
        Ok(SubmitReceipt {
            transaction_id: "0xpending".into(),
            block_number: BlockNumber(0),
        })
    }
}

struct UnreachableSource;

#[async_trait]
impl EventSource for UnreachableSource {
    async fn subscribe(
        &self,
        _filter: EventFilter,
        _from: BlockTag,
        _to: BlockTag,
    ) -> anyhow::Result<EventStream> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

struct BrokenInput;

#[async_trait]
impl LineSource for BrokenInput {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "stdin closed",
        ))
    }
}

fn room() -> ContractAddress {
    ContractAddress::new("0xroom")
}

fn alice() -> AccountId {
    AccountId::new("0xa11ce")
}

fn bob() -> AccountId {
    AccountId::new("0xb0b")
}

fn ledger_with_alice() -> Arc<InMemoryLedger> {
    let ledger = InMemoryLedger::new();
    ledger.register_user(&room(), &alice(), "alice");
    ledger
}

fn session_with(
    ledger: &Arc<InMemoryLedger>,
    submitter: Arc<dyn ActionSubmitter>,
) -> LedgerSession {
    let source: Arc<dyn EventSource> = ledger.clone();
    LedgerSession::new(alice(), room(), source, submitter)
}

fn ledger_session(ledger: &Arc<InMemoryLedger>) -> LedgerSession {
    session_with(ledger, Arc::new(ledger.submitter(room(), alice())))
}

fn remote_message(ledger: &InMemoryLedger, content: &str) {
    ledger.append(
        &room(),
        &bob(),
        EventPayload::NewMessage {
            user_title: "bob".into(),
            content: content.into(),
        },
    );
}

async fn start_chat(
    session: &LedgerSession,
    capacity: usize,
    renderer: &RecordingRenderer,
) -> LiveMirror {
    LiveMirror::start(
        session,
        MirrorTarget::ChatRoom,
        MirrorOptions::with_capacity(capacity).expect("capacity"),
        render::shared(renderer.clone()),
    )
    .await
    .expect("mirror starts")
}

async fn wait_for_view<F>(mirror: &LiveMirror, predicate: F) -> MirrorView
where
    F: FnMut(&MirrorView) -> bool,
{
    let mut watch = mirror.watch();
    let view = timeout(Duration::from_secs(2), watch.wait_for(predicate))
        .await
        .expect("view updated in time")
        .expect("view channel open")
        .clone();
    view
}

fn contents(events: &[shared::protocol::LedgerEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match &event.payload {
            EventPayload::NewMessage { content, .. } => content.clone(),
            other => format!("{other:?}"),
        })
        .collect()
}

fn lines(input: &'static str) -> tokio::io::Lines<&'static [u8]> {
    input.as_bytes().lines()
}

#[tokio::test]
async fn mirrors_remote_events_and_renders_each_push() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    remote_message(&ledger, "one");
    remote_message(&ledger, "two");
    let view = wait_for_view(&mirror, |view| view.pushed >= 2).await;

    assert_eq!(contents(&view.events), vec!["one", "two"]);
    assert!(view.live);

    mirror.cancel().await;
    let frames = renderer.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], vec!["[bob] one", "[bob] two"]);
}

#[tokio::test]
async fn view_keeps_only_the_latest_k_in_arrival_order() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 3, &renderer).await;

    for content in ["A", "B", "C", "D"] {
        remote_message(&ledger, content);
    }
    let view = wait_for_view(&mirror, |view| view.pushed >= 4).await;
    assert_eq!(contents(&view.events), vec!["B", "C", "D"]);

    remote_message(&ledger, "E");
    let view = wait_for_view(&mirror, |view| view.pushed >= 5).await;
    assert_eq!(contents(&view.events), vec!["C", "D", "E"]);

    mirror.cancel().await;
}

#[tokio::test]
async fn events_from_before_activation_are_not_mirrored() {
    let ledger = ledger_with_alice();
    remote_message(&ledger, "old");
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    remote_message(&ledger, "new");
    let view = wait_for_view(&mirror, |view| view.pushed >= 1).await;
    assert_eq!(contents(&view.events), vec!["new"]);

    mirror.cancel().await;
}

#[tokio::test]
async fn cancelling_twice_is_a_noop_and_stops_pushes() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    remote_message(&ledger, "before");
    wait_for_view(&mirror, |view| view.pushed >= 1).await;

    mirror.cancel().await;
    mirror.cancel().await;
    assert!(mirror.is_cancelled());
    assert_eq!(ledger.live_subscription_count(), 0);

    remote_message(&ledger, "after");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = mirror.view();
    assert_eq!(view.pushed, 1);
    assert!(!view.live);
    assert_eq!(contents(&view.events), vec!["before"]);
    assert!(
        view.last_error.is_none(),
        "cancel must not be reported as a dropped subscription"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_cancels_both_wait_for_the_delivery_task() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = render::shared(RecordingRenderer::default());
    let mirror = Arc::new(
        LiveMirror::start(
            &session,
            MirrorTarget::ChatRoom,
            MirrorOptions::default(),
            Arc::clone(&renderer),
        )
        .await
        .expect("mirror starts"),
    );

    // Park the delivery task mid-render.
    let held = Arc::clone(&renderer).lock_owned().await;
    remote_message(&ledger, "stuck");
    wait_for_view(&mirror, |view| view.pushed >= 1).await;

    let first = tokio::spawn({
        let mirror = Arc::clone(&mirror);
        async move { mirror.cancel().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);
    });

    timeout(Duration::from_secs(2), mirror.cancel())
        .await
        .expect("second cancel completes");
    assert!(
        !mirror.view().live,
        "second cancel returned before the delivery task stopped"
    );

    release.await.expect("release");
    timeout(Duration::from_secs(2), first)
        .await
        .expect("first cancel completes")
        .expect("join");
    assert_eq!(ledger.live_subscription_count(), 0);
    assert_eq!(mirror.view().pushed, 1);
}

#[tokio::test]
async fn mixed_case_quit_ends_loop_and_cancels_subscription() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    let report = mirror
        .run_send_loop(&mut lines("hello\nQUIT\nnever sent\n"))
        .await
        .expect("send loop");

    assert_eq!(report.exit, ExitReason::Sentinel);
    assert_eq!(report.submitted, 1);
    assert!(mirror.is_cancelled());
    assert_eq!(ledger.live_subscription_count(), 0);
    assert_eq!(ledger.events().len(), 1);

    let pushed_at_exit = mirror.view().pushed;
    remote_message(&ledger, "too late");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mirror.view().pushed, pushed_at_exit);
}

#[tokio::test]
async fn failed_submission_is_reported_without_touching_the_view() {
    let ledger = ledger_with_alice();
    let session = session_with(&ledger, Arc::new(FailingSubmitter));
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    let report = mirror
        .run_send_loop(&mut lines("first\nsecond\nquit\n"))
        .await
        .expect("send loop");

    assert_eq!(report.exit, ExitReason::Sentinel);
    assert_eq!(report.failed, 2);
    assert_eq!(report.submitted, 0);
    let view = mirror.view();
    assert!(view.events.is_empty());
    assert_eq!(view.pushed, 0);
    assert_eq!(
        renderer.notices(),
        vec![
            "submission failed: gas estimation failed".to_string(),
            "submission failed: gas estimation failed".to_string(),
        ]
    );
}

#[tokio::test]
async fn ledger_rejection_surfaces_as_submission_failure() {
    let ledger = InMemoryLedger::new();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    let report = mirror
        .run_send_loop(&mut lines("hello\nquit\n"))
        .await
        .expect("send loop");

    assert_eq!(report.failed, 1);
    let notices = renderer.notices();
    assert!(notices[0].contains("not registered"), "{notices:?}");
}

#[tokio::test]
async fn render_failure_does_not_block_the_next_event() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::failing_on(&[0]);
    let mirror = start_chat(&session, 10, &renderer).await;

    remote_message(&ledger, "N");
    remote_message(&ledger, "N+1");
    let view = wait_for_view(&mirror, |view| view.pushed >= 2).await;

    assert_eq!(contents(&view.events), vec!["N", "N+1"]);
    assert_eq!(view.render_failures, 1);
    assert!(view.live);

    mirror.cancel().await;
    assert_eq!(renderer.frames(), vec![vec!["[bob] N", "[bob] N+1"]]);
}

#[tokio::test]
async fn accepted_action_is_not_echoed_locally() {
    let ledger = ledger_with_alice();
    let session = session_with(&ledger, Arc::new(BlackHoleSubmitter));
    let renderer = RecordingRenderer::default();
    let mirror = Arc::new(start_chat(&session, 10, &renderer).await);

    let (tx, mut rx) = mpsc::channel(4);
    let send_loop = tokio::spawn({
        let mirror = Arc::clone(&mirror);
        async move { mirror.run_send_loop(&mut rx).await }
    });

    tx.send("local".into()).await.expect("send line");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mirror.view().pushed, 0);

    remote_message(&ledger, "remote");
    let view = wait_for_view(&mirror, |view| view.pushed >= 1).await;
    assert_eq!(contents(&view.events), vec!["remote"]);

    tx.send("quit".into()).await.expect("send quit");
    let report = send_loop.await.expect("join").expect("send loop");
    assert_eq!(report.submitted, 1);
    assert_eq!(mirror.view().pushed, 1);
}

#[tokio::test]
async fn slow_submission_does_not_stall_delivery() {
    let ledger = InMemoryLedger::with_submit_latency(Duration::from_millis(500));
    ledger.register_user(&room(), &alice(), "alice");
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = Arc::new(start_chat(&session, 10, &renderer).await);

    let (tx, mut rx) = mpsc::channel(4);
    let send_loop = tokio::spawn({
        let mirror = Arc::clone(&mirror);
        async move { mirror.run_send_loop(&mut rx).await }
    });

    tx.send("slow".into()).await.expect("send line");
    tokio::time::sleep(Duration::from_millis(50)).await;
    remote_message(&ledger, "fast");

    let mut watch = mirror.watch();
    let first = timeout(
        Duration::from_millis(250),
        watch.wait_for(|view| view.pushed >= 1),
    )
    .await
    .expect("remote event delivered while submission is in flight")
    .expect("view open")
    .clone();
    assert_eq!(contents(&first.events), vec!["fast"]);

    let view = wait_for_view(&mirror, |view| view.pushed >= 2).await;
    assert_eq!(contents(&view.events), vec!["fast", "slow"]);

    tx.send("quit".into()).await.expect("send quit");
    let report = send_loop.await.expect("join").expect("send loop");
    assert_eq!(report.submitted, 1);
}

#[tokio::test]
async fn dropped_subscription_keeps_buffered_view() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    remote_message(&ledger, "kept");
    wait_for_view(&mirror, |view| view.pushed >= 1).await;

    assert_eq!(ledger.drop_live_subscriptions(), 1);
    let view = wait_for_view(&mirror, |view| !view.live).await;

    assert_eq!(contents(&view.events), vec!["kept"]);
    assert_eq!(view.last_error, Some(SubscriptionError::Dropped));
    assert!(renderer.notices()[0].contains("dropped"));

    mirror.cancel().await;
}

#[tokio::test]
async fn source_error_is_reported_and_delivery_continues() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let renderer = RecordingRenderer::default();
    let mirror = start_chat(&session, 10, &renderer).await;

    ledger.inject_fault(SourceError::Decode("bad topic".into()));
    remote_message(&ledger, "still here");
    let view = wait_for_view(&mirror, |view| view.pushed >= 1).await;

    assert!(view.live);
    assert_eq!(
        view.last_error,
        Some(SubscriptionError::Source(SourceError::Decode(
            "bad topic".into()
        )))
    );
    assert_eq!(contents(&view.events), vec!["still here"]);

    mirror.cancel().await;
}

#[tokio::test]
async fn unreachable_source_aborts_setup() {
    let source: Arc<dyn EventSource> = Arc::new(UnreachableSource);
    let session = LedgerSession::new(alice(), room(), source, Arc::new(FailingSubmitter));

    let result = LiveMirror::start(
        &session,
        MirrorTarget::ChatRoom,
        MirrorOptions::default(),
        render::shared(RecordingRenderer::default()),
    )
    .await;

    match result {
        Err(MirrorError::Setup { source, .. }) => {
            assert!(source.to_string().contains("connection refused"))
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("setup should fail"),
    }
}

#[tokio::test]
async fn dropping_the_mirror_releases_the_subscription() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let mirror = start_chat(&session, 10, &RecordingRenderer::default()).await;
    assert_eq!(ledger.live_subscription_count(), 1);

    drop(mirror);
    assert_eq!(ledger.live_subscription_count(), 0);
}

#[tokio::test]
async fn end_of_input_cancels_subscription() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let mirror = start_chat(&session, 10, &RecordingRenderer::default()).await;

    let report = mirror
        .run_send_loop(&mut lines(""))
        .await
        .expect("send loop");

    assert_eq!(report.exit, ExitReason::EndOfInput);
    assert!(mirror.is_cancelled());
    assert_eq!(ledger.live_subscription_count(), 0);
}

#[tokio::test]
async fn input_error_still_cancels_subscription() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let mirror = start_chat(&session, 10, &RecordingRenderer::default()).await;

    let result = mirror.run_send_loop(&mut BrokenInput).await;

    assert!(matches!(result, Err(MirrorError::Input(_))));
    assert!(mirror.is_cancelled());
    assert_eq!(ledger.live_subscription_count(), 0);
}

#[tokio::test]
async fn interrupt_cancels_subscription() {
    let ledger = ledger_with_alice();
    let session = ledger_session(&ledger);
    let mirror = start_chat(&session, 10, &RecordingRenderer::default()).await;
    let (_tx, mut rx) = mpsc::channel::<String>(1);

    let report = mirror
        .run_send_loop_until(&mut rx, async {})
        .await
        .expect("send loop");

    assert_eq!(report.exit, ExitReason::Interrupted);
    assert!(mirror.is_cancelled());
    assert_eq!(ledger.live_subscription_count(), 0);
}

#[tokio::test]
async fn move_input_is_validated_before_submission() {
    let ledger = InMemoryLedger::new();
    let game = ContractAddress::new("0xgomoku");
    let source: Arc<dyn EventSource> = ledger.clone();
    let session = LedgerSession::new(
        alice(),
        game.clone(),
        source,
        Arc::new(ledger.submitter(game, alice())),
    );
    let renderer = RecordingRenderer::default();
    let mirror = LiveMirror::start(
        &session,
        MirrorTarget::Moves {
            game_id: Some(GameId(0)),
        },
        MirrorOptions::default(),
        render::shared(renderer.clone()),
    )
    .await
    .expect("mirror starts");

    let report = mirror
        .run_send_loop(&mut lines("7 7\n99 1\n7,7\nquit\n"))
        .await
        .expect("send loop");

    assert_eq!(report.submitted, 1);
    assert_eq!(report.rejected_input, 1);
    assert_eq!(report.failed, 1);
    let notices = renderer.notices();
    assert!(notices[0].contains("outside"), "{notices:?}");
    assert!(notices[1].contains("occupied"), "{notices:?}");
}

#[tokio::test]
async fn history_returns_every_past_event_in_order() {
    let ledger = ledger_with_alice();
    for i in 0..12 {
        remote_message(&ledger, &format!("m{i}"));
    }
    ledger.append(
        &ContractAddress::new("0xother"),
        &bob(),
        EventPayload::NewMessage {
            user_title: "bob".into(),
            content: "elsewhere".into(),
        },
    );
    let session = ledger_session(&ledger);

    let events = read_history(&session, EventFilter::chat_room(room()))
        .await
        .expect("history");

    let expected: Vec<String> = (0..12).map(|i| format!("m{i}")).collect();
    assert_eq!(contents(&events), expected);
    assert_eq!(ledger.live_subscription_count(), 0);

    let mut text = TextRenderer::new(Vec::new());
    render_history(&mut text, &events).expect("render");
    let output = String::from_utf8(text.into_inner()).expect("utf8");
    assert!(output.starts_with("\n===history===\n[bob] m0\n"));
    assert!(output.ends_with("[bob] m11\n> "));
}

#[tokio::test]
async fn empty_history_renders_a_notice() {
    let mut text = TextRenderer::new(Vec::new());
    render_history(&mut text, &[]).expect("render");
    let output = String::from_utf8(text.into_inner()).expect("utf8");
    assert_eq!(output, "[!] no events recorded yet\n> ");
}
