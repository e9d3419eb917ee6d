//! Live tailing of one filtered event stream into a bounded view.
//!
//! Delivery runs on a dedicated consumer task which exclusively owns the [`RingView`].
//! Every push is followed by a render of the full snapshot; the renderer lock is held
//! only while formatting and writing. The send path shares nothing with delivery
//! except that renderer, so a slow submission never stalls the view and a slow
//! render never stalls a submission.

use std::{future::Future, num::NonZeroUsize, sync::Arc};

use ledger_integration::{ActionSubmitter, EventStream, Registration};
use shared::{domain::BlockTag, protocol::LedgerEvent};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{MirrorError, SubmissionError, SubscriptionError},
    input::{is_sentinel, LineSource},
    render::SharedRenderer,
    ring_view::{RingView, DEFAULT_RING_CAPACITY},
    session::LedgerSession,
    target::MirrorTarget,
};

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub capacity: NonZeroUsize,
    pub header: Option<String>,
}

impl MirrorOptions {
    pub fn with_capacity(capacity: usize) -> Result<Self, MirrorError> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(MirrorError::InvalidCapacity(capacity))?;
        Ok(Self {
            capacity,
            header: None,
        })
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(DEFAULT_RING_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            header: None,
        }
    }
}

/// Published by the consumer task after every change.
#[derive(Debug, Clone, Default)]
pub struct MirrorView {
    pub events: Vec<LedgerEvent>,
    /// Total events pushed since activation, including evicted ones.
    pub pushed: u64,
    pub live: bool,
    pub render_failures: u64,
    pub last_error: Option<SubscriptionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Sentinel,
    EndOfInput,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub submitted: usize,
    pub failed: usize,
    pub rejected_input: usize,
    pub exit: ExitReason,
}

impl SendReport {
    fn new(exit: ExitReason) -> Self {
        Self {
            submitted: 0,
            failed: 0,
            rejected_input: 0,
            exit,
        }
    }
}

pub struct LiveMirror {
    target: MirrorTarget,
    registration: Arc<dyn Registration>,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    view: watch::Receiver<MirrorView>,
    renderer: SharedRenderer,
    submitter: Arc<dyn ActionSubmitter>,
}

impl LiveMirror {
    /// Registers exactly one future-only subscription and starts delivering into the view.
    ///
    /// Failing to subscribe at all is the only error; it aborts the session.
    pub async fn start(
        session: &LedgerSession,
        target: MirrorTarget,
        options: MirrorOptions,
        renderer: SharedRenderer,
    ) -> Result<Self, MirrorError> {
        let filter = target.filter(session.contract().clone());
        let stream = session
            .source()
            .subscribe(filter, BlockTag::Latest, BlockTag::Latest)
            .await
            .map_err(|source| MirrorError::Setup {
                target: target.to_string(),
                source,
            })?;
        let registration = stream.registration();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (view_tx, view) = watch::channel(MirrorView {
            live: true,
            ..MirrorView::default()
        });
        let header = options
            .header
            .unwrap_or_else(|| target.default_header().to_string());

        let consumer = tokio::spawn(deliver_events(
            stream,
            RingView::new(options.capacity),
            header,
            Arc::clone(&renderer),
            shutdown_rx,
            view_tx,
        ));

        info!(
            contract = %session.contract(),
            account = %session.account(),
            mirror = %target,
            capacity = options.capacity.get(),
            "mirror: live subscription active"
        );

        Ok(Self {
            target,
            registration,
            shutdown,
            consumer: Mutex::new(Some(consumer)),
            view,
            renderer,
            submitter: Arc::clone(session.submitter()),
        })
    }

    pub fn target(&self) -> MirrorTarget {
        self.target
    }

    pub fn snapshot(&self) -> Vec<LedgerEvent> {
        self.view.borrow().events.clone()
    }

    pub fn view(&self) -> MirrorView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MirrorView> {
        self.view.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.registration.is_cancelled()
    }

    /// Releases the subscription and waits for the consumer task to stop.
    ///
    /// Idempotent. Once it returns, nothing more is pushed into the view.
    pub async fn cancel(&self) {
        // Flag first so the consumer does not mistake the closing stream for a drop.
        self.shutdown.send_replace(true);
        self.registration.cancel();

        // Concurrent callers queue on this guard until the first join completes.
        let mut consumer = self.consumer.lock().await;
        let Some(handle) = consumer.take() else {
            return;
        };
        if let Err(err) = handle.await {
            if err.is_panic() {
                error!(mirror = %self.target, "mirror: delivery task panicked");
            }
        }
        info!(mirror = %self.target, "mirror: live subscription cancelled");
    }

    /// Forwards input lines to the submitter until the sentinel or end of input.
    ///
    /// The subscription is cancelled before this returns, whatever the outcome.
    pub async fn run_send_loop(
        &self,
        input: &mut dyn LineSource,
    ) -> Result<SendReport, MirrorError> {
        self.run_send_loop_until(input, std::future::pending()).await
    }

    /// Like [`run_send_loop`](Self::run_send_loop), but also stops when `interrupt`
    /// resolves (e.g. a Ctrl-C signal).
    pub async fn run_send_loop_until<F>(
        &self,
        input: &mut dyn LineSource,
        interrupt: F,
    ) -> Result<SendReport, MirrorError>
    where
        F: Future<Output = ()> + Send,
    {
        let outcome = tokio::select! {
            outcome = self.forward_lines(input) => outcome,
            _ = interrupt => {
                info!(mirror = %self.target, "mirror: interrupted");
                Ok(SendReport::new(ExitReason::Interrupted))
            }
        };
        self.cancel().await;
        outcome
    }

    async fn forward_lines(&self, input: &mut dyn LineSource) -> Result<SendReport, MirrorError> {
        let mut report = SendReport::new(ExitReason::EndOfInput);
        while let Some(line) = input.next_line().await? {
            if is_sentinel(&line) {
                report.exit = ExitReason::Sentinel;
                return Ok(report);
            }

            let action = match self.target.action_from_line(&line) {
                Ok(action) => action,
                Err(err) => {
                    report.rejected_input += 1;
                    self.notify(&err.to_string()).await;
                    continue;
                }
            };

            // No local echo: the action shows up once the source redelivers it.
            match self.submitter.submit(action).await {
                Ok(receipt) => {
                    report.submitted += 1;
                    debug!(
                        transaction = %receipt.transaction_id,
                        block = receipt.block_number.0,
                        "mirror: action submitted"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    let err = SubmissionError::from_anyhow(&err);
                    warn!(mirror = %self.target, error = %err, "mirror: submission failed");
                    self.notify(&err.to_string()).await;
                }
            }
        }
        Ok(report)
    }

    async fn notify(&self, message: &str) {
        let mut renderer = self.renderer.lock().await;
        if let Err(err) = renderer.notice(message) {
            warn!(error = %err, "mirror: failed to write notice");
        }
    }
}

impl Drop for LiveMirror {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.registration.cancel();
        if let Some(consumer) = self.consumer.get_mut().take() {
            consumer.abort();
        }
    }
}

async fn deliver_events(
    mut stream: EventStream,
    mut ring: RingView<LedgerEvent>,
    header: String,
    renderer: SharedRenderer,
    mut shutdown: watch::Receiver<bool>,
    view: watch::Sender<MirrorView>,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            item = stream.next() => item,
        };
        if *shutdown.borrow() {
            break;
        }

        match item {
            Some(Ok(event)) => {
                ring.push(event);
                let snapshot = ring.snapshot();
                view.send_modify(|state| {
                    state.events = snapshot.clone();
                    state.pushed += 1;
                });

                let rendered = renderer.lock().await.render_view(&header, &snapshot);
                if let Err(err) = rendered {
                    warn!(error = %err, "mirror: render failed; delivery continues");
                    view.send_modify(|state| state.render_failures += 1);
                }
            }
            Some(Err(err)) => {
                let err = SubscriptionError::from(err);
                warn!(error = %err, "mirror: subscription error");
                report_subscription_error(&renderer, &view, err).await;
            }
            None => {
                let err = SubscriptionError::Dropped;
                warn!("mirror: event source ended the live subscription");
                report_subscription_error(&renderer, &view, err).await;
                break;
            }
        }
    }

    view.send_modify(|state| state.live = false);
    stream.cancel();
    debug!("mirror: delivery task stopped");
}

async fn report_subscription_error(
    renderer: &SharedRenderer,
    view: &watch::Sender<MirrorView>,
    err: SubscriptionError,
) {
    if let Err(render_err) = renderer.lock().await.notice(&err.to_string()) {
        warn!(error = %render_err, "mirror: failed to write notice");
    }
    view.send_modify(|state| state.last_error = Some(err));
}
