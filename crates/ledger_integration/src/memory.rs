//! Process-local ledger used for offline sessions and tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use shared::{
    domain::{AccountId, BlockNumber, BlockTag, BoardPosition, ContractAddress, GameId, Piece},
    error::{ErrorCode, LedgerError},
    protocol::{EventFilter, EventPayload, LedgerEvent, LocalAction, SubmitReceipt},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{ActionSubmitter, EventSource, EventStream, Registration, SourceError, SourceItem};

#[derive(Default)]
struct LedgerState {
    log: Vec<LedgerEvent>,
    listeners: HashMap<Uuid, Listener>,
    titles: HashMap<(String, String), String>,
    boards: HashMap<(String, GameId), GameBoard>,
}

struct Listener {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<SourceItem>,
}

struct GameBoard {
    cells: HashMap<BoardPosition, Piece>,
    next_piece: Piece,
    move_count: u32,
}

impl Default for GameBoard {
    fn default() -> Self {
        Self {
            cells: HashMap::new(),
            next_piece: Piece::Black,
            move_count: 0,
        }
    }
}

fn lock_state(state: &Mutex<LedgerState>) -> MutexGuard<'_, LedgerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn address_key(address: &str) -> String {
    address.to_ascii_lowercase()
}

fn append_locked(
    state: &mut LedgerState,
    contract: &ContractAddress,
    originator: &AccountId,
    payload: EventPayload,
) -> LedgerEvent {
    let event = LedgerEvent {
        block_number: BlockNumber(state.log.len() as u64 + 1),
        log_index: 0,
        contract: contract.clone(),
        originator: originator.clone(),
        payload,
        mined_at: Utc::now(),
    };
    state.log.push(event.clone());

    // Listeners whose receiver is gone are pruned on the way.
    state.listeners.retain(|id, listener| {
        if !listener.filter.matches(&event) {
            return true;
        }
        let delivered = listener.tx.send(Ok(event.clone())).is_ok();
        if !delivered {
            debug!(subscription = %id, "ledger: pruning closed listener");
        }
        delivered
    });
    event
}

pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    submit_latency: Duration,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Self::with_submit_latency(Duration::ZERO)
    }

    /// Every submission sleeps `latency` before it is mined, like a slow RPC round trip.
    pub fn with_submit_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            submit_latency: latency,
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        lock_state(&self.state)
    }

    pub fn register_user(
        &self,
        contract: &ContractAddress,
        account: &AccountId,
        title: impl Into<String>,
    ) {
        let title = title.into();
        info!(contract = %contract, account = %account, title = %title, "ledger: user registered");
        self.lock().titles.insert(
            (address_key(contract.as_str()), address_key(account.as_str())),
            title,
        );
    }

    pub fn user_title(&self, contract: &ContractAddress, account: &AccountId) -> Option<String> {
        self.lock()
            .titles
            .get(&(address_key(contract.as_str()), address_key(account.as_str())))
            .cloned()
    }

    /// Mines `payload` as the next block and fans it out to matching live listeners.
    pub fn append(
        &self,
        contract: &ContractAddress,
        originator: &AccountId,
        payload: EventPayload,
    ) -> LedgerEvent {
        let mut state = self.lock();
        append_locked(&mut state, contract, originator, payload)
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.lock().log.clone()
    }

    pub fn live_subscription_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Pushes a transport failure to every live listener. Returns how many received it.
    pub fn inject_fault(&self, error: SourceError) -> usize {
        let state = self.lock();
        state
            .listeners
            .values()
            .filter(|listener| listener.tx.send(Err(error.clone())).is_ok())
            .count()
    }

    /// Forgets every live listener, ending their streams as a dropped connection would.
    pub fn drop_live_subscriptions(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.listeners.len();
        state.listeners.clear();
        if dropped > 0 {
            warn!(dropped, "ledger: live subscriptions dropped");
        }
        dropped
    }

    pub fn submitter(
        self: &Arc<Self>,
        contract: ContractAddress,
        account: AccountId,
    ) -> LedgerSubmitter {
        LedgerSubmitter {
            ledger: Arc::clone(self),
            contract,
            account,
        }
    }

    fn apply(
        &self,
        contract: &ContractAddress,
        account: &AccountId,
        action: LocalAction,
    ) -> Result<LedgerEvent, LedgerError> {
        let mut state = self.lock();
        let contract_key = address_key(contract.as_str());
        let payload = match action {
            LocalAction::SendMessage { text } => {
                let title = state
                    .titles
                    .get(&(contract_key, address_key(account.as_str())))
                    .cloned()
                    .ok_or_else(|| {
                        LedgerError::new(
                            ErrorCode::Unregistered,
                            format!("account {account} is not registered in room {contract}"),
                        )
                    })?;
                EventPayload::NewMessage {
                    user_title: title,
                    content: text,
                }
            }
            LocalAction::MakeMove { game_id, position } => {
                if BoardPosition::new(position.x, position.y).is_none() {
                    return Err(LedgerError::new(
                        ErrorCode::InvalidMove,
                        format!("position {position} is off the board"),
                    ));
                }
                let board = state.boards.entry((contract_key, game_id)).or_default();
                if board.cells.contains_key(&position) {
                    return Err(LedgerError::new(
                        ErrorCode::InvalidMove,
                        format!("position {position} is already occupied in game {game_id}"),
                    ));
                }
                let piece = board.next_piece;
                board.cells.insert(position, piece);
                board.next_piece = piece.opponent();
                board.move_count += 1;
                EventPayload::MoveMade {
                    game_id,
                    position,
                    piece,
                }
            }
            LocalAction::SendGameChat { game_id, text } => {
                let move_number = state
                    .boards
                    .get(&(contract_key, game_id))
                    .map(|board| board.move_count)
                    .unwrap_or(0);
                EventPayload::ChatSent {
                    game_id,
                    message: text,
                    move_number,
                }
            }
        };
        Ok(append_locked(&mut state, contract, account, payload))
    }
}

#[async_trait]
impl EventSource for InMemoryLedger {
    async fn subscribe(
        &self,
        filter: EventFilter,
        from: BlockTag,
        to: BlockTag,
    ) -> anyhow::Result<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let registration: Arc<dyn Registration> = {
            let mut state = self.lock();
            match (from, to) {
                (BlockTag::Latest, BlockTag::Latest) => {
                    info!(
                        subscription = %id,
                        contract = %filter.contract,
                        kind = ?filter.kind,
                        "ledger: live subscription registered"
                    );
                    state.listeners.insert(id, Listener { filter, tx });
                    Arc::new(MemoryRegistration::live(id, Arc::downgrade(&self.state)))
                }
                (from, to) => {
                    let head = state.log.len() as u64;
                    let start = resolve_tag(from, head);
                    let end = resolve_tag(to, head);
                    let mut replayed = 0usize;
                    for event in state.log.iter().filter(|event| {
                        filter.matches(event) && (start..=end).contains(&event.block_number.0)
                    }) {
                        let _ = tx.send(Ok(event.clone()));
                        replayed += 1;
                    }
                    debug!(subscription = %id, start, end, replayed, "ledger: range read");
                    // Closing the sender ends the stream after the replayed entries.
                    drop(tx);
                    Arc::new(MemoryRegistration::finished(id))
                }
            }
        };
        Ok(EventStream::new(
            UnboundedReceiverStream::new(rx).boxed(),
            registration,
        ))
    }
}

fn resolve_tag(tag: BlockTag, head: u64) -> u64 {
    match tag {
        BlockTag::Earliest => 0,
        BlockTag::Latest => head,
        BlockTag::Number(number) => number.0,
    }
}

struct MemoryRegistration {
    id: Uuid,
    state: Weak<Mutex<LedgerState>>,
    cancelled: AtomicBool,
}

impl MemoryRegistration {
    fn live(id: Uuid, state: Weak<Mutex<LedgerState>>) -> Self {
        Self {
            id,
            state,
            cancelled: AtomicBool::new(false),
        }
    }

    fn finished(id: Uuid) -> Self {
        Self::live(id, Weak::new())
    }
}

impl Registration for MemoryRegistration {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(state) = self.state.upgrade() {
            if lock_state(&state).listeners.remove(&self.id).is_some() {
                info!(subscription = %self.id, "ledger: live subscription released");
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Submits actions as one account against one contract.
#[derive(Clone)]
pub struct LedgerSubmitter {
    ledger: Arc<InMemoryLedger>,
    contract: ContractAddress,
    account: AccountId,
}

#[async_trait]
impl ActionSubmitter for LedgerSubmitter {
    async fn submit(&self, action: LocalAction) -> anyhow::Result<SubmitReceipt> {
        if !self.ledger.submit_latency.is_zero() {
            tokio::time::sleep(self.ledger.submit_latency).await;
        }
        let event = self.ledger.apply(&self.contract, &self.account, action)?;
        Ok(SubmitReceipt {
            transaction_id: format!("0x{}", Uuid::new_v4().simple()),
            block_number: event.block_number,
        })
    }
}
