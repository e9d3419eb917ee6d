//! A second participant driven by a timer, so a local session has remote traffic to mirror.

use std::{sync::Arc, time::Duration};

use ledger_integration::{ActionSubmitter, InMemoryLedger, LedgerSubmitter};
use mirror_core::MirrorTarget;
use shared::{
    domain::{AccountId, BoardPosition, ContractAddress, GameId, BOARD_SIZE},
    protocol::{LocalAction, SubmitReceipt},
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const PEER_ACCOUNT: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
pub const PEER_TITLE: &str = "peer";

const CELLS: u32 = BOARD_SIZE as u32 * BOARD_SIZE as u32;

pub struct SimulatedPeer {
    submitter: LedgerSubmitter,
    target: MirrorTarget,
    turn: u32,
}

impl SimulatedPeer {
    pub fn new(ledger: &Arc<InMemoryLedger>, contract: ContractAddress, target: MirrorTarget) -> Self {
        let account = AccountId::new(PEER_ACCOUNT);
        ledger.register_user(&contract, &account, PEER_TITLE);
        Self {
            submitter: ledger.submitter(contract, account),
            target,
            turn: 0,
        }
    }

    /// Submits the next action for this peer's target.
    ///
    /// Moves walk the board from the far corner, skipping cells that are already taken.
    pub async fn play_turn(&mut self) -> anyhow::Result<SubmitReceipt> {
        let action = match self.target {
            MirrorTarget::ChatRoom => LocalAction::SendMessage {
                text: format!("ping #{}", self.turn + 1),
            },
            MirrorTarget::GameChat { game_id } => LocalAction::SendGameChat {
                game_id,
                text: format!("your move ({})", self.turn + 1),
            },
            MirrorTarget::Moves { game_id } => {
                return self.play_move(game_id.unwrap_or(GameId(0))).await;
            }
        };
        self.turn += 1;
        self.submitter.submit(action).await
    }

    async fn play_move(&mut self, game_id: GameId) -> anyhow::Result<SubmitReceipt> {
        let mut last_err = None;
        while self.turn < CELLS {
            let index = CELLS - 1 - self.turn;
            self.turn += 1;
            let position = BoardPosition {
                x: (index % BOARD_SIZE as u32) as u8,
                y: (index / BOARD_SIZE as u32) as u8,
            };
            match self
                .submitter
                .submit(LocalAction::MakeMove { game_id, position })
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(err) => {
                    debug!(%position, error = %err, "peer: cell unavailable, trying next");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("board of game {game_id} is full")))
    }

    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.play_turn().await {
                    warn!(error = %err, "peer: turn failed");
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/peer_tests.rs"]
mod tests;
