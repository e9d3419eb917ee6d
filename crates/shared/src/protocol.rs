use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AccountId, BlockNumber, BoardPosition, ContractAddress, GameId, Piece};

/// One entry of the remote ledger log. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub block_number: BlockNumber,
    pub log_index: u32,
    pub contract: ContractAddress,
    pub originator: AccountId,
    pub payload: EventPayload,
    pub mined_at: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn game_id(&self) -> Option<GameId> {
        self.payload.game_id()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    NewMessage {
        user_title: String,
        content: String,
    },
    MoveMade {
        game_id: GameId,
        position: BoardPosition,
        piece: Piece,
    },
    ChatSent {
        game_id: GameId,
        message: String,
        move_number: u32,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::NewMessage { .. } => EventKind::NewMessage,
            EventPayload::MoveMade { .. } => EventKind::MoveMade,
            EventPayload::ChatSent { .. } => EventKind::ChatSent,
        }
    }

    pub fn game_id(&self) -> Option<GameId> {
        match self {
            EventPayload::NewMessage { .. } => None,
            EventPayload::MoveMade { game_id, .. } | EventPayload::ChatSent { game_id, .. } => {
                Some(*game_id)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    MoveMade,
    ChatSent,
}

/// Selects which events of one contract a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub contract: ContractAddress,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
}

impl EventFilter {
    pub fn chat_room(contract: ContractAddress) -> Self {
        Self {
            contract,
            kind: EventKind::NewMessage,
            game_id: None,
        }
    }

    pub fn moves(contract: ContractAddress, game_id: Option<GameId>) -> Self {
        Self {
            contract,
            kind: EventKind::MoveMade,
            game_id,
        }
    }

    pub fn game_chat(contract: ContractAddress, game_id: GameId) -> Self {
        Self {
            contract,
            kind: EventKind::ChatSent,
            game_id: Some(game_id),
        }
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        if !self.contract.matches(&event.contract) || self.kind != event.kind() {
            return false;
        }
        match self.game_id {
            Some(game_id) => event.game_id() == Some(game_id),
            None => true,
        }
    }
}

/// A locally originated action. Never stored; handed to the submitter and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LocalAction {
    SendMessage {
        text: String,
    },
    MakeMove {
        game_id: GameId,
        position: BoardPosition,
    },
    SendGameChat {
        game_id: GameId,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub transaction_id: String,
    pub block_number: BlockNumber,
}
