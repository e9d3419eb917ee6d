use std::fmt;

use shared::{
    domain::{BoardPosition, ContractAddress, GameId, BOARD_SIZE},
    protocol::{EventFilter, LocalAction},
};

use crate::{
    error::InputError,
    render::{CHAT_HEADER, GAME_CHAT_HEADER, MOVES_HEADER},
};

/// What a mirror tails, and how local input lines turn into actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorTarget {
    ChatRoom,
    Moves { game_id: Option<GameId> },
    GameChat { game_id: GameId },
}

impl MirrorTarget {
    pub fn filter(&self, contract: ContractAddress) -> EventFilter {
        match *self {
            MirrorTarget::ChatRoom => EventFilter::chat_room(contract),
            MirrorTarget::Moves { game_id } => EventFilter::moves(contract, game_id),
            MirrorTarget::GameChat { game_id } => EventFilter::game_chat(contract, game_id),
        }
    }

    pub fn default_header(&self) -> &'static str {
        match self {
            MirrorTarget::ChatRoom => CHAT_HEADER,
            MirrorTarget::Moves { .. } => MOVES_HEADER,
            MirrorTarget::GameChat { .. } => GAME_CHAT_HEADER,
        }
    }

    /// Chat text is forwarded verbatim; move lines must parse into a board position.
    pub fn action_from_line(&self, line: &str) -> Result<LocalAction, InputError> {
        match *self {
            MirrorTarget::ChatRoom => Ok(LocalAction::SendMessage {
                text: line.to_string(),
            }),
            MirrorTarget::GameChat { game_id } => Ok(LocalAction::SendGameChat {
                game_id,
                text: line.to_string(),
            }),
            MirrorTarget::Moves { game_id: None } => Err(InputError::NoGameSelected),
            MirrorTarget::Moves {
                game_id: Some(game_id),
            } => Ok(LocalAction::MakeMove {
                game_id,
                position: parse_position(line)?,
            }),
        }
    }
}

impl fmt::Display for MirrorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorTarget::ChatRoom => f.write_str("chat room"),
            MirrorTarget::Moves { game_id: Some(id) } => write!(f, "moves of game {id}"),
            MirrorTarget::Moves { game_id: None } => f.write_str("moves of all games"),
            MirrorTarget::GameChat { game_id } => write!(f, "chat of game {game_id}"),
        }
    }
}

/// Accepts `x y` or `x,y`.
pub fn parse_position(line: &str) -> Result<BoardPosition, InputError> {
    let parts: Vec<&str> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect();
    let [x, y] = parts.as_slice() else {
        return Err(InputError::MalformedMove(line.trim().to_string()));
    };
    let x = parse_coordinate(x)?;
    let y = parse_coordinate(y)?;
    BoardPosition::new(x, y).ok_or(InputError::OffBoard {
        x,
        y,
        size: BOARD_SIZE,
    })
}

fn parse_coordinate(raw: &str) -> Result<u8, InputError> {
    raw.parse::<u8>()
        .map_err(|_| InputError::InvalidCoordinate(raw.to_string()))
}
