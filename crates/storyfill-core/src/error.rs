use thiserror::Error;

use crate::room::RoomState;

/// Domain errors raised by room mutations. The server layer maps these onto
/// HTTP error kinds; nothing here knows about status codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room is full (max {max} players).")]
    RoomFull { max: usize },

    #[error("Player not found.")]
    PlayerNotFound,

    #[error("Prompt not found for player.")]
    PromptNotFound,

    #[error("Invalid room state transition: {from:?} -> {to:?}.")]
    InvalidTransition { from: RoomState, to: RoomState },

    #[error("Prompt already submitted with a different value.")]
    SubmissionConflict,

    #[error("Pick a story template before starting.")]
    TemplateRequired,

    #[error("Need at least {min} players to start.")]
    NotEnoughPlayers { min: usize },

    #[error("Story not revealed yet.")]
    NotRevealed,

    #[error("All prompts must be submitted before reveal.")]
    NotReadyToReveal,
}

pub type Result<T> = std::result::Result<T, RoomError>;
