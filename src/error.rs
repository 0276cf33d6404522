//! Error types for the chat server
//!
//! Defines application-level errors and update send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (surfaced to the client as an `ERROR` update).
#[derive(Debug, Error)]
pub enum AppError {
    /// The peer closed its connection (fatal to the connection loop)
    #[error("connection is closed")]
    ConnectionClosed,

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Bad username or message format
    #[error("{0}")]
    Validation(String),

    /// The requested username is already in use by a live session
    #[error("User with name \"{0}\" already exists.")]
    UsernameAlreadyTaken(String),

    /// No live session carries the given username
    #[error("User with name \"{0}\" does not exist.")]
    UserDoesNotExist(String),

    /// The reporter already reported this user
    #[error("You already reported \"{0}\".")]
    AlreadyReported(String),

    /// Users cannot report themselves
    #[error("You cannot report yourself.")]
    SelfReport,

    /// Banned users cannot send messages
    #[error("You are banned and cannot send messages.")]
    Banned,

    /// The sender has no pending scheduled message to cancel
    #[error("You have no scheduled messages.")]
    NoScheduledMessage,

    /// A second scheduled send while one is still pending
    #[error("You already have a scheduled message.")]
    AlreadyScheduled,

    /// The `-t` delay failed to parse as a non-negative integer
    #[error("Delay must be a non-negative integer, got \"{0}\".")]
    InvalidDelay(String),

    /// Malformed `-u`/`-t` option syntax in a `send` command
    #[error("{0}")]
    InvalidOptionSyntax(String),

    /// The command name did not match any registered handler
    #[error("\"{0}\" is unknown command.")]
    UnknownCommand(String),
}

impl AppError {
    /// Whether the error is recoverable for the connection.
    ///
    /// Recoverable errors become `ERROR` updates and the connection stays
    /// open; everything else tears the connection down.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::ConnectionClosed | AppError::Io(_) | AppError::ChannelSend
        )
    }
}

/// Update send errors
///
/// Occurs when attempting to send updates through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
