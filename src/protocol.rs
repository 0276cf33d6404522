//! Wire protocol definitions
//!
//! One JSON object per newline-terminated frame. Requests carry a command
//! name plus a raw argument string; updates carry a status, a payload and
//! the resolved recipient. The token grammar of the command language
//! (`send -u <user> -t <seconds> <text>` and friends) is parsed here so
//! handlers receive fixed, explicit fields.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Wire spelling of the broadcast sentinel.
pub const BROADCAST_TARGET: &str = "BROADCAST";

/// Username length bounds (characters)
const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 15;

/// Client → Server frame
///
/// `data` is the raw argument string after the command name; each handler
/// parses and validates its own arguments from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub data: Option<String>,
}

impl Request {
    /// Parse one received line into a request frame.
    pub fn from_line(line: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(line)?)
    }

    /// The argument string, trimmed; empty when the frame carried none.
    pub fn args(&self) -> &str {
        self.data.as_deref().unwrap_or("").trim()
    }
}

/// Update status on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Command succeeded
    Ok,
    /// Command failed; payload explains why
    Error,
    /// A chat message delivery
    Msg,
}

/// Update payload
///
/// Fixed shapes per update kind: plain text for command replies, an object
/// with a `message` field for errors, and the chat triple for deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateData {
    /// Command reply or server notice
    Text(String),
    /// Error description
    Error { message: String },
    /// Delivered chat message
    Chat {
        text: String,
        sender: String,
        target: String,
    },
}

/// Server → Client frame
///
/// `target` is always the resolved recipient username, or `"BROADCAST"`
/// when the update fans out to every live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub status: Status,
    pub data: UpdateData,
    pub target: String,
}

impl Update {
    /// A successful command reply or server notice.
    pub fn ok(text: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            data: UpdateData::Text(text.into()),
            target: target.into(),
        }
    }

    /// An error reply.
    pub fn error(message: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: UpdateData::Error {
                message: message.into(),
            },
            target: target.into(),
        }
    }

    /// A chat message delivery. The payload repeats the resolved target so
    /// clients can render private and broadcast messages differently.
    pub fn chat(
        text: impl Into<String>,
        sender: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self {
            status: Status::Msg,
            data: UpdateData::Chat {
                text: text.into(),
                sender: sender.into(),
                target: target.clone(),
            },
            target,
        }
    }
}

/// Parsed arguments of the `send` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendArgs {
    /// `-u`/`--username`: private recipient; `None` means broadcast
    pub username: Option<String>,
    /// `-t`/`--time`: delay in seconds; `None` means immediate
    pub delay: Option<u64>,
    /// The message text
    pub text: String,
}

/// Parse `[-u <username>] [-t <seconds>] <text...>`.
///
/// Options may appear in either order but must precede the text. The text
/// is re-joined from the remaining whitespace-separated tokens.
pub fn parse_send_args(raw: &str) -> Result<SendArgs, AppError> {
    let mut tokens = raw.split_whitespace().peekable();
    let mut username: Option<String> = None;
    let mut delay: Option<u64> = None;

    while let Some(&token) = tokens.peek() {
        match token {
            "-u" | "--username" => {
                tokens.next();
                if username.is_some() {
                    return Err(option_repeated(token));
                }
                username = Some(option_value(token, tokens.next())?.to_string());
            }
            "-t" | "--time" => {
                tokens.next();
                if delay.is_some() {
                    return Err(option_repeated(token));
                }
                delay = Some(parse_delay(option_value(token, tokens.next())?)?);
            }
            _ => break,
        }
    }

    let text = tokens.collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return Err(AppError::Validation(
            "Message text must not be empty.".to_string(),
        ));
    }

    Ok(SendArgs {
        username,
        delay,
        text,
    })
}

fn option_value<'a>(option: &str, value: Option<&'a str>) -> Result<&'a str, AppError> {
    value.ok_or_else(|| {
        AppError::InvalidOptionSyntax(format!("Option \"{}\" requires a value.", option))
    })
}

fn option_repeated(option: &str) -> AppError {
    AppError::InvalidOptionSyntax(format!("Option \"{}\" given more than once.", option))
}

/// Validate a username: 3-15 characters, no whitespace.
pub fn validate_username(name: &str) -> Result<(), AppError> {
    if name.chars().count() < USERNAME_MIN {
        return Err(AppError::Validation(format!(
            "Username must be at least {} characters long.",
            USERNAME_MIN
        )));
    }
    if name.chars().count() > USERNAME_MAX {
        return Err(AppError::Validation(format!(
            "Username must not exceed {} characters.",
            USERNAME_MAX
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(
            "Username must not contain whitespace.".to_string(),
        ));
    }
    Ok(())
}

/// Validate a send delay: a non-negative integer number of seconds.
pub fn parse_delay(raw: &str) -> Result<u64, AppError> {
    raw.parse::<u64>()
        .map_err(|_| AppError::InvalidDelay(raw.to_string()))
}
