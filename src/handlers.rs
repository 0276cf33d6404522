//! Command handlers
//!
//! One function per command. Every handler validates its arguments fully
//! before touching registry/moderation/scheduler state, so a failed request
//! never leaves a partial mutation behind. Side notifications to other
//! sessions go through the state outbox; the engine flushes it after the
//! handler returns.

use crate::dispatch::{CommandSpec, Dispatcher, Outcome};
use crate::engine::State;
use crate::error::AppError;
use crate::moderation::ReportOutcome;
use crate::protocol::{self, Request, Update};
use crate::scheduler::Target;
use crate::session::SessionId;

/// Build the production command table.
pub fn default_dispatcher() -> Dispatcher {
    Dispatcher::new(
        vec![
            CommandSpec {
                name: "help",
                aliases: &[],
                description: "help - returns the description of every command the server understands.",
                handler: help,
            },
            CommandSpec {
                name: "exit",
                aliases: &["logout"],
                description: "exit - closes the connection between you and the server.",
                handler: exit,
            },
            CommandSpec {
                name: "rename",
                aliases: &[],
                description: "rename <name> - changes your username on the server.",
                handler: rename,
            },
            CommandSpec {
                name: "users",
                aliases: &[],
                description: "users - lists all users connected to the server.",
                handler: users,
            },
            CommandSpec {
                name: "send",
                aliases: &[],
                description: "send [-u <username>] [-t <seconds>] <text> - sends a message to all users; \
                              -u sends to a single user, -t delays the send by the given number of seconds.",
                handler: send,
            },
            CommandSpec {
                name: "cancel",
                aliases: &[],
                description: "cancel - cancels your scheduled message.",
                handler: cancel,
            },
            CommandSpec {
                name: "history",
                aliases: &[],
                description: "history - shows the latest messages of the common chat.",
                handler: history,
            },
            CommandSpec {
                name: "report",
                aliases: &[],
                description: "report <username> - reports a user; enough reports ban them for a while.",
                handler: report,
            },
        ],
        unknown,
    )
}

fn help(state: &mut State, session_id: SessionId, _request: &Request) -> Result<Outcome, AppError> {
    let username = state.requester(session_id)?.username.clone();
    Ok(Outcome::reply(Update::ok(state.help_text.clone(), username)))
}

fn exit(state: &mut State, session_id: SessionId, _request: &Request) -> Result<Outcome, AppError> {
    let username = state.requester(session_id)?.username.clone();
    Ok(Outcome::disconnect(Update::ok(
        format!("Bye, {}!", username),
        username,
    )))
}

fn rename(state: &mut State, session_id: SessionId, request: &Request) -> Result<Outcome, AppError> {
    let new_username = request.args();
    protocol::validate_username(new_username)?;
    state.registry.rename(session_id, new_username)?;
    Ok(Outcome::reply(Update::ok(
        format!("Your username changed to \"{}\".", new_username),
        new_username,
    )))
}

fn users(state: &mut State, session_id: SessionId, _request: &Request) -> Result<Outcome, AppError> {
    let username = state.requester(session_id)?.username.clone();
    let mut names: Vec<String> = state
        .registry
        .all()
        .map(|session| format!("[{}]", session.username))
        .collect();
    names.sort();
    Ok(Outcome::reply(Update::ok(
        format!("Active users: {}", names.join(" ")),
        username,
    )))
}

fn send(state: &mut State, session_id: SessionId, request: &Request) -> Result<Outcome, AppError> {
    let requester = state.requester(session_id)?;
    if requester.is_banned {
        return Err(AppError::Banned);
    }
    let sender_name = requester.username.clone();

    let args = protocol::parse_send_args(request.args())?;
    let target = match &args.username {
        Some(username) => Target::Session(state.registry.get(username)?.id),
        None => Target::Broadcast,
    };

    let cmd_tx = state.cmd_tx.clone();
    state.scheduler.schedule(
        session_id,
        sender_name.clone(),
        target,
        args.text.clone(),
        args.delay,
        cmd_tx,
    )?;

    let ack = match args.delay {
        Some(seconds) if seconds > 0 => format!(
            "Message \"{}\" will be sent in {} seconds.",
            args.text, seconds
        ),
        _ => match &args.username {
            Some(username) => format!("Your message was sent to \"{}\".", username),
            None => "Your message was sent to all users.".to_string(),
        },
    };
    Ok(Outcome::reply(Update::ok(ack, sender_name)))
}

fn cancel(state: &mut State, session_id: SessionId, _request: &Request) -> Result<Outcome, AppError> {
    let username = state.requester(session_id)?.username.clone();
    let cmd_tx = state.cmd_tx.clone();
    let text = state.scheduler.cancel(session_id, cmd_tx)?;
    Ok(Outcome::reply(Update::ok(
        format!("Scheduled message \"{}\" has been cancelled.", text),
        username,
    )))
}

fn history(state: &mut State, session_id: SessionId, _request: &Request) -> Result<Outcome, AppError> {
    let username = state.requester(session_id)?.username.clone();
    let lines = state.scheduler.history(session_id);
    let reply = if lines.is_empty() {
        "Message history is empty.".to_string()
    } else {
        lines.join("\n")
    };
    Ok(Outcome::reply(Update::ok(reply, username)))
}

fn report(state: &mut State, session_id: SessionId, request: &Request) -> Result<Outcome, AppError> {
    let reporter_name = state.requester(session_id)?.username.clone();
    let target_username = request.args();
    if target_username.is_empty() {
        return Err(AppError::Validation("Username is required.".to_string()));
    }

    let target_id = state.registry.get(target_username)?.id;
    let ban_seconds = state.moderation.ban_seconds();
    let cmd_tx = state.cmd_tx.clone();

    let target = state
        .registry
        .get_by_id_mut(target_id)
        .ok_or_else(|| AppError::UserDoesNotExist(target_username.to_string()))?;
    let outcome = state.moderation.report(session_id, target)?;
    let target_name = target.username.clone();
    let target_sender = target.sender.clone();

    state.notify(
        target_sender.clone(),
        Update::ok(
            format!("User \"{}\" reported you.", reporter_name),
            target_name.clone(),
        ),
    );

    if outcome == ReportOutcome::Banned {
        if let Some(target) = state.registry.get_by_id_mut(target_id) {
            state.moderation.ban(target, cmd_tx);
        }
        state.notify(
            target_sender,
            Update::ok(
                format!(
                    "You have been banned for {} seconds due to reports from other users.",
                    ban_seconds
                ),
                target_name.clone(),
            ),
        );
    }

    Ok(Outcome::reply(Update::ok(
        format!("You reported user \"{}\".", target_name),
        reporter_name,
    )))
}

fn unknown(state: &mut State, session_id: SessionId, request: &Request) -> Result<Outcome, AppError> {
    let username = state.requester(session_id)?.username.clone();
    Ok(Outcome::reply(Update::error(
        AppError::UnknownCommand(request.command.clone()).to_string(),
        username,
    )))
}
