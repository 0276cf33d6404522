//! Command dispatch
//!
//! An explicit lookup table from command name to handler function, built
//! once at startup and handed to the engine. Unknown commands resolve to a
//! first-class fallback handler instead of an error path, so dispatch
//! itself never fails.

use std::collections::HashMap;

use crate::engine::State;
use crate::error::AppError;
use crate::protocol::{Request, Update};
use crate::session::SessionId;

/// What a handler produced: exactly one reply for the requester, plus an
/// optional instruction to tear the connection down after the reply.
#[derive(Debug)]
pub struct Outcome {
    pub reply: Update,
    pub disconnect: bool,
}

impl Outcome {
    /// Reply and keep the connection open.
    pub fn reply(update: Update) -> Self {
        Self {
            reply: update,
            disconnect: false,
        }
    }

    /// Reply, then disconnect the session.
    pub fn disconnect(update: Update) -> Self {
        Self {
            reply: update,
            disconnect: true,
        }
    }
}

/// A command handler. Handlers validate their own arguments fully before
/// mutating any state; recoverable errors bubble up and become `ERROR`
/// updates at the dispatch boundary.
pub type HandlerFn = fn(&mut State, SessionId, &Request) -> Result<Outcome, AppError>;

/// One registered command: its name, aliases, one-line help description
/// and handler.
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub handler: HandlerFn,
}

/// The command table.
pub struct Dispatcher {
    specs: Vec<CommandSpec>,
    table: HashMap<&'static str, HandlerFn>,
    unknown: HandlerFn,
}

impl Dispatcher {
    /// Build the lookup table from a list of command specs plus the
    /// fallback for unrecognized command names.
    pub fn new(specs: Vec<CommandSpec>, unknown: HandlerFn) -> Self {
        let mut table = HashMap::new();
        for spec in &specs {
            table.insert(spec.name, spec.handler);
            for alias in spec.aliases {
                table.insert(*alias, spec.handler);
            }
        }
        Self {
            specs,
            table,
            unknown,
        }
    }

    /// Look up the handler for a request and run it.
    pub fn dispatch(
        &self,
        state: &mut State,
        session_id: SessionId,
        request: &Request,
    ) -> Result<Outcome, AppError> {
        let handler = self
            .table
            .get(request.command.as_str())
            .copied()
            .unwrap_or(self.unknown);
        handler(state, session_id, request)
    }

    /// The `help` reply: one description line per registered command.
    pub fn help_text(&self) -> String {
        let mut lines = vec!["Possible commands:".to_string()];
        lines.extend(self.specs.iter().map(|spec| spec.description.to_string()));
        lines.join("\n")
    }
}
