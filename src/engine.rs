//! Chat engine actor
//!
//! The central actor that owns all shared state: the session registry,
//! moderation state and the message scheduler. Uses the Actor pattern with
//! mpsc channels for message passing: connection tasks and timer tasks post
//! `EngineCommand`s, and every mutation happens here, serially. Requests
//! from one session arrive in the order the client sent them, and the
//! engine never reorders them.

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::AppError;
use crate::moderation::Moderation;
use crate::protocol::{Request, Update, BROADCAST_TARGET};
use crate::registry::SessionRegistry;
use crate::scheduler::{MessageId, Scheduler, Target};
use crate::session::{Session, SessionId};

/// Channel buffer size for engine commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Commands sent from connection tasks and timers to the engine actor
#[derive(Debug)]
pub enum EngineCommand {
    /// New connection accepted
    Connect {
        session_id: SessionId,
        sender: mpsc::Sender<Update>,
    },
    /// One decoded request frame from a session
    Request {
        session_id: SessionId,
        request: Request,
    },
    /// A line that failed to parse as a request frame
    Malformed { session_id: SessionId },
    /// Connection closed (EOF, IO error, or after an exit command)
    Disconnect { session_id: SessionId },
    /// A delivery timer fired (or an immediate send was posted)
    Deliver { message_id: MessageId },
    /// A ban expired
    Unban { session_id: SessionId },
    /// A message's retention window passed
    Purge { message_id: MessageId },
}

/// All engine-owned state, handed to command handlers.
///
/// Owned and injected, never global: tests build isolated instances.
pub struct State {
    /// The live session set
    pub registry: SessionRegistry,
    /// Report/ban bookkeeping
    pub moderation: Moderation,
    /// Message store and pending sends
    pub scheduler: Scheduler,
    /// Handle for timers to post commands back to the actor
    pub cmd_tx: mpsc::Sender<EngineCommand>,
    /// Pre-assembled `help` reply
    pub help_text: String,
    /// Side notifications queued by the current handler
    outbox: Vec<(mpsc::Sender<Update>, Update)>,
}

impl State {
    pub fn new(config: Config, cmd_tx: mpsc::Sender<EngineCommand>, help_text: String) -> Self {
        Self {
            registry: SessionRegistry::new(),
            moderation: Moderation::new(config.reports_to_ban, config.ban_time),
            scheduler: Scheduler::new(config.message_ttl, config.history_limit),
            cmd_tx,
            help_text,
            outbox: Vec::new(),
        }
    }

    /// The session issuing the current request.
    ///
    /// Gone means the connection died mid-dispatch; surfaced as the fatal
    /// `ConnectionClosed` so the engine stops processing for it.
    pub fn requester(&self, session_id: SessionId) -> Result<&Session, AppError> {
        self.registry
            .get_by_id(session_id)
            .ok_or(AppError::ConnectionClosed)
    }

    /// Queue a side notification; the engine flushes after the handler.
    pub fn notify(&mut self, sender: mpsc::Sender<Update>, update: Update) {
        self.outbox.push((sender, update));
    }

    fn take_outbox(&mut self) -> Vec<(mpsc::Sender<Update>, Update)> {
        std::mem::take(&mut self.outbox)
    }
}

/// The engine actor
pub struct Engine {
    state: State,
    dispatcher: Dispatcher,
    receiver: mpsc::Receiver<EngineCommand>,
}

impl Engine {
    /// Create an engine with the default command table.
    ///
    /// Returns the actor and the command sender that connection tasks
    /// clone. Call `run()` on a spawned task to start it.
    pub fn new(config: Config) -> (Self, mpsc::Sender<EngineCommand>) {
        let (cmd_tx, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let dispatcher = crate::handlers::default_dispatcher();
        let state = State::new(config, cmd_tx.clone(), dispatcher.help_text());
        (
            Self {
                state,
                dispatcher,
                receiver,
            },
            cmd_tx,
        )
    }

    /// Run the engine event loop
    ///
    /// Continuously receives and processes commands until all senders are
    /// dropped.
    pub async fn run(mut self) {
        info!("Engine started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Engine shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Connect { session_id, sender } => {
                self.handle_connect(session_id, sender).await;
            }
            EngineCommand::Request {
                session_id,
                request,
            } => {
                self.handle_request(session_id, request).await;
            }
            EngineCommand::Malformed { session_id } => {
                self.handle_malformed(session_id).await;
            }
            EngineCommand::Disconnect { session_id } => {
                self.teardown(session_id);
            }
            EngineCommand::Deliver { message_id } => {
                self.handle_deliver(message_id).await;
            }
            EngineCommand::Unban { session_id } => {
                self.handle_unban(session_id).await;
            }
            EngineCommand::Purge { message_id } => {
                self.state.scheduler.purge(message_id);
            }
        }
    }

    /// Handle a new connection: allocate a session with a generated
    /// username and greet the client with it.
    async fn handle_connect(&mut self, session_id: SessionId, sender: mpsc::Sender<Update>) {
        match self.state.registry.create(session_id, sender.clone()) {
            Ok(session) => {
                let username = session.username.clone();
                info!("Session {} connected as '{}'", session_id, username);
                let _ = sender
                    .send(Update::ok(
                        format!("Welcome! Your username is \"{}\".", username),
                        username.clone(),
                    ))
                    .await;
            }
            Err(err) => {
                // Dropping the sender closes the connection's write side.
                error!("Failed to register session {}: {}", session_id, err);
            }
        }
    }

    /// Handle one request: dispatch, reply, flush side notifications,
    /// optionally tear the session down.
    async fn handle_request(&mut self, session_id: SessionId, request: Request) {
        // No further requests once the session started disconnecting.
        let Some(session) = self.state.registry.get_by_id(session_id) else {
            debug!("Dropping request from departed session {}", session_id);
            return;
        };
        let reply_sender = session.sender.clone();
        let requester_name = session.username.clone();
        debug!("Dispatching '{}' from '{}'", request.command, requester_name);

        let (reply, disconnect) =
            match self
                .dispatcher
                .dispatch(&mut self.state, session_id, &request)
            {
                Ok(outcome) => (outcome.reply, outcome.disconnect),
                Err(err) if err.is_recoverable() => {
                    (Update::error(err.to_string(), requester_name), false)
                }
                Err(err) => {
                    warn!("Fatal error handling '{}': {}", request.command, err);
                    self.teardown(session_id);
                    return;
                }
            };

        let _ = reply_sender.send(reply).await;
        self.flush_outbox().await;

        if disconnect {
            self.teardown(session_id);
        }
    }

    /// Deliver a message whose timer fired.
    ///
    /// The broadcast recipient set is captured here, at delivery time, so
    /// sessions that joined or left during the delay are handled correctly.
    async fn handle_deliver(&mut self, message_id: MessageId) {
        let cmd_tx = self.state.cmd_tx.clone();
        let Some(delivery) = self.state.scheduler.begin_delivery(message_id, cmd_tx) else {
            return;
        };

        // The sender may have renamed (or left) during the delay window.
        let sender_name = self
            .state
            .registry
            .get_by_id(delivery.sender)
            .map(|s| s.username.clone())
            .unwrap_or_else(|| delivery.sender_name.clone());
        self.state
            .scheduler
            .refresh_sender_name(message_id, &sender_name);

        match delivery.target {
            Target::Broadcast => {
                let recipients: Vec<mpsc::Sender<Update>> = self
                    .state
                    .registry
                    .all()
                    .map(|session| session.sender.clone())
                    .collect();
                let update = Update::chat(delivery.text, sender_name, BROADCAST_TARGET);
                // Concurrent fan-out; one broken recipient cannot stall or
                // fail the others.
                join_all(recipients.into_iter().map(|tx| {
                    let update = update.clone();
                    async move {
                        let _ = tx.send(update).await;
                    }
                }))
                .await;
            }
            Target::Session(target_id) => match self.state.registry.get_by_id(target_id) {
                Some(target) => {
                    let update =
                        Update::chat(delivery.text, sender_name, target.username.clone());
                    let _ = target.send(update).await;
                }
                None => {
                    // Target disconnected during the delay; drop silently.
                    debug!("Message {} target is gone", message_id);
                }
            },
        }
        debug!("Message {} delivered", message_id);
    }

    /// Reject a protocol-violating line; the connection stays open.
    async fn handle_malformed(&mut self, session_id: SessionId) {
        if let Some(session) = self.state.registry.get_by_id(session_id) {
            let _ = session
                .send(Update::error(
                    "Malformed request frame.",
                    session.username.clone(),
                ))
                .await;
        }
    }

    /// Release an expired ban and tell the session it may send again.
    async fn handle_unban(&mut self, session_id: SessionId) {
        let Some(session) = self.state.registry.get_by_id_mut(session_id) else {
            self.state.moderation.forget(session_id);
            return;
        };
        if self.state.moderation.unban(session) {
            let username = session.username.clone();
            let sender = session.sender.clone();
            let _ = sender
                .send(Update::ok(
                    "Your ban has expired. You may send messages again.",
                    username,
                ))
                .await;
        }
    }

    /// Tear a session down: cancel its timers, then remove it.
    ///
    /// Idempotent: a session that already left is a no-op, so an explicit
    /// exit followed by the connection task's Disconnect is harmless.
    fn teardown(&mut self, session_id: SessionId) {
        self.state.moderation.forget(session_id);
        let cmd_tx = self.state.cmd_tx.clone();
        let _ = self.state.scheduler.cancel(session_id, cmd_tx);

        if let Some(session) = self.state.registry.remove(session_id) {
            info!("Session {} ('{}') disconnected", session_id, session.username);
        }
    }

    async fn flush_outbox(&mut self) {
        let outbox = self.state.take_outbox();
        join_all(outbox.into_iter().map(|(tx, update)| async move {
            let _ = tx.send(update).await;
        }))
        .await;
    }
}
