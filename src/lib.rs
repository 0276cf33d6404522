//! Line-protocol Chat Server Library
//!
//! A chat server speaking newline-delimited JSON over TCP, built with
//! tokio using the Actor pattern for state management.
//!
//! # Features
//! - Generated session usernames with rename
//! - Broadcast and private messages
//! - Delayed (scheduled) sends with cancellation
//! - Report-driven temporary bans with automatic unban
//! - In-memory message history with a retention window
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Engine` is the central actor managing all state
//! - Each connection has a `conn` task communicating with the engine
//! - Timers post commands back into the engine instead of mutating state
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use chatline::{accept_loop, Config, Engine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let listener = TcpListener::bind(config.bind_addr()).await.unwrap();
//!     let (engine, cmd_tx) = Engine::new(config);
//!
//!     tokio::spawn(engine.run());
//!     accept_loop(listener, cmd_tx).await;
//! }
//! ```

pub mod config;
pub mod conn;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod moderation;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod session;

// Re-export main types for convenience
pub use config::Config;
pub use conn::{accept_loop, handle_connection};
pub use dispatch::{CommandSpec, Dispatcher, Outcome};
pub use engine::{Engine, EngineCommand, State};
pub use error::{AppError, SendError};
pub use handlers::default_dispatcher;
pub use moderation::{Moderation, ReportOutcome};
pub use protocol::{Request, Status, Update, UpdateData, BROADCAST_TARGET};
pub use registry::SessionRegistry;
pub use scheduler::{MessageId, MessageStatus, Scheduler, Target};
pub use session::{Session, SessionId};
