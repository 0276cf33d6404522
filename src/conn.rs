//! Connection handler
//!
//! Handles individual client connections: newline framing, request frame
//! parsing, and bidirectional communication with the engine actor. One
//! connection maps to exactly one session for its whole lifetime.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::EngineCommand;
use crate::error::AppError;
use crate::protocol::{Request, Update};
use crate::session::SessionId;

/// Channel buffer size for per-session updates
const UPDATE_BUFFER_SIZE: usize = 32;

/// Accept connections forever, spawning a handler task per connection.
pub async fn accept_loop(listener: TcpListener, cmd_tx: mpsc::Sender<EngineCommand>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a new TCP connection
///
/// Registers a session with the engine, then pumps request lines in and
/// update frames out until either side closes. The lifecycle is strictly
/// CONNECTED → (receive/dispatch/reply loop) → DISCONNECTING → TERMINATED:
/// once the teardown starts no further requests are forwarded.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<EngineCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let (read_half, mut write_half) = stream.into_split();

    // Generate session ID
    let session_id = SessionId::new();
    info!("Session {} connected from {}", session_id, peer_addr);

    // Create channel for engine -> client updates
    let (update_tx, mut update_rx) = mpsc::channel::<Update>(UPDATE_BUFFER_SIZE);

    // Register with the engine
    if cmd_tx
        .send(EngineCommand::Connect {
            session_id,
            sender: update_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register session {} - engine closed", session_id);
        return Err(AppError::ChannelSend);
    }

    // Clone cmd_tx for read task
    let cmd_tx_read = cmd_tx.clone();

    // Spawn read task (socket lines -> EngineCommand)
    let mut read_task = tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let command = match Request::from_line(line) {
                        Ok(request) => EngineCommand::Request {
                            session_id,
                            request,
                        },
                        Err(e) => {
                            warn!("Malformed frame from {}: {}", session_id, e);
                            EngineCommand::Malformed { session_id }
                        }
                    };
                    if cmd_tx_read.send(command).await.is_err() {
                        debug!("Engine closed, ending read task for {}", session_id);
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Session {} reached EOF", session_id);
                    break;
                }
                Err(e) => {
                    error!("Read error for {}: {}", session_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", session_id);
    });

    // Spawn write task (Update -> socket line)
    let mut write_task = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            match serde_json::to_string(&update) {
                Ok(mut json) => {
                    json.push('\n');
                    if write_half.write_all(json.as_bytes()).await.is_err() {
                        debug!("Socket write failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize update: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for session");

        // Half-close so the peer sees EOF after the last update
        let _ = write_half.shutdown().await;
    });

    // Wait for either task to complete. The write task finishing first
    // means the engine tore the session down (exit command); the read task
    // finishing first means the peer disconnected.
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", session_id);
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", session_id);
        }
    }
    read_task.abort();
    write_task.abort();

    // Send disconnect command (a no-op if the session already left)
    let _ = cmd_tx.send(EngineCommand::Disconnect { session_id }).await;

    info!("Session {} disconnected", session_id);

    Ok(())
}
