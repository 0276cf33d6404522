//! End-to-end tests over a real TCP socket
//!
//! Each test boots a server on an ephemeral port and drives it with plain
//! line-protocol clients, the way a real client process would.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use chatline::{accept_loop, Config, Engine, Status, Update, UpdateData, BROADCAST_TARGET};

async fn start_server(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (engine, cmd_tx) = Engine::new(config);
    tokio::spawn(engine.run());
    tokio::spawn(accept_loop(listener, cmd_tx));
    addr
}

struct TestClient {
    reader: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    username: String,
}

impl TestClient {
    /// Connect and consume the welcome update to learn the assigned name.
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
            username: String::new(),
        };
        let welcome = client.recv().await;
        assert_eq!(welcome.status, Status::Ok);
        client.username = welcome.target.clone();
        client
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn request(&mut self, command: &str, data: &str) {
        let frame = serde_json::json!({ "command": command, "data": data });
        self.send_line(&frame.to_string()).await;
    }

    async fn recv(&mut self) -> Update {
        let line = timeout(Duration::from_secs(3), self.reader.next_line())
            .await
            .expect("timed out waiting for update")
            .expect("read failed")
            .expect("connection closed");
        serde_json::from_str(&line).expect("malformed update frame")
    }

    async fn expect_closed(&mut self) {
        let next = timeout(Duration::from_secs(3), self.reader.next_line())
            .await
            .expect("timed out waiting for close");
        assert!(matches!(next, Ok(None)), "expected EOF, got {:?}", next);
    }

    async fn rename(&mut self, name: &str) {
        self.request("rename", name).await;
        let reply = self.recv().await;
        assert_eq!(reply.status, Status::Ok, "rename failed: {:?}", reply);
        self.username = name.to_string();
    }
}

fn text_of(update: &Update) -> &str {
    match &update.data {
        UpdateData::Text(text) => text,
        other => panic!("expected text payload, got {:?}", other),
    }
}

fn error_of(update: &Update) -> &str {
    match &update.data {
        UpdateData::Error { message } => message,
        other => panic!("expected error payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_is_greeted_with_generated_username() {
    let addr = start_server(Config::default()).await;
    let client = TestClient::connect(addr).await;
    assert!(client.username.starts_with("Guest-"));
}

#[tokio::test]
async fn test_client_able_to_send_broadcast_message() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    alice.rename("Alice").await;

    alice.request("send", "hello server!").await;
    let ack = alice.recv().await;
    assert_eq!(ack.status, Status::Ok);

    let msg = bob.recv().await;
    assert_eq!(msg.status, Status::Msg);
    assert_eq!(msg.target, BROADCAST_TARGET);
    assert_eq!(
        msg.data,
        UpdateData::Chat {
            text: "hello server!".to_string(),
            sender: "Alice".to_string(),
            target: BROADCAST_TARGET.to_string(),
        }
    );
}

#[tokio::test]
async fn test_client_able_to_send_private_message() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    alice.rename("Alice").await;
    bob.rename("Bob").await;

    alice.request("send", "-u Bob hello client!").await;
    let ack = alice.recv().await;
    assert_eq!(ack.status, Status::Ok);

    let msg = bob.recv().await;
    assert_eq!(msg.status, Status::Msg);
    assert_eq!(msg.target, "Bob");
    assert_eq!(
        msg.data,
        UpdateData::Chat {
            text: "hello client!".to_string(),
            sender: "Alice".to_string(),
            target: "Bob".to_string(),
        }
    );
}

#[tokio::test]
async fn test_send_to_unknown_user_yields_error_frame() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;

    alice.request("send", "-u Bob hi").await;
    let reply = alice.recv().await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(error_of(&reply), "User with name \"Bob\" does not exist.");
}

#[tokio::test]
async fn test_send_with_invalid_delay_yields_error_frame() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;

    alice.request("send", "-t abc hi").await;
    let reply = alice.recv().await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(
        error_of(&reply),
        "Delay must be a non-negative integer, got \"abc\"."
    );

    // No message was created, so nothing ever arrives.
    alice.request("history", "").await;
    assert_eq!(text_of(&alice.recv().await), "Message history is empty.");
}

#[tokio::test]
async fn test_client_able_to_schedule_message() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    alice.rename("Alice").await;
    bob.rename("Bob").await;

    alice.request("send", "-u Bob -t 1 hello later").await;
    let ack = alice.recv().await;
    assert_eq!(
        text_of(&ack),
        "Message \"hello later\" will be sent in 1 seconds."
    );

    let msg = bob.recv().await;
    assert_eq!(msg.status, Status::Msg);
    assert_eq!(
        msg.data,
        UpdateData::Chat {
            text: "hello later".to_string(),
            sender: "Alice".to_string(),
            target: "Bob".to_string(),
        }
    );
}

#[tokio::test]
async fn test_client_able_to_cancel_scheduled_message() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    bob.rename("Bob").await;

    alice.request("send", "-u Bob -t 2 hello later").await;
    alice.recv().await;

    alice.request("cancel", "").await;
    let reply = alice.recv().await;
    assert_eq!(
        text_of(&reply),
        "Scheduled message \"hello later\" has been cancelled."
    );

    // Bob never receives the cancelled message.
    bob.request("history", "").await;
    assert_eq!(text_of(&bob.recv().await), "Message history is empty.");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    bob.request("history", "").await;
    assert_eq!(text_of(&bob.recv().await), "Message history is empty.");
}

#[tokio::test]
async fn test_client_able_to_rename_himself() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;

    alice.request("rename", "new_name").await;
    let reply = alice.recv().await;
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(text_of(&reply), "Your username changed to \"new_name\".");
    assert_eq!(reply.target, "new_name");
}

#[tokio::test]
async fn test_client_able_to_report_other_client() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut mallory = TestClient::connect(addr).await;
    alice.rename("Alice").await;
    mallory.rename("Mallory").await;

    alice.request("report", "Mallory").await;
    assert_eq!(text_of(&alice.recv().await), "You reported user \"Mallory\".");
    assert_eq!(
        text_of(&mallory.recv().await),
        "User \"Alice\" reported you."
    );
}

#[tokio::test]
async fn test_client_banned_after_enough_reports() {
    let config = Config {
        ban_time: Duration::from_secs(60),
        ..Config::default()
    };
    let addr = start_server(config).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    let mut mallory = TestClient::connect(addr).await;
    alice.rename("Alice").await;
    bob.rename("Bob").await;
    mallory.rename("Mallory").await;

    alice.request("report", "Mallory").await;
    alice.recv().await;
    mallory.recv().await;

    bob.request("report", "Mallory").await;
    bob.recv().await;
    mallory.recv().await; // reported notice
    let ban_notice = mallory.recv().await;
    assert_eq!(
        text_of(&ban_notice),
        "You have been banned for 60 seconds due to reports from other users."
    );

    mallory.request("send", "let me talk").await;
    let reply = mallory.recv().await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(error_of(&reply), "You are banned and cannot send messages.");
}

#[tokio::test]
async fn test_client_able_to_leave_server() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    alice.rename("Alice").await;
    bob.rename("Bob").await;

    alice.request("exit", "").await;
    let farewell = alice.recv().await;
    assert_eq!(text_of(&farewell), "Bye, Alice!");
    alice.expect_closed().await;

    // Give the server a moment to finish the teardown.
    tokio::time::sleep(Duration::from_millis(200)).await;
    bob.request("users", "").await;
    assert_eq!(text_of(&bob.recv().await), "Active users: [Bob]");
}

#[tokio::test]
async fn test_malformed_line_yields_error_and_keeps_connection() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;

    alice.send_line("this is not json").await;
    let reply = alice.recv().await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(error_of(&reply), "Malformed request frame.");

    // The connection is still usable afterwards.
    alice.request("help", "").await;
    let reply = alice.recv().await;
    assert_eq!(reply.status, Status::Ok);
    assert!(text_of(&reply).starts_with("Possible commands:"));
}

#[tokio::test]
async fn test_users_command_lists_everyone() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    alice.rename("Alice").await;
    bob.rename("Bob").await;

    alice.request("users", "").await;
    assert_eq!(text_of(&alice.recv().await), "Active users: [Alice] [Bob]");
}

#[tokio::test]
async fn test_logout_alias_behaves_like_exit() {
    let addr = start_server(Config::default()).await;
    let mut alice = TestClient::connect(addr).await;
    alice.rename("Alice").await;

    alice.request("logout", "").await;
    assert_eq!(text_of(&alice.recv().await), "Bye, Alice!");
    alice.expect_closed().await;
}
