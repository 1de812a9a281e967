//! End-to-end test over real TCP sockets: two clients register, log in,
//! become friends and exchange a message through a served listener.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use parley_gateway::{Router, SessionRegistry};
use parley_store::Store;

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Client {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, v: Value) {
        let mut line = v.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a server line")
            .unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    async fn auth(&mut self, name: &str) -> u64 {
        let creds = json!({"username": name, "password": "pw"});
        self.send(json!({"type": "AUTH_REGISTER", "data": creds})).await;
        assert_eq!(self.recv().await["type"], "AUTH_OK");
        self.send(json!({"type": "AUTH_LOGIN", "data": creds})).await;
        let ok = self.recv().await;
        assert_eq!(ok["type"], "AUTH_OK");
        ok["data"]["user_id"].as_u64().unwrap()
    }
}

async fn spawn_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new(Store::new(), SessionRegistry::new());
    tokio::spawn(parley_gateway::serve(listener, router));
    addr
}

#[tokio::test]
async fn two_clients_chat_over_tcp() {
    let addr = spawn_server().await;

    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;

    // Ping works before any authentication.
    alice.send(json!({"type": "PING", "request_id": "p-1"})).await;
    let pong = alice.recv().await;
    assert_eq!(pong["type"], "PONG");
    assert_eq!(pong["request_id"], "p-1");

    let alice_id = alice.auth("alice").await;
    let bob_id = bob.auth("bob").await;

    alice
        .send(json!({"type": "FRIEND_REQUEST", "data": {"to_user_id": bob_id}}))
        .await;
    assert_eq!(alice.recv().await["type"], "FRIEND_REQUEST_SENT");
    let incoming = bob.recv().await;
    assert_eq!(incoming["type"], "FRIEND_REQUEST_INCOMING");
    assert_eq!(incoming["data"]["from_username"], "alice");
    let request_id = incoming["data"]["request_id"].as_u64().unwrap();

    bob.send(json!({"type": "FRIEND_ACCEPT", "data": {"request_id": request_id}}))
        .await;
    assert_eq!(bob.recv().await["type"], "FRIEND_ACCEPTED");
    assert_eq!(alice.recv().await["type"], "FRIEND_ACCEPTED");

    alice
        .send(json!({
            "type": "MSG_SEND",
            "data": {"to_user_id": bob_id, "content": "hello over tcp"},
            "request_id": "m-1",
        }))
        .await;
    let echo = alice.recv().await;
    assert_eq!(echo["type"], "MSG_RECV");
    assert_eq!(echo["data"]["message_id"], 1);
    assert_eq!(echo["request_id"], "m-1");

    let delivered = bob.recv().await;
    assert_eq!(delivered["type"], "MSG_RECV");
    assert_eq!(delivered["data"]["from_user_id"], alice_id);
    assert_eq!(delivered["data"]["content"], "hello over tcp");
}

#[tokio::test]
async fn disconnect_frees_the_session_binding() {
    let addr = spawn_server().await;

    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    let alice_id = alice.auth("alice").await;
    bob.auth("bob").await;

    // Alice drops; a message to her must not error out bob's session.
    drop(alice);
    tokio::time::sleep(Duration::from_millis(100)).await;

    bob.send(json!({"type": "MSG_SEND", "data": {"to_user_id": alice_id, "content": "hi"}}))
        .await;
    let echo = bob.recv().await;
    assert_eq!(echo["type"], "MSG_RECV");

    bob.send(json!({"type": "PING"})).await;
    assert_eq!(bob.recv().await["type"], "PONG");
}
