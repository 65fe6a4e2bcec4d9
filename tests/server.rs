//! WebSocket round trips against a live server on a loopback port.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use empires::game::{EntityType, GameEvent, Replica, TaskKind};
use empires::network::{ClientCommand, ClientMessage, ErrorCode, GameServer, ServerConfig, ServerMessage};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(min_peers: usize) -> (Arc<GameServer>, String) {
    start_with(ServerConfig { tick_rate: 50, min_peers, ..Default::default() }).await
}

async fn start_with(config: ServerConfig) -> (Arc<GameServer>, String) {
    let server = Arc::new(GameServer::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });
    (server, url)
}

async fn stop_server(server: Arc<GameServer>) {
    server.shutdown();
    tokio::task::spawn_blocking(move || server.join_simulation()).await.unwrap();
}

async fn connect(url: &str) -> Client {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Client, msg: &ClientMessage) {
    ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
}

async fn recv(ws: &mut Client) -> ServerMessage {
    loop {
        let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = frame {
            return ServerMessage::from_json(&text).unwrap();
        }
    }
}

/// Feed events into the replica until two start markers have arrived.
async fn sync(ws: &mut Client, replica: &Replica) {
    while !replica.is_started() {
        if let ServerMessage::Event(event) = recv(ws).await {
            replica.apply(&event);
        }
    }
}

fn hello(name: &str) -> ClientMessage {
    ClientMessage::Hello { username: name.to_string(), seat: None }
}

#[tokio::test]
async fn test_hello_starts_the_session() {
    let (server, url) = start_server(1).await;
    let mut ws = connect(&url).await;

    send(&mut ws, &hello("ana")).await;
    match recv(&mut ws).await {
        ServerMessage::Welcome { seat, session_started, .. } => {
            assert_eq!(seat, Some(1));
            assert!(!session_started);
        }
        other => panic!("expected welcome, got {:?}", other),
    }

    let replica = Replica::new();
    sync(&mut ws, &replica).await;
    assert!(server.is_started());
    let total = server.world().with_state(|st| st.entities().len());
    assert_eq!(replica.entity_count(), total);

    let names = server.world().with_state(|st| st.players().iter().map(|p| p.name.clone()).collect::<Vec<_>>());
    assert_eq!(names[0], "Gaia");
    assert_eq!(names[1], "ana");

    stop_server(server).await;
}

#[tokio::test]
async fn test_commands_need_hello() {
    let (server, url) = start_server(2).await;
    let mut ws = connect(&url).await;

    let kill = ClientMessage::Command(ClientCommand::EntityKill { target: empires::IdRef::new(0, 0) });
    send(&mut ws, &kill).await;
    match recv(&mut ws).await {
        ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::NotIdentified),
        other => panic!("expected error, got {:?}", other),
    }

    // identified, but one peer short of starting
    send(&mut ws, &hello("ana")).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Welcome { .. }));
    send(&mut ws, &kill).await;
    match recv(&mut ws).await {
        ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::NotStarted),
        other => panic!("expected error, got {:?}", other),
    }
    assert!(!server.is_started());

    ws.send(Message::Text("{\"type\":\"dance\"}".into())).await.unwrap();
    match recv(&mut ws).await {
        ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::InvalidInput),
        other => panic!("expected error, got {:?}", other),
    }

    send(&mut ws, &ClientMessage::Ping { timestamp: 17 }).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { timestamp: 17, .. }));

    stop_server(server).await;
}

#[tokio::test]
async fn test_late_joiner_gets_full_state_and_commands_flow() {
    let (server, url) = start_server(1).await;

    let mut first = connect(&url).await;
    send(&mut first, &hello("ana")).await;
    let first_replica = Replica::new();
    sync(&mut first, &first_replica).await;

    // task a seat 1 villager so updates start flowing
    let villager = server.world().with_state(|st| {
        st.entities()
            .iter()
            .find(|(_, e)| e.kind == EntityType::Villager && e.color == 1)
            .map(|(id, _)| id)
            .unwrap()
    });
    let go = ClientMessage::Command(ClientCommand::EntityTask {
        source: villager,
        task: TaskKind::Move { x: empires::core::fixed::from_int(20), y: empires::core::fixed::from_int(20) },
    });
    send(&mut first, &go).await;

    let mut moved = false;
    while !moved {
        if let ServerMessage::Event(event) = recv(&mut first).await {
            if let GameEvent::EntityUpdate(update) = &event {
                moved = update.id == villager;
            }
            first_replica.apply(&event);
        }
    }

    let mut second = connect(&url).await;
    send(&mut second, &hello("bo")).await;
    match recv(&mut second).await {
        ServerMessage::Welcome { seat, session_started, .. } => {
            assert_eq!(seat, Some(2));
            assert!(session_started);
        }
        other => panic!("expected welcome, got {:?}", other),
    }
    let second_replica = Replica::new();
    sync(&mut second, &second_replica).await;
    let total = server.world().with_state(|st| st.entities().len());
    assert_eq!(second_replica.entity_count(), total);

    send(&mut second, &ClientMessage::Leave).await;
    stop_server(server).await;
}

#[tokio::test]
async fn test_peer_that_cannot_keep_up_is_disconnected() {
    // room for the welcome, not for the startup stream
    let config = ServerConfig { tick_rate: 50, min_peers: 1, outbound_buffer: 1, ..Default::default() };
    let (server, url) = start_with(config).await;
    let mut ws = connect(&url).await;
    send(&mut ws, &hello("ana")).await;

    let closed = loop {
        match timeout(WAIT, ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => break false,
        }
    };
    assert!(closed, "socket stayed open after the peer was dropped");
    assert!(server.is_started());

    stop_server(server).await;
}
