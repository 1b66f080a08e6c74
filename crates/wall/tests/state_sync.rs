use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use wall::net::{ClientStart, Inbound, ServerNetwork, StateFlush, connect, kind, spawn_connection};
use wall::{ManualClock, Schema, StateManager, StateStore};

async fn recv(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Inbound {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

#[tokio::test]
async fn stored_state_reaches_client_buffers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        spawn_connection(stream, server_tx)
    });

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    let client = connect(addr, client_tx).await.unwrap();
    accept.await.unwrap();

    let network = Arc::new(ServerNetwork::default());
    client.send(kind::CLIENT_START, json!({ "rect": "0,0,960,1080", "offset": [0.0, 0.0] }));
    match recv(&mut server_rx).await {
        Inbound::Frame { socket, frame } => {
            assert_eq!(frame.kind, kind::CLIENT_START);
            let start: ClientStart = frame.decode().unwrap();
            network.register(&start, socket).unwrap();
        }
        other => panic!("unexpected {:?}", other),
    }

    let store = StateStore::new(network.clone());
    let module = store.open("1-1000");
    module.store(
        "balls",
        1000.0,
        json!([{ "x": 10.0, "y": 5.0 }, { "x": 300.0, "y": 7.0 }]),
    );
    assert!(store.flush());

    let manager = StateManager::new(Arc::new(ManualClock::new(1050.0)));
    match recv(&mut client_rx).await {
        Inbound::Frame { frame, .. } => {
            assert_eq!(frame.kind, kind::STATE);
            let flush: StateFlush = frame.decode().unwrap();
            manager.receive_flush(flush);
        }
        other => panic!("unexpected {:?}", other),
    }

    let balls = manager
        .open("1-1000")
        .define("balls", Schema::array(Schema::object([("x", Schema::lerp())])))
        .unwrap();
    assert_eq!(balls.get(1050.0), Some(json!([{ "x": 10.0 }, { "x": 300.0 }])));

    assert!(store.close("1-1000"));
    match recv(&mut client_rx).await {
        Inbound::Frame { frame, .. } => {
            assert_eq!(frame.kind, kind::STATE_CLOSED);
            let module_id: String = frame.decode().unwrap();
            manager.receive_closed(&module_id);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(balls.get(1050.0), None);
}
