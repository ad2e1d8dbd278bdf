//! End-to-end tests: fake gateway -> bridge -> observer server -> observer client.

use pixelbridge_core::{
    AgentId, AgentMeta, AgentStatus, ConnectionState, ObservedStatus, ObserverRequest,
    OutboundMessage,
};
use pixelbridge_gateway::protocol::{
    EVENT_APPROVAL_REQUESTED, METHOD_APPROVAL_RESOLVE, METHOD_SYSTEM_PRESENCE,
};
use pixelbridge_integration_tests::{recv, recv_until, FakeGateway, RunningBridge, WAIT};
use pixelbridge_server::{
    FileLayoutStore, LayoutStore, ObserverConnection, ObserverConnectionConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

type Messages = mpsc::UnboundedReceiver<OutboundMessage>;

/// Connect an observer and consume its snapshot.
async fn observe(url: &str) -> (ObserverConnection, Messages, Vec<OutboundMessage>) {
    let (conn, mut rx) = ObserverConnection::new(ObserverConnectionConfig::new(url));
    conn.connect();
    let mut snapshot = Vec::new();
    loop {
        let message = recv(&mut rx).await;
        let done = matches!(message, OutboundMessage::ConnectionStatus { .. });
        snapshot.push(message);
        if done {
            return (conn, rx, snapshot);
        }
    }
}

async fn start_main_with_tool(gw: &FakeGateway, rx: &mut Messages, command: &str) {
    gw.emit_agent("main", "lifecycle", json!({"phase": "start"}));
    gw.emit_agent(
        "main",
        "tool",
        json!({
            "phase": "start",
            "name": "exec",
            "toolCallId": "t1",
            "args": {"command": command}
        }),
    );
    recv_until(rx, |m| matches!(m, OutboundMessage::AgentToolStart { .. })).await;
}

fn request_approval(gw: &FakeGateway, approval_id: &str) {
    gw.emit(
        EVENT_APPROVAL_REQUESTED,
        json!({"id": approval_id, "request": {"command": "rm -rf build", "sessionKey": "main"}}),
    );
}

#[tokio::test]
async fn test_bridge_handshakes_and_announces_presence() {
    let gw = FakeGateway::start().await;
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;

    let presence = gw.next_request(METHOD_SYSTEM_PRESENCE).await;
    let params = presence.params.unwrap();
    assert_eq!(params["mode"], "backend");
    assert_eq!(params["reason"], "connect");
    assert_eq!(gw.handshakes(), 1);
}

#[tokio::test]
async fn test_empty_snapshot() {
    let gw = FakeGateway::start().await;
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;

    let (_conn, _rx, snapshot) = observe(&bridge.observer_url).await;
    assert_eq!(
        snapshot,
        vec![
            OutboundMessage::LayoutLoaded { layout: None },
            OutboundMessage::ExistingAgents {
                agents: vec![],
                meta: vec![]
            },
            OutboundMessage::ConnectionStatus {
                status: ConnectionState::Connected
            },
        ]
    );
}

#[tokio::test]
async fn test_live_deltas_and_late_observer_snapshot() {
    let gw = FakeGateway::start().await;
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;
    let (_first, mut first_rx, _) = observe(&bridge.observer_url).await;

    gw.emit_agent("main", "lifecycle", json!({"phase": "start"}));
    gw.emit_agent(
        "main",
        "tool",
        json!({
            "phase": "start",
            "name": "Bash",
            "toolCallId": "t1",
            "args": {"command": "npm run test"}
        }),
    );

    assert_eq!(
        recv(&mut first_rx).await,
        OutboundMessage::AgentCreated {
            id: AgentId(1),
            session_key: "main".into()
        }
    );
    assert_eq!(
        recv(&mut first_rx).await,
        OutboundMessage::AgentStatus {
            id: AgentId(1),
            status: ObservedStatus::Active
        }
    );
    let tool_start = OutboundMessage::AgentToolStart {
        id: AgentId(1),
        tool_id: "t1".into(),
        status: "Running: npm run test".into(),
    };
    assert_eq!(recv(&mut first_rx).await, tool_start);

    // A late observer sees the open tool without replaying history.
    let (_second, _second_rx, snapshot) = observe(&bridge.observer_url).await;
    assert_eq!(
        snapshot,
        vec![
            OutboundMessage::LayoutLoaded { layout: None },
            OutboundMessage::ExistingAgents {
                agents: vec![AgentId(1)],
                meta: vec![AgentMeta {
                    id: AgentId(1),
                    session_key: "main".into(),
                    status: AgentStatus::Busy,
                }]
            },
            OutboundMessage::AgentStatus {
                id: AgentId(1),
                status: ObservedStatus::Active
            },
            tool_start,
            OutboundMessage::ConnectionStatus {
                status: ConnectionState::Connected
            },
        ]
    );

    // Both observers get the same delta.
    gw.emit_agent("main", "lifecycle", json!({"phase": "end"}));
    let waiting = |m: &OutboundMessage| {
        matches!(m, OutboundMessage::AgentStatus { status: ObservedStatus::Waiting, .. })
    };
    recv_until(&mut first_rx, waiting).await;
}

#[tokio::test]
async fn test_session_ids_and_run_end() {
    let gw = FakeGateway::start().await;
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;
    let (_conn, mut rx, _) = observe(&bridge.observer_url).await;

    gw.emit_agent("x", "lifecycle", json!({"phase": "start"}));
    gw.emit_agent("y", "lifecycle", json!({"phase": "start"}));
    let created = |m: &OutboundMessage| matches!(m, OutboundMessage::AgentCreated { .. });
    assert_eq!(
        recv_until(&mut rx, created).await,
        OutboundMessage::AgentCreated {
            id: AgentId(1),
            session_key: "x".into()
        }
    );
    assert_eq!(
        recv_until(&mut rx, created).await,
        OutboundMessage::AgentCreated {
            id: AgentId(2),
            session_key: "y".into()
        }
    );
    recv(&mut rx).await;

    gw.emit_agent("x", "lifecycle", json!({"phase": "end"}));
    assert_eq!(recv(&mut rx).await, OutboundMessage::AgentToolsClear { id: AgentId(1) });
    assert_eq!(
        recv(&mut rx).await,
        OutboundMessage::AgentStatus {
            id: AgentId(1),
            status: ObservedStatus::Waiting
        }
    );

    // A returning session keeps its id.
    gw.emit_agent("x", "lifecycle", json!({"phase": "start"}));
    assert_eq!(
        recv(&mut rx).await,
        OutboundMessage::AgentStatus {
            id: AgentId(1),
            status: ObservedStatus::Active
        }
    );
}

#[tokio::test]
async fn test_approval_round_trip() {
    let gw = FakeGateway::start().await;
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;
    let (conn, mut rx, _) = observe(&bridge.observer_url).await;

    start_main_with_tool(&gw, &mut rx, "rm -rf build").await;
    request_approval(&gw, "ap-1");
    assert_eq!(
        recv(&mut rx).await,
        OutboundMessage::AgentToolPermission {
            id: AgentId(1),
            approval_id: Some("ap-1".into()),
            command: Some("rm -rf build".into()),
        }
    );

    conn.send(ObserverRequest::ResolveApproval {
        id: "ap-1".into(),
        approved: true,
    });
    let resolve = gw.next_request(METHOD_APPROVAL_RESOLVE).await;
    assert_eq!(resolve.params.unwrap(), json!({"id": "ap-1", "decision": "allow-once"}));
    assert_eq!(
        recv(&mut rx).await,
        OutboundMessage::AgentToolPermissionClear { id: AgentId(1) }
    );
}

#[tokio::test]
async fn test_denied_approval() {
    let gw = FakeGateway::start().await;
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;
    let (conn, mut rx, _) = observe(&bridge.observer_url).await;

    start_main_with_tool(&gw, &mut rx, "rm -rf build").await;
    request_approval(&gw, "ap-2");
    recv_until(&mut rx, |m| matches!(m, OutboundMessage::AgentToolPermission { .. })).await;

    conn.send(ObserverRequest::ResolveApproval {
        id: "ap-2".into(),
        approved: false,
    });
    let resolve = gw.next_request(METHOD_APPROVAL_RESOLVE).await;
    assert_eq!(resolve.params.unwrap()["decision"], "deny");
    assert_eq!(
        recv(&mut rx).await,
        OutboundMessage::AgentToolPermissionDenied { id: AgentId(1) }
    );
}

#[tokio::test]
async fn test_failed_resolve_keeps_approval_pending() {
    let gw = FakeGateway::start().await;
    gw.fail_method(METHOD_APPROVAL_RESOLVE);
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;
    let (conn, mut rx, _) = observe(&bridge.observer_url).await;

    start_main_with_tool(&gw, &mut rx, "rm -rf build").await;
    request_approval(&gw, "ap-3");
    recv_until(&mut rx, |m| matches!(m, OutboundMessage::AgentToolPermission { .. })).await;

    conn.send(ObserverRequest::ResolveApproval {
        id: "ap-3".into(),
        approved: true,
    });
    gw.next_request(METHOD_APPROVAL_RESOLVE).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    while let Ok(message) = rx.try_recv() {
        assert!(
            !matches!(message, OutboundMessage::AgentToolPermissionClear { .. }),
            "approval cleared after a rejected resolve"
        );
    }

    let (_late, _late_rx, snapshot) = observe(&bridge.observer_url).await;
    assert!(snapshot.contains(&OutboundMessage::AgentToolPermission {
        id: AgentId(1),
        approval_id: Some("ap-3".into()),
        command: Some("rm -rf build".into()),
    }));
}

#[tokio::test]
async fn test_observers_follow_gateway_reconnect() {
    let gw = FakeGateway::start().await;
    let bridge = RunningBridge::start(gw.config(), None).await;
    bridge.wait_for_state(ConnectionState::Connected).await;
    let (_conn, mut rx, _) = observe(&bridge.observer_url).await;

    gw.drop_connections();
    recv_until(&mut rx, |m| {
        *m == OutboundMessage::ConnectionStatus {
            status: ConnectionState::Disconnected,
        }
    })
    .await;
    recv_until(&mut rx, |m| {
        *m == OutboundMessage::ConnectionStatus {
            status: ConnectionState::Connected,
        }
    })
    .await;
    assert_eq!(gw.handshakes(), 2);
}

#[tokio::test]
async fn test_rejected_handshake_reports_error() {
    let gw = FakeGateway::start_with_token(Some("the-real-token")).await;
    let bridge = RunningBridge::start(gw.config(), None).await;

    bridge.wait_for_state(ConnectionState::Error).await;
    assert_eq!(gw.handshakes(), 0);
    assert!(!bridge.gateway.is_connected());
}

#[tokio::test]
async fn test_offline_requests_flush_after_ready() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileLayoutStore::new(dir.path().join("layout.json")));
    let gw = FakeGateway::start().await;

    // Bound but not yet serving: the observer's handshake stalls until the bridge starts.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (conn, mut rx) = ObserverConnection::new(ObserverConnectionConfig::new(url));
    conn.connect();
    conn.send(ObserverRequest::SaveLayout {
        layout: json!({"cols": 12, "rows": 8}),
    });
    assert_eq!(conn.buffered(), 1);

    let layouts: Arc<dyn LayoutStore> = store.clone();
    let bridge = RunningBridge::start_on(listener, gw.config(), Some(layouts)).await;

    // The ready goes out first, so the snapshot predates the save.
    assert_eq!(recv(&mut rx).await, OutboundMessage::LayoutLoaded { layout: None });

    let saved = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(Some(layout)) = store.load_layout().await {
                return layout;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("layout never saved");
    assert_eq!(saved, json!({"cols": 12, "rows": 8}));
    assert_eq!(conn.buffered(), 0);

    let (_late, _late_rx, snapshot) = observe(&bridge.observer_url).await;
    assert_eq!(
        snapshot[0],
        OutboundMessage::LayoutLoaded {
            layout: Some(json!({"cols": 12, "rows": 8}))
        }
    );
}
