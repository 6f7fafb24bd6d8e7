use std::future::Future;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use cybertron_chat::{ChatError, ChatService, Settings};

type ServerStream = WebSocketStream<TcpStream>;

/// Accept one WebSocket connection on an ephemeral port and hand it to the
/// scenario script. Returns the ws:// URL for the client side.
async fn spawn_agent<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let ws = accept_async(stream).await.unwrap();
            script(ws).await;
        }
    });
    format!("ws://{}", addr)
}

/// Settings wired to the local agent. The segment endpoint points at a closed
/// port: segment creation fails fast and the client proceeds without one.
fn test_settings(ws_url: &str) -> Settings {
    let mut settings = Settings::default();
    settings.agent.ws_url = ws_url.to_string();
    settings.agent.base_url = "http://127.0.0.1:1".to_string();
    settings.agent.username = "tester".to_string();
    settings.agent.robot_key = "key".to_string();
    settings.agent.robot_token = "token".to_string();
    settings.chat.timeout_secs = 5;
    settings.chat.max_retries = 3;
    settings.chat.retry_secs = 0;
    settings
}

async fn read_request(ws: &mut ServerStream) -> Value {
    loop {
        match ws.next().await.expect("client hung up").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(payload) => ws.send(Message::Pong(payload)).await.unwrap(),
            _ => continue,
        }
    }
}

async fn send_frame(ws: &mut ServerStream, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn single_json_frame_exchange() {
    let url = spawn_agent(|mut ws| async move {
        let request = read_request(&mut ws).await;
        assert_eq!(request["question"], "Hola");
        assert_eq!(request["username"], "tester");
        assert!(request["segment_code"].is_null());
        send_frame(
            &mut ws,
            json!({"type": "json", "code": "000000", "data": {"answer": "Bienvenido"}}),
        )
        .await;
    })
    .await;

    let service = ChatService::new(&test_settings(&url));
    let result = service.chat_with_timing("Hola", None).await.unwrap();
    assert_eq!(result.answer, "Bienvenido");
    assert_eq!(result.attempt, 1);
    let first = result.first_token_latency.unwrap();
    let total = result.total_latency.unwrap();
    assert!(first <= total);
}

#[tokio::test]
async fn string_fragments_concatenate_in_order() {
    let url = spawn_agent(|mut ws| async move {
        let _ = read_request(&mut ws).await;
        // Control and non-success frames must not contribute.
        send_frame(&mut ws, json!({"index": -1, "type": "string", "code": "000000", "data": "sys"})).await;
        send_frame(&mut ws, json!({"index": 1, "type": "string", "code": "000000", "data": "Precio "})).await;
        send_frame(&mut ws, json!({"index": 2, "type": "string", "code": "999999", "data": "XXX"})).await;
        send_frame(&mut ws, json!({"index": 3, "type": "string", "code": "000000", "data": "$1142", "finish": "y"})).await;
    })
    .await;

    let service = ChatService::new(&test_settings(&url));
    let answer = service.chat("Cuanto cuesta?", None).await.unwrap();
    assert_eq!(answer, "Precio $1142");
}

#[tokio::test]
async fn flow_jump_takes_only_the_continuation_answer() {
    let url = spawn_agent(|mut ws| async move {
        let request = read_request(&mut ws).await;
        assert_eq!(request["question"], "Hola");
        send_frame(&mut ws, json!({"index": 1, "type": "string", "code": "000000", "data": "descartado"})).await;
        send_frame(
            &mut ws,
            json!({"type": "flow", "code": "000000", "data": {"final": true, "answer": "flow_jump_x"}}),
        )
        .await;

        // The continuation resend carries an empty question.
        let continuation = read_request(&mut ws).await;
        assert_eq!(continuation["question"], "");
        send_frame(
            &mut ws,
            json!({"index": 1, "type": "string", "code": "000000", "data": "Precio $1142", "finish": "y"}),
        )
        .await;
    })
    .await;

    let service = ChatService::new(&test_settings(&url));
    let result = service.chat_with_timing("Hola", None).await.unwrap();
    assert_eq!(result.answer, "Precio $1142");
}

#[tokio::test]
async fn flow_answers_append_until_node_finish() {
    let url = spawn_agent(|mut ws| async move {
        let _ = read_request(&mut ws).await;
        send_frame(
            &mut ws,
            json!({"type": "flow", "code": "000000", "data": {"final": true, "answer": "Hola "}}),
        )
        .await;
        send_frame(
            &mut ws,
            json!({"type": "flow", "code": "000000",
                   "data": {"final": true, "answer": "mundo", "node_answer_finish": "y"}}),
        )
        .await;
    })
    .await;

    let service = ChatService::new(&test_settings(&url));
    let answer = service.chat("Hola", None).await.unwrap();
    assert_eq!(answer, "Hola mundo");
}

#[tokio::test]
async fn empty_answer_is_a_valid_outcome() {
    let url = spawn_agent(|mut ws| async move {
        let _ = read_request(&mut ws).await;
        send_frame(
            &mut ws,
            json!({"index": 1, "type": "string", "code": "000000", "data": "", "finish": "y"}),
        )
        .await;
    })
    .await;

    let service = ChatService::new(&test_settings(&url));
    let result = service.chat_with_timing("Hola", None).await.unwrap();
    assert_eq!(result.answer, "");
    assert!(result.first_token_latency.is_none());
    assert!(result.total_latency.is_some());
}

#[tokio::test]
async fn connection_refused_exhausts_every_attempt() {
    let mut settings = test_settings("ws://127.0.0.1:1/chat");
    settings.chat.max_retries = 3;
    let service = ChatService::new(&settings);

    match service.chat_with_timing("Hola", None).await {
        Err(ChatError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {:?}", other),
    }

    // The legacy boundary folds the same failure into answer text.
    let result = service.chat_with_deadline("Hola", None).await;
    assert!(
        result.answer.starts_with("Request failed after 3 attempts:"),
        "unexpected answer: {}",
        result.answer
    );
    assert_eq!(result.attempt, 3);
    assert!(result.first_token_latency.is_none());
}

#[tokio::test]
async fn silent_agent_hits_the_deadline() {
    let url = spawn_agent(|mut ws| async move {
        let _ = read_request(&mut ws).await;
        // Never answer; hold the socket open past the client deadline.
        tokio::time::sleep(Duration::from_secs(30)).await;
    })
    .await;

    let mut settings = test_settings(&url);
    settings.chat.timeout_secs = 1;
    let service = ChatService::new(&settings);

    let started = Instant::now();
    let result = service.chat_with_deadline("Hola", None).await;
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(result.answer, "Request failed: Timeout after 1 seconds");
    assert_eq!(result.attempt, 1);
}

#[tokio::test]
async fn repeated_garbage_frames_fail_the_attempt() {
    let url = spawn_agent(|mut ws| async move {
        let _ = read_request(&mut ws).await;
        for _ in 0..5 {
            ws.send(Message::Text("not json".to_string())).await.unwrap();
        }
    })
    .await;

    let mut settings = test_settings(&url);
    settings.chat.max_retries = 1;
    let service = ChatService::new(&settings);

    match service.chat_with_timing("Hola", None).await {
        Err(ChatError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 1);
            assert!(last.contains("Protocol desync"), "last error: {}", last);
        }
        other => panic!("expected desync-driven failure, got {:?}", other),
    }
}

#[tokio::test]
async fn session_rotates_only_on_group_change() {
    let service = ChatService::new(&test_settings("ws://127.0.0.1:1/chat"));
    let segments = service.segments();

    let first = segments.context_for(Some("A")).await;
    let second = segments.context_for(Some("A")).await;
    assert_eq!(first.session_id, second.session_id);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let third = segments.context_for(Some("B")).await;
    assert_ne!(second.session_id, third.session_id);
}
