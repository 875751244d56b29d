use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use authkeep::{
    use_worker_auth_state, KeyRecordStore, SignalDataCategory, SignalDataPatch, StoreError,
    StoredValue, WorkerConfig, WorkerStore,
};

type Records = Arc<Mutex<HashMap<String, String>>>;
type Handler = fn(&str, &Records) -> Value;

/// Worker-side protocol over one shared record map.
fn serve(text: &str, records: &Records) -> Value {
    let request: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return json!({"status": "error", "message": e.to_string()}),
    };
    let op = request["type"].as_str().unwrap_or_default();
    let key = request["values"]["session"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if key.is_empty() {
        return json!({"status": "error", "message": "session is required"});
    }

    let mut map = records.lock().unwrap();
    match op {
        "readData" => json!({"status": "ok", "result": map.get(&key)}),
        "writeData" => match request["values"]["value"].as_str() {
            Some(value) => {
                map.insert(key, value.to_string());
                json!({"status": "ok"})
            }
            None => json!({"status": "error", "message": "value is required"}),
        },
        "removeData" => {
            map.remove(&key);
            json!({"status": "ok"})
        }
        "clearAll" => {
            let prefix = key.trim_end_matches('*').to_string();
            map.retain(|k, _| !k.starts_with(&prefix) || k.ends_with(":creds"));
            json!({"status": "ok"})
        }
        "removeAll" => {
            let prefix = key.trim_end_matches('*').to_string();
            map.retain(|k, _| !k.starts_with(&prefix));
            json!({"status": "ok"})
        }
        other => json!({"status": "error", "message": format!("unknown request type: {other}")}),
    }
}

fn reject(_text: &str, _records: &Records) -> Value {
    json!({"status": "error", "message": "denied"})
}

async fn spawn_worker(handler: Handler) -> (u16, Records) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let records: Records = Arc::new(Mutex::new(HashMap::new()));
    let shared = records.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let records = shared.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    let Message::Text(text) = message else { continue };
                    let reply = handler(&text, &records);
                    if socket.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, records)
}

/// Drops the first connection after swallowing one request, then behaves.
async fn spawn_flaky_worker() -> (u16, Records) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let records: Records = Arc::new(Mutex::new(HashMap::new()));
    let shared = records.clone();
    let dropped_once = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let records = shared.clone();
            let dropped_once = dropped_once.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = accept_async(stream).await else {
                    return;
                };
                if !dropped_once.swap(true, Ordering::SeqCst) {
                    let _ = socket.next().await;
                    return;
                }
                while let Some(Ok(message)) = socket.next().await {
                    let Message::Text(text) = message else { continue };
                    let reply = serve(&text, &records);
                    if socket.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, records)
}

fn config(port: u16) -> WorkerConfig {
    WorkerConfig {
        port,
        session: "s1".to_string(),
        retry_delay_ms: 10,
        max_retries: 3,
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn round_trips_records_through_the_channel() {
    let (port, records) = spawn_worker(serve).await;
    let store = WorkerStore::connect(&config(port)).unwrap();

    store
        .write("pre-key-1", &StoredValue::from(vec![1u8, 2, 3]))
        .await
        .unwrap();
    assert!(records
        .lock()
        .unwrap()
        .contains_key("session:s1:pre-key-1"));

    let value = store.read("pre-key-1").await.unwrap();
    assert_eq!(value, Some(StoredValue::Bytes(vec![1, 2, 3])));
    assert!(store.read("missing").await.unwrap().is_none());

    store.remove("pre-key-1").await.unwrap();
    assert!(store.read("pre-key-1").await.unwrap().is_none());
}

#[tokio::test]
async fn bulk_deletes_respect_the_creds_record() {
    let (port, records) = spawn_worker(serve).await;
    let store = WorkerStore::connect(&config(port)).unwrap();

    store
        .write("creds", &StoredValue::from("credentials"))
        .await
        .unwrap();
    store
        .write("pre-key-1", &StoredValue::from(vec![1u8]))
        .await
        .unwrap();
    store
        .write("session-x", &StoredValue::from(vec![2u8]))
        .await
        .unwrap();

    store.clear_all().await.unwrap();
    {
        let map = records.lock().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("session:s1:creds"));
    }

    store.remove_all().await.unwrap();
    assert!(records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn facade_round_trips_over_the_worker() {
    let (port, _records) = spawn_worker(serve).await;

    let state = use_worker_auth_state(&config(port)).await.unwrap();
    state.save_creds().await.unwrap();
    let patch = SignalDataPatch::new().set(SignalDataCategory::PreKey, "1", vec![4u8, 5]);
    state.keys.set(&patch).await.unwrap();

    let reloaded = use_worker_auth_state(&config(port)).await.unwrap();
    assert_eq!(reloaded.creds, state.creds);
    let got = reloaded
        .keys
        .get(SignalDataCategory::PreKey, &["1"])
        .await
        .unwrap();
    assert_eq!(got["1"], Some(StoredValue::Bytes(vec![4, 5])));
}

#[tokio::test]
async fn rejections_exhaust_the_retry_budget() {
    let (port, _records) = spawn_worker(reject).await;
    let store = WorkerStore::connect(&config(port)).unwrap();

    let err = store.read("creds").await.unwrap_err();
    match err {
        StoreError::RetriesExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("denied"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn redials_after_the_channel_drops() {
    let (port, records) = spawn_flaky_worker().await;
    let store = WorkerStore::connect(&config(port)).unwrap();

    store
        .write("pre-key-1", &StoredValue::from(vec![1u8]))
        .await
        .unwrap();
    assert!(records
        .lock()
        .unwrap()
        .contains_key("session:s1:pre-key-1"));
}
