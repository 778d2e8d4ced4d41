//! Integration tests for the hostbridge-rpc binary.
//!
//! These tests start the compiled host, check the HTTP status surface and
//! drive the sample assembly over the bridge transport.

use hostbridge::ipc::DriverClient;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

struct HostProcess {
    child: tokio::process::Child,
    bridge_port: u16,
    http_port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl HostProcess {
    fn bridge_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.bridge_port))
    }

    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

fn binary_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_hostbridge-rpc") {
        return Ok(PathBuf::from(path));
    }
    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("hostbridge-rpc");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_hostbridge-rpc not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

fn parse_port(line: &str, prefix: &str) -> Result<Option<u16>, String> {
    match line.strip_prefix(prefix) {
        Some(value) => value
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|e| format!("invalid {prefix} value '{value}': {e}")),
        None => Ok(None),
    }
}

/// Start the host binary and wait until both ports are announced.
async fn start_host() -> Result<HostProcess, String> {
    let mut child = tokio::process::Command::new(binary_path()?)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--http-port")
        .arg("0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn hostbridge-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut bridge_port = None;
    let mut http_port = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline && (bridge_port.is_none() || http_port.is_none()) {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(port) = parse_port(&line, "BRIDGE_PORT=")? {
                    bridge_port = Some(port);
                }
                if let Some(port) = parse_port(&line, "HTTP_PORT=")? {
                    http_port = Some(port);
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read hostbridge-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let bridge_port = bridge_port.ok_or_else(|| "BRIDGE_PORT line not emitted".to_string())?;
    let http_port = http_port.ok_or_else(|| "HTTP_PORT line not emitted".to_string())?;

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(HostProcess {
        child,
        bridge_port,
        http_port,
        stdout_drain: Some(stdout_drain),
    })
}

async fn get_json(port: u16, path: &str) -> Result<Value, String> {
    reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}{}", port, path))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| e.to_string())?
        .json::<Value>()
        .await
        .map_err(|e| e.to_string())
}

#[tokio::test]
async fn test_health_and_capabilities_routes() {
    let host = start_host().await.expect("host should start");

    let health = get_json(host.http_port, "/health").await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["bridgePort"], json!(host.bridge_port));

    let capabilities = get_json(host.http_port, "/capabilities").await.unwrap();
    let ids: Vec<String> = serde_json::from_value(capabilities["capabilities"].clone()).unwrap();
    assert!(ids.contains(&"sample/add".to_string()));
    assert!(ids.contains(&"hostbridge/List.get".to_string()));
    assert_eq!(capabilities["count"], json!(ids.len()));

    host.stop().await;
}

#[tokio::test]
async fn test_bridge_round_trip() {
    let host = start_host().await.expect("host should start");
    let client = DriverClient::connect(host.bridge_addr()).await.unwrap();

    let sum = client
        .invoke_capability("sample/add", json!({"a": 40, "b": 2}))
        .await
        .unwrap();
    assert_eq!(sum, json!(42));

    let counter = client
        .create_object("sample", "Counter", json!({"start": 5}))
        .await
        .unwrap();
    let id = counter["$handle"].as_str().unwrap().to_string();
    let bumped = client
        .invoke_capability("sample/Counter.increment", json!({"context": counter, "by": 3}))
        .await
        .unwrap();
    assert_eq!(bumped, json!(8));
    assert_eq!(client.get_property(&id, "value").await.unwrap(), json!(8));

    client.close();
    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callbacks_reach_the_driver() {
    let host = start_host().await.expect("host should start");
    let client = DriverClient::connect(host.bridge_addr()).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.register_callback("collect", move |args: Value| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(args["p0"].clone());
            Ok(Value::Null)
        }
    });

    let count = client
        .invoke_capability("sample/forEach", json!({"items": [3, 1, 2], "onItem": "collect"}))
        .await
        .unwrap();
    assert_eq!(count, json!(3));
    assert_eq!(*seen.lock().unwrap(), vec![json!(3), json!(1), json!(2)]);

    client.close();
    host.stop().await;
}
