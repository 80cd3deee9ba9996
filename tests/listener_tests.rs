//! End-to-end tests over TCP with the builtin modules.

use apirate::config::{self, Config, ModuleConfig};
use apirate::error::ApirateError;
use apirate::modules::builtin_factories;
use apirate::process::{ExecutionProcess, ListenerService, RunningListeners};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.modules = vec![
        // Port 0 lets the OS pick a free port.
        ModuleConfig::named("line").with_option("port", json!(0)),
        ModuleConfig::named("command_parser"),
        ModuleConfig::named("guard").with_option("blocked", json!(["quit"])),
        ModuleConfig::named("echo"),
        ModuleConfig::named("renderer"),
        ModuleConfig::named("access_log"),
    ];
    config
}

async fn serve(config: &Config) -> (Arc<ExecutionProcess>, RunningListeners) {
    let mut process = ExecutionProcess::from_config(config, &builtin_factories()).unwrap();
    let report = process.start().unwrap();
    assert!(report.excluded.is_empty(), "{:?}", report.excluded);
    let process = Arc::new(process);

    let listeners = ListenerService::new(process.clone(), config.server.host.clone())
        .with_shutdown_grace(Duration::from_secs(1))
        .bind()
        .await
        .unwrap();
    (process, listeners)
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Session {
    async fn connect(listeners: &RunningListeners) -> Self {
        let addr = listeners.local_addr(0).expect("line listener bound");
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a response")
            .unwrap();
        line.trim_end().to_string()
    }
}

#[tokio::test]
async fn test_round_trip_over_tcp() {
    let (process, listeners) = serve(&test_config()).await;
    assert_eq!(listeners.len(), 1);

    let mut session = Session::connect(&listeners).await;
    session.send("echo hello world\nping\n\ncount\n").await;

    assert_eq!(session.line().await, "OK hello world");
    assert_eq!(session.line().await, "OK pong");
    // The blank line is dropped without an answer.
    assert_eq!(session.line().await, "OK 3");

    drop(session);
    listeners.shutdown().await;
    assert_eq!(process.active_connections(), 0);
}

#[tokio::test]
async fn test_blocked_command_gets_no_answer_and_connection_survives() {
    let (process, listeners) = serve(&test_config()).await;

    let mut session = Session::connect(&listeners).await;
    session.send("quit\nping\n").await;
    assert_eq!(session.line().await, "OK pong");
    assert_eq!(process.metrics().pipeline_abort_count("guard"), 1);

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_connections_get_independent_instances() {
    let (_process, listeners) = serve(&test_config()).await;

    let mut first = Session::connect(&listeners).await;
    first.send("ping\nping\ncount\n").await;
    first.line().await;
    first.line().await;
    assert_eq!(first.line().await, "OK 3");

    let mut second = Session::connect(&listeners).await;
    second.send("count\n").await;
    assert_eq!(second.line().await, "OK 1");

    listeners.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let (process, listeners) = serve(&test_config()).await;

    let mut session = Session::connect(&listeners).await;
    session.send("ping\n").await;
    assert_eq!(session.line().await, "OK pong");
    assert_eq!(process.active_connections(), 1);

    listeners.shutdown().await;
    assert_eq!(process.active_connections(), 0);
    assert!(process.is_stopping());

    // The server side is gone: reading yields EOF.
    let mut rest = String::new();
    let n = timeout(IO_TIMEOUT, session.reader.read_line(&mut rest))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_bind_requires_started_process() {
    let process = ExecutionProcess::from_config(&test_config(), &builtin_factories()).unwrap();
    let result = ListenerService::new(Arc::new(process), "127.0.0.1")
        .bind()
        .await;
    assert!(matches!(result, Err(ApirateError::NotStarted)));
}

#[tokio::test]
async fn test_json_output_from_toml_config() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[server]
host = "127.0.0.1"

[[modules]]
name = "line"
options = {{ port = 0 }}

[[modules]]
name = "command_parser"

[[modules]]
name = "echo"
options = {{ prefix = "> " }}

[[modules]]
name = "renderer"
options = {{ format = "json" }}
"#
    )
    .unwrap();

    let config = config::load_from_path(file.path()).await.unwrap();
    assert_eq!(config.modules.len(), 4);

    let (_process, listeners) = serve(&config).await;
    let mut session = Session::connect(&listeners).await;
    session.send("echo hi\n").await;

    let body: Value = serde_json::from_str(&session.line().await).unwrap();
    assert_eq!(body, json!({"status": "ok", "reply": "> hi", "seq": 1}));

    listeners.shutdown().await;
}
