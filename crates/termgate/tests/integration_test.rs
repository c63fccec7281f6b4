//! End-to-end tests over loopback TCP: real server, raw socket clients.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use termgate_command::{Command, CommandRegistry, Param, ParamType, Reply, Value};
use termgate_core::{CredentialStore, ServerConfig};
use termgate_server::Server;

const STEP: Duration = Duration::from_secs(5);

fn test_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry
        .register(
            Command::new("add", "add two integers")
                .param(Param::required("x", ParamType::Int))
                .param(Param::required("y", ParamType::Int))
                .param(Param::optional("verbose", ParamType::Bool))
                .handler(|inv| async move {
                    let x = inv.args.int("x");
                    let y = inv.args.int("y");
                    Ok(Reply::text(if inv.args.flag("verbose") {
                        format!("{x} + {y} = {}", x + y)
                    } else {
                        format!("{}", x + y)
                    }))
                }),
        )
        .unwrap();
    registry
        .register(
            Command::new("echo", "print the given words")
                .param(Param::required("words", ParamType::List(Box::new(ParamType::Str))))
                .handler(|inv| async move {
                    let words: Vec<&str> = inv
                        .args
                        .list("words")
                        .iter()
                        .filter_map(Value::as_str)
                        .collect();
                    Ok(Reply::text(words.join(" ")))
                }),
        )
        .unwrap();
    registry
        .register(Command::new("sleep", "sleep for ten seconds").handler(|_inv| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Reply::text("done"))
        }))
        .unwrap();
    registry
        .register(
            Command::new("stop", "request a server shutdown")
                .handler(|_inv| async { Ok(Reply::shutdown("Stopping.")) }),
        )
        .unwrap();
    registry
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.bind_addr = "127.0.0.1".to_string();
    config.server.port = 0;
    config.terminal.color = false;
    config.terminal.intro = String::new();
    config
}

async fn start_server(config: ServerConfig, credentials: CredentialStore) -> (Arc<Server>, String) {
    let server = Arc::new(Server::new(config, test_registry(), credentials));
    let addr = server.listen().await.unwrap();
    (server, addr.to_string())
}

/// Line-oriented client; reads are cut at prompt markers so each exchange
/// is deterministic.
struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Read until `marker` appears, returning everything before it.
    /// Bytes after the marker stay buffered for the next read.
    async fn read_until(&mut self, marker: &str) -> String {
        let needle = marker.as_bytes();
        timeout(STEP, async {
            loop {
                if let Some(pos) = self
                    .buf
                    .windows(needle.len())
                    .position(|window| window == needle)
                {
                    let out = String::from_utf8_lossy(&self.buf[..pos]).into_owned();
                    self.buf.drain(..pos + needle.len());
                    return out;
                }
                let mut chunk = [0u8; 256];
                let n = self.stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed while waiting for {marker:?}");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {marker:?}"))
    }

    /// Read until the peer closes the connection.
    async fn read_to_end(&mut self) -> String {
        timeout(STEP, async {
            let mut chunk = [0u8; 256];
            loop {
                match self.stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                }
            }
            String::from_utf8_lossy(&self.buf).into_owned()
        })
        .await
        .expect("timed out waiting for close")
    }

    /// Anonymous login followed by the first prompt.
    async fn login(&mut self, name: &str) {
        self.read_until("login: ").await;
        self.send(name).await;
        self.read_until("# ").await;
    }

    /// One command round-trip; returns the output before the next prompt.
    async fn exec(&mut self, line: &str) -> String {
        self.send(line).await;
        let out = self.read_until("# ").await;
        out.trim_end_matches(['\r', '\n']).trim_start_matches(['\r', '\n']).to_string()
    }
}

#[tokio::test]
async fn test_dispatch_over_the_wire() {
    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;
    client.login("alice").await;

    assert_eq!(client.exec("add 2 3").await, "5");
    assert_eq!(client.exec("add --y 3 2").await, "5");
    assert_eq!(client.exec("add 2 3 --verbose").await, "2 + 3 = 5");

    let err = client.exec("add 2 three").await;
    assert!(err.contains("invalid value"), "{err}");
    assert!(err.contains("'y'"), "{err}");
    assert!(err.contains("integer"), "{err}");

    let err = client.exec("add 2").await;
    assert!(err.contains("missing required parameter 'y'"), "{err}");

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unknown_command_gets_suggestion() {
    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;
    client.login("alice").await;

    let err = client.exec("ad 2 3").await;
    assert!(err.contains("unknown command: ad"), "{err}");
    assert!(err.contains("Did you mean 'add'?"), "{err}");

    let err = client.exec("zzzzzz").await;
    assert!(err.contains("unknown command"), "{err}");
    assert!(!err.contains("Did you mean"), "{err}");

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_quoting_over_the_wire() {
    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;
    client.login("alice").await;

    assert_eq!(client.exec("echo \"hello world\" two").await, "hello world two");
    assert_eq!(client.exec("echo 'a b' c\\ d").await, "a b c d");

    let err = client.exec("echo \"unterminated").await;
    assert!(err.contains("syntax error at offset 5"), "{err}");

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_exit_closes_only_that_session() {
    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;
    let mut first = Client::connect(&addr).await;
    let mut second = Client::connect(&addr).await;
    first.login("alice").await;
    second.login("bob").await;

    first.send("exit").await;
    let farewell = first.read_to_end().await;
    assert!(farewell.contains("Closing connection."), "{farewell}");

    assert_eq!(second.exec("add 1 1").await, "2");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.session_count(), 1);

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_concurrent_sessions_see_ordered_results() {
    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;

    let run = |name: &'static str, base: i64| {
        let addr = addr.clone();
        async move {
            let mut client = Client::connect(&addr).await;
            client.login(name).await;
            for i in 0..10 {
                let out = client.exec(&format!("add {} {i}", base)).await;
                assert_eq!(out, (base + i).to_string(), "session {name}, step {i}");
            }
        }
    };
    tokio::join!(run("alice", 100), run("bob", 2000));

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_auth_attempt_limit_is_absolute() {
    let mut config = test_config();
    config.auth.allow_anonymous = false;
    config.auth.max_attempts = 3;
    let mut credentials = CredentialStore::new();
    credentials.add_user("alice").unwrap();
    credentials.set_password("alice", "secret").unwrap();

    let (server, addr) = start_server(config, credentials).await;
    let mut client = Client::connect(&addr).await;

    for _ in 0..2 {
        client.read_until("login: ").await;
        client.send("alice").await;
        client.read_until("password: ").await;
        client.send("wrong").await;
        client.read_until("Access denied.").await;
    }
    client.read_until("login: ").await;
    client.send("alice").await;
    client.read_until("password: ").await;
    client.send("wrong").await;

    // the correct password would be accepted now, but the limit is spent
    let tail = client.read_to_end().await;
    assert!(tail.contains("Too many failed attempts"), "{tail}");
    assert!(!tail.contains("# "), "{tail}");

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_password_auth_succeeds_after_one_failure() {
    let mut config = test_config();
    config.auth.allow_anonymous = false;
    let mut credentials = CredentialStore::new();
    credentials.add_user("alice").unwrap();
    credentials.set_password("alice", "secret").unwrap();

    let (server, addr) = start_server(config, credentials).await;
    let mut client = Client::connect(&addr).await;

    client.read_until("login: ").await;
    client.send("alice").await;
    client.read_until("password: ").await;
    client.send("wrong").await;
    client.read_until("Access denied.").await;

    client.read_until("login: ").await;
    client.send("alice").await;
    client.read_until("password: ").await;
    client.send("secret").await;
    client.read_until("# ").await;

    assert_eq!(client.exec("add 20 22").await, "42");

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_idle_timeout_closes_session() {
    let mut config = test_config();
    config.server.idle_timeout_secs = 1;
    let (server, addr) = start_server(config, CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;
    client.login("alice").await;

    // no input: the idle deadline must end the session on its own
    let tail = client.read_to_end().await;
    assert!(tail.contains("Idle timeout"), "{tail}");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.session_count(), 0);

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_auth_timeout_closes_connection() {
    let mut config = test_config();
    config.server.auth_timeout_secs = 1;
    let (server, addr) = start_server(config, CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;

    client.read_until("login: ").await;
    // never answer the login prompt
    let tail = client.read_to_end().await;
    assert!(tail.contains("timed out"), "{tail}");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.session_count(), 0);

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_broadcast_reaches_other_sessions() {
    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;
    let mut first = Client::connect(&addr).await;
    let mut second = Client::connect(&addr).await;
    first.login("alice").await;
    second.login("bob").await;

    server.broadcast("maintenance at noon");

    let out = first.exec("add 1 1").await;
    assert!(out.contains('2'), "{out}");
    assert!(out.contains("maintenance at noon"), "{out}");
    let out = second.exec("add 3 4").await;
    assert!(out.contains("maintenance at noon"), "{out}");

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_shutdown_command_requests_server_stop() {
    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;
    client.login("alice").await;

    client.send("stop").await;
    timeout(STEP, server.shutdown_requested())
        .await
        .expect("shutdown was not requested");
    let farewell = client.read_to_end().await;
    assert!(farewell.contains("Stopping."), "{farewell}");

    server.shutdown(Duration::from_secs(1)).await;
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_shutdown_grace_cancels_sleeping_handler() {
    let mut config = test_config();
    config.server.handler_grace_secs = 1;
    let (server, addr) = start_server(config, CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;
    client.login("alice").await;

    client.send("sleep").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.session_count(), 1);

    let started = std::time::Instant::now();
    server.shutdown(Duration::from_secs(3)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.session_count(), 0);

    // further connections are refused
    assert!(timeout(Duration::from_millis(500), async {
        let mut probe = TcpStream::connect(&addr).await.ok()?;
        let mut byte = [0u8; 1];
        match probe.read(&mut byte).await {
            Ok(0) => None,
            Ok(_) => Some(()),
            Err(_) => None,
        }
    })
    .await
    .map(|r| r.is_none())
    .unwrap_or(true));
}

#[tokio::test]
async fn test_connection_limit_rejects_excess_clients() {
    let mut config = test_config();
    config.server.max_connections = 1;
    let (server, addr) = start_server(config, CredentialStore::new()).await;

    let mut first = Client::connect(&addr).await;
    first.login("alice").await;

    let mut second = Client::connect(&addr).await;
    let notice = second.read_to_end().await;
    assert!(notice.contains("at capacity"), "{notice}");

    assert_eq!(first.exec("add 1 1").await, "2");
    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_duplicate_registration_leaves_original_intact() {
    let mut registry = test_registry();
    let err = registry.register(Command::new("add", "replacement").handler(|_inv| async {
        Ok(Reply::text("hijacked"))
    }));
    assert!(err.is_err());

    let (server, addr) = start_server(test_config(), CredentialStore::new()).await;
    let mut client = Client::connect(&addr).await;
    client.login("alice").await;
    assert_eq!(client.exec("add 2 3").await, "5");
    server.shutdown(Duration::from_secs(1)).await;
}
