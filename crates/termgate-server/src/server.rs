//! TCP accept loop, live-session tracking, broadcast, and shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use termgate_command::{CommandRegistry, Dispatcher};
use termgate_core::{CredentialStore, Error, Result, ServerConfig, SessionId};

use crate::session::{Session, SessionInfo, SessionState, SharedSessionInfo};
use crate::terminal::Terminal;

const BROADCAST_CAPACITY: usize = 64;
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

struct SessionHandle {
    info: SharedSessionInfo,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type LiveSessions = Arc<Mutex<HashMap<SessionId, SessionHandle>>>;

/// The listening server. Owns the command registry, credential store and
/// the set of live sessions.
pub struct Server {
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    credentials: Arc<CredentialStore>,
    sessions: LiveSessions,
    broadcast_tx: broadcast::Sender<String>,
    /// Stops the accept loop
    accept_cancel: CancellationToken,
    /// Cancelled when a command handler asks for a server-wide shutdown
    shutdown_request: CancellationToken,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        registry: CommandRegistry,
        credentials: CredentialStore,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(registry), config.dispatch.clone());
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            config: Arc::new(config),
            dispatcher,
            credentials: Arc::new(credentials),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            broadcast_tx,
            accept_cancel: CancellationToken::new(),
            shutdown_request: CancellationToken::new(),
        }
    }

    /// Bind the configured address and spawn the accept loop. Returns the
    /// bound address (useful with port 0).
    pub async fn listen(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.config.server.bind_addr, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening");

        let config = Arc::clone(&self.config);
        let dispatcher = self.dispatcher.clone();
        let credentials = Arc::clone(&self.credentials);
        let sessions = Arc::clone(&self.sessions);
        let broadcast_tx = self.broadcast_tx.clone();
        let accept_cancel = self.accept_cancel.clone();
        let shutdown_request = self.shutdown_request.clone();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    res = listener.accept() => res,
                    () = accept_cancel.cancelled() => break,
                };
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };

                let max = config.server.max_connections;
                if max > 0 && sessions.lock().unwrap().len() >= max {
                    info!(%peer, "connection limit reached, rejecting");
                    tokio::spawn(reject(stream));
                    continue;
                }

                spawn_session(
                    stream,
                    peer,
                    Arc::clone(&config),
                    dispatcher.clone(),
                    Arc::clone(&credentials),
                    Arc::clone(&sessions),
                    broadcast_tx.clone(),
                    shutdown_request.clone(),
                );
            }
            debug!("accept loop stopped");
        });

        Ok(local_addr)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Snapshot of every live session's info record.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .map(|handle| handle.info.lock().unwrap().clone())
            .collect()
    }

    /// Cancel one session by id. Returns an error if it is not live.
    pub fn terminate_session(&self, id: SessionId) -> Result<()> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&id) {
            Some(handle) => {
                handle.cancel.cancel();
                Ok(())
            }
            None => Err(Error::SessionClosed),
        }
    }

    /// Queue a message for every authenticated session. Delivery is
    /// best-effort; sessions print it at their next prompt.
    pub fn broadcast(&self, message: impl Into<String>) {
        // send only errors when there are no receivers
        let _ = self.broadcast_tx.send(message.into());
    }

    /// Resolves when a command handler has requested shutdown.
    pub async fn shutdown_requested(&self) {
        self.shutdown_request.cancelled().await;
    }

    /// Stop accepting, cancel every session and wait up to `grace` for them
    /// to drain; stragglers are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        info!(sessions = self.session_count(), "shutting down");
        self.accept_cancel.cancel();
        {
            let sessions = self.sessions.lock().unwrap();
            for handle in sessions.values() {
                handle.cancel.cancel();
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while self.session_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        let stragglers: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &stragglers {
            warn!(id = %handle.info.lock().unwrap().id, "aborting straggler session");
            handle.task.abort();
        }
        info!("shutdown complete");
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    credentials: Arc<CredentialStore>,
    sessions: LiveSessions,
    broadcast_tx: broadcast::Sender<String>,
    shutdown_request: CancellationToken,
) {
    let id = SessionId::new();
    info!(%id, %peer, "connection accepted");

    let info: SharedSessionInfo = Arc::new(Mutex::new(SessionInfo {
        id,
        peer,
        principal: None,
        created_at: SystemTime::now(),
        state: SessionState::Connecting,
    }));
    let cancel = CancellationToken::new();

    let terminal = Terminal::new(stream, config.terminal.color);
    let session = Session::new(
        terminal,
        dispatcher,
        credentials,
        Arc::clone(&config),
        Arc::clone(&info),
        cancel.clone(),
        broadcast_tx,
        shutdown_request,
    );

    // the task must not remove itself before its handle is in the map
    let registered = Arc::new(tokio::sync::Notify::new());
    let wait_registered = Arc::clone(&registered);
    let sessions_for_task = Arc::clone(&sessions);
    let task = tokio::spawn(async move {
        wait_registered.notified().await;
        session.run().await;
        sessions_for_task.lock().unwrap().remove(&id);
    });

    sessions.lock().unwrap().insert(id, SessionHandle { info, cancel, task });
    registered.notify_one();
}

async fn reject(mut stream: TcpStream) {
    let _ = stream
        .write_all(b"Server is at capacity, try again later.\r\n")
        .await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use termgate_core::Principal;

    fn test_server() -> Server {
        Server::new(
            ServerConfig::default(),
            CommandRegistry::new(),
            CredentialStore::new(),
        )
    }

    #[tokio::test]
    async fn test_terminate_unknown_session_errors() {
        let server = test_server();
        assert!(server.terminate_session(SessionId::new()).is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_receivers_is_ok() {
        let server = test_server();
        server.broadcast("maintenance in 5 minutes");
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_session_snapshot_reflects_live_set() {
        let server = test_server();
        let id = SessionId::new();
        let info = Arc::new(Mutex::new(SessionInfo {
            id,
            peer: "127.0.0.1:9".parse().unwrap(),
            principal: Some(Principal::new("op")),
            created_at: SystemTime::now(),
            state: SessionState::AuthenticatedIdle,
        }));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async {});
        server
            .sessions
            .lock()
            .unwrap()
            .insert(id, SessionHandle { info, cancel, task });

        let listed = server.sessions();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].state, SessionState::AuthenticatedIdle);
        server.terminate_session(id).unwrap();
    }
}
