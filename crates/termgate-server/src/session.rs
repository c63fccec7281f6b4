//! Per-connection session: authentication phase and the read-eval loop.
//!
//! One session owns its terminal and runs as one independent task; command
//! execution within a session is strictly sequential. A handler failure is
//! reported and the loop continues — only protocol-level errors, timeouts,
//! explicit `exit`, or cancellation by the server end a session.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use termgate_command::{Action, CallContext, Dispatcher, Reply};
use termgate_core::{CredentialStore, Error, Principal, Proof, Result, ServerConfig, SessionId};

use crate::terminal::{SessionStream, Terminal};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    AuthenticatedIdle,
    ReadingLine,
    Dispatching,
    /// Authentication attempt limit exhausted; terminal state
    Rejected,
    Closing,
    /// Resources released; terminal state
    Closed,
}

/// Introspection record for one session, shared with the server's live
/// set.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    /// None until authentication completes
    pub principal: Option<Principal>,
    pub created_at: SystemTime,
    pub state: SessionState,
}

/// Shared handle to a session's info record.
pub type SharedSessionInfo = Arc<Mutex<SessionInfo>>;

/// One authenticated interactive connection and its read-eval loop.
pub struct Session<S> {
    terminal: Terminal<S>,
    dispatcher: Dispatcher,
    credentials: Arc<CredentialStore>,
    config: Arc<ServerConfig>,
    info: SharedSessionInfo,
    cancel: CancellationToken,
    /// Handle used to subscribe to broadcasts once authenticated
    broadcast_tx: broadcast::Sender<String>,
    /// Cancelled by a handler requesting a server-wide shutdown
    shutdown_request: CancellationToken,
}

impl<S: SessionStream> Session<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        terminal: Terminal<S>,
        dispatcher: Dispatcher,
        credentials: Arc<CredentialStore>,
        config: Arc<ServerConfig>,
        info: SharedSessionInfo,
        cancel: CancellationToken,
        broadcast_tx: broadcast::Sender<String>,
        shutdown_request: CancellationToken,
    ) -> Self {
        Self {
            terminal,
            dispatcher,
            credentials,
            config,
            info,
            cancel,
            broadcast_tx,
            shutdown_request,
        }
    }

    fn id(&self) -> SessionId {
        self.info.lock().unwrap().id
    }

    fn set_state(&self, state: SessionState) {
        let mut info = self.info.lock().unwrap();
        debug!(id = %info.id, ?state, "session state");
        info.state = state;
    }

    /// Drive the session to completion. Consumes the session; the caller
    /// removes the live-set entry when this returns.
    pub async fn run(mut self) {
        let id = self.id();
        self.set_state(SessionState::Authenticating);

        let principal = {
            let deadline = self.config.server.auth_timeout();
            let cancel = self.cancel.clone();
            let auth = async {
                match timeout(deadline, self.authenticate()).await {
                    Ok(res) => res,
                    Err(_) => Err(Error::Timeout("authentication")),
                }
            };
            tokio::pin!(auth);
            tokio::select! {
                res = &mut auth => res,
                () = cancel.cancelled() => Err(Error::SessionClosed),
            }
        };

        let principal = match principal {
            Ok(principal) => principal,
            Err(Error::TooManyAttempts) => {
                // credential exhaustion is the only path into REJECTED
                warn!(%id, "session rejected");
                self.set_state(SessionState::Rejected);
                let _ = self
                    .terminal
                    .write_line("<error>Too many failed attempts. Goodbye.</error>")
                    .await;
                let _ = self.terminal.close().await;
                return;
            }
            Err(err) => {
                warn!(%id, %err, "authentication phase aborted");
                self.set_state(SessionState::Closing);
                if matches!(err, Error::Timeout(_)) {
                    let _ = self
                        .terminal
                        .write_line("<error>Authentication timed out. Goodbye.</error>")
                        .await;
                }
                let _ = self.terminal.close().await;
                self.set_state(SessionState::Closed);
                return;
            }
        };

        info!(%id, %principal, "session authenticated");
        {
            let mut info = self.info.lock().unwrap();
            info.principal = Some(principal.clone());
            info.state = SessionState::AuthenticatedIdle;
        }
        // subscribing here rather than at accept keeps broadcasts scoped
        // to authenticated sessions
        let mut broadcasts = self.broadcast_tx.subscribe();

        let intro = self.config.terminal.intro.clone();
        if !intro.is_empty() {
            if self.terminal.write_line(&intro).await.is_err() {
                self.finish().await;
                return;
            }
        }

        loop {
            drain_broadcasts(&mut broadcasts, &mut self.terminal).await;

            let prompt = self.config.terminal.prompt.clone();
            if self.terminal.write(&prompt).await.is_err() {
                break;
            }

            self.set_state(SessionState::ReadingLine);
            let line = {
                let cancel = self.cancel.clone();
                let idle = self.config.server.idle_timeout();
                let terminal = &mut self.terminal;
                let read = async {
                    match idle {
                        Some(deadline) => match timeout(deadline, terminal.read_line()).await {
                            Ok(res) => res,
                            Err(_) => Err(Error::Timeout("input")),
                        },
                        None => terminal.read_line().await,
                    }
                };
                tokio::pin!(read);
                tokio::select! {
                    res = &mut read => res,
                    () = cancel.cancelled() => Err(Error::SessionClosed),
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(%id, "peer closed connection");
                    break;
                }
                Err(Error::Timeout(_)) => {
                    let _ = self
                        .terminal
                        .write_line("<warn>Idle timeout, closing connection.</warn>")
                        .await;
                    break;
                }
                Err(err) => {
                    if !matches!(err, Error::SessionClosed) {
                        warn!(%id, %err, "read failed");
                    }
                    break;
                }
            };

            self.set_state(SessionState::Dispatching);
            let context = CallContext {
                session: id,
                principal: principal.clone(),
            };
            let outcome = self.dispatch_with_grace(&line, context).await;
            self.set_state(SessionState::AuthenticatedIdle);

            match outcome {
                DispatchOutcome::Completed(Ok(None)) => {}
                DispatchOutcome::Completed(Ok(Some(reply))) => {
                    if !self.deliver(reply).await {
                        break;
                    }
                }
                DispatchOutcome::Completed(Err(err)) if err.is_recoverable() => {
                    let message = self.dispatcher.render_error(&err);
                    if self.terminal.write_line(&message).await.is_err() {
                        break;
                    }
                }
                DispatchOutcome::Completed(Err(err)) => {
                    warn!(%id, %err, "fatal dispatch error");
                    break;
                }
                DispatchOutcome::ForceCancelled => {
                    info!(%id, "in-flight handler force-cancelled");
                    break;
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }

        self.finish().await;
    }

    /// Write a reply and apply its follow-up action. Returns false when
    /// the loop should stop.
    async fn deliver(&mut self, reply: Reply) -> bool {
        if !reply.text.is_empty() && self.terminal.write_line(&reply.text).await.is_err() {
            return false;
        }
        match reply.action {
            Action::Continue => true,
            Action::CloseSession => false,
            Action::ShutdownServer => {
                info!(id = %self.id(), "handler requested server shutdown");
                self.shutdown_request.cancel();
                false
            }
        }
    }

    async fn finish(mut self) {
        self.set_state(SessionState::Closing);
        let _ = self.terminal.close().await;
        self.set_state(SessionState::Closed);
        info!(id = %self.id(), "session closed");
    }

    /// Run the dispatcher, giving an in-flight handler a grace period to
    /// finish if the session is cancelled mid-command; after the grace
    /// deadline the handler future is dropped. Handlers are expected to be
    /// cancellation-safe — atomic rollback is a handler-author contract,
    /// not something the engine provides.
    async fn dispatch_with_grace(&mut self, line: &str, context: CallContext) -> DispatchOutcome {
        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        let grace = self.config.server.handler_grace();

        let fut = dispatcher.dispatch(line, context);
        tokio::pin!(fut);
        tokio::select! {
            res = &mut fut => DispatchOutcome::Completed(res),
            () = cancel.cancelled() => {
                match timeout(grace, &mut fut).await {
                    Ok(res) => DispatchOutcome::Completed(res),
                    Err(_) => DispatchOutcome::ForceCancelled,
                }
            }
        }
    }

    /// The authentication exchange: up to `max_attempts` login/password
    /// rounds against the credential store. With anonymous access enabled
    /// only a login name is read and any name is accepted.
    ///
    /// The attempt limit is absolute: once it is exhausted the connection
    /// is rejected without evaluating further proofs.
    async fn authenticate(&mut self) -> Result<Principal> {
        if self.config.auth.allow_anonymous {
            self.terminal.write("login: ").await?;
            let name = match self.terminal.read_line().await? {
                Some(name) => name,
                None => return Err(Error::SessionClosed),
            };
            let name = name.trim();
            return Ok(if name.is_empty() {
                Principal::anonymous()
            } else {
                Principal::new(name)
            });
        }

        let max_attempts = self.config.auth.max_attempts;
        for attempt in 1..=max_attempts {
            self.terminal.write("login: ").await?;
            let Some(username) = self.terminal.read_line().await? else {
                return Err(Error::SessionClosed);
            };
            self.terminal.write("password: ").await?;
            self.terminal.set_echo(false);
            let password = self.terminal.read_line().await;
            self.terminal.set_echo(true);
            let Some(password) = password? else {
                return Err(Error::SessionClosed);
            };

            match verify_password(&self.credentials, username.trim(), password) {
                Ok(principal) => return Ok(principal),
                Err(err) => {
                    warn!(id = %self.id(), attempt, max_attempts, %err, "authentication failed");
                    if attempt < max_attempts {
                        self.terminal
                            .write_line("<error>Access denied.</error>")
                            .await?;
                    }
                }
            }
        }
        Err(Error::TooManyAttempts)
    }
}

/// Check one password proof against the store, mapping a rejection to the
/// recoverable [`Error::Authentication`].
fn verify_password(
    store: &CredentialStore,
    username: &str,
    password: String,
) -> Result<Principal> {
    let proof = Proof::Password(password);
    if store.authenticate(username, &proof) {
        Ok(Principal::new(username))
    } else {
        Err(Error::Authentication)
    }
}

enum DispatchOutcome {
    Completed(Result<Option<Reply>>),
    ForceCancelled,
}

/// Write any queued broadcast messages. A lagged receiver just skips
/// ahead — a slow session drops its own copies, it never stalls others.
async fn drain_broadcasts<S: SessionStream>(
    rx: &mut broadcast::Receiver<String>,
    terminal: &mut Terminal<S>,
) {
    loop {
        match rx.try_recv() {
            Ok(message) => {
                let _ = terminal.write_line(&format!("<info>{message}</info>")).await;
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!(skipped, "broadcast receiver lagged");
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn session_over(
        stream: tokio::io::DuplexStream,
        config: ServerConfig,
        credentials: CredentialStore,
    ) -> (Session<tokio::io::DuplexStream>, SharedSessionInfo) {
        let dispatcher = Dispatcher::new(
            Arc::new(termgate_command::CommandRegistry::new()),
            config.dispatch.clone(),
        );
        let info: SharedSessionInfo = Arc::new(Mutex::new(SessionInfo {
            id: SessionId::new(),
            peer: "127.0.0.1:9".parse().unwrap(),
            principal: None,
            created_at: SystemTime::now(),
            state: SessionState::Connecting,
        }));
        let (broadcast_tx, _) = broadcast::channel(8);
        let session = Session::new(
            Terminal::new(stream, false),
            dispatcher,
            Arc::new(credentials),
            Arc::new(config),
            Arc::clone(&info),
            CancellationToken::new(),
            broadcast_tx,
            CancellationToken::new(),
        );
        (session, info)
    }

    fn password_store(username: &str, password: &str) -> CredentialStore {
        let mut store = CredentialStore::new();
        store.add_user(username).unwrap();
        store.set_password(username, password).unwrap();
        store
    }

    #[test]
    fn test_verify_password_maps_rejection() {
        let store = password_store("op", "pw");
        assert_eq!(
            verify_password(&store, "op", "pw".to_string()).unwrap().name(),
            "op"
        );
        let err = verify_password(&store, "op", "nope".to_string()).unwrap_err();
        assert!(matches!(err, Error::Authentication));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_attempt_limit_ends_in_rejected_state() {
        let (server_side, mut client) = tokio::io::duplex(1024);
        let mut config = ServerConfig::default();
        config.auth.allow_anonymous = false;
        config.auth.max_attempts = 1;

        let (session, info) = session_over(server_side, config, password_store("op", "pw"));
        let task = tokio::spawn(session.run());

        client.write_all(b"op\nwrong\n").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap();

        assert_eq!(info.lock().unwrap().state, SessionState::Rejected);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Too many failed attempts"), "{text}");
    }

    #[tokio::test]
    async fn test_transport_drop_during_auth_closes_without_reject() {
        let (server_side, client) = tokio::io::duplex(1024);
        let mut config = ServerConfig::default();
        config.auth.allow_anonymous = false;

        let (session, info) = session_over(server_side, config, CredentialStore::new());
        drop(client);
        session.run().await;

        assert_eq!(info.lock().unwrap().state, SessionState::Closed);
    }

    #[test]
    fn test_session_state_serializes() {
        let json = serde_json::to_string(&SessionState::AuthenticatedIdle).unwrap();
        assert_eq!(json, "\"authenticated_idle\"");
    }

    #[test]
    fn test_session_info_listing_shape() {
        let info = SessionInfo {
            id: SessionId::new(),
            peer: "127.0.0.1:9".parse().unwrap(),
            principal: Some(Principal::new("op")),
            created_at: SystemTime::now(),
            state: SessionState::Connecting,
        };
        let value: HashMap<String, serde_json::Value> =
            serde_json::from_str(&serde_json::to_string(&info).unwrap()).unwrap();
        assert!(value.contains_key("id"));
        assert_eq!(value["principal"], serde_json::json!("op"));
        assert_eq!(value["state"], serde_json::json!("connecting"));
    }
}
