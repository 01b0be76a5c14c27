use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warp_protocol::{Registration, State, Token, WindowSize};

use crate::error::WarpError;
use crate::session::Session;
use crate::user::{HostState, SessionHandle, UserState};

/// Capacity of the client-to-host input fan-in queue.
const HOST_INPUT_QUEUE: usize = 64;
/// Capacity of a client's state queue. Resizes are rare and idempotent.
const STATE_QUEUE: usize = 8;

/// The shared-terminal aggregate: one host, any number of shell clients, and
/// the relay engine that moves bytes between them. Exists only while its host
/// session is alive; its token is the registry key.
#[derive(Debug)]
pub struct Warp {
    token: Token,
    client_backlog: usize,
    /// Warp scope; cancelled once when the host goes away, tearing down every
    /// attached client.
    cancel: CancellationToken,
    shared: Mutex<Shared>,
    host_input: mpsc::Sender<Bytes>,
    /// Taken by the host loop, exactly once.
    host_input_rx: std::sync::Mutex<Option<mpsc::Receiver<Bytes>>>,
}

#[derive(Debug)]
struct Shared {
    window_size: WindowSize,
    host: HostState,
    clients: HashMap<String, UserState>,
}

impl Warp {
    pub fn new(
        token: Token,
        window_size: WindowSize,
        host: HostState,
        client_backlog: usize,
    ) -> Arc<Self> {
        let (host_input, host_input_rx) = mpsc::channel(HOST_INPUT_QUEUE);
        Arc::new(Self {
            token,
            client_backlog: client_backlog.max(1),
            cancel: CancellationToken::new(),
            shared: Mutex::new(Shared {
                window_size,
                host,
                clients: HashMap::new(),
            }),
            host_input,
            host_input_rx: std::sync::Mutex::new(Some(host_input_rx)),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn window_size(&self) -> WindowSize {
        self.shared.lock().await.window_size
    }

    pub async fn host_username(&self) -> String {
        self.shared.lock().await.host.username.clone()
    }

    /// Number of client sessions currently attached, across all users.
    pub async fn client_count(&self) -> usize {
        self.shared
            .lock()
            .await
            .clients
            .values()
            .map(|u| u.sessions.len())
            .sum()
    }

    /// Cancel every attached client session and mark the warp as draining.
    /// Called by the daemon after the host loop returns, right after the
    /// registry entry is removed. Idempotent.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    /// Run the host side of the relay until the host disconnects or errors.
    /// Reads host-authored bytes from the data channel and fans them out,
    /// applies window resizes from the update channel, and drains the
    /// client-input queue into the host's data channel.
    pub async fn run_host(&self, session: &mut Session) -> Result<(), WarpError> {
        let mut input = self
            .host_input_rx
            .lock()
            .map_err(|_| WarpError::DuplicateWarp(self.token.clone()))?
            .take()
            .ok_or_else(|| WarpError::DuplicateWarp(self.token.clone()))?;

        info!(warp = %self.token, session = %session, "host attached");
        let cancel = session.cancel_token();
        let host_out = session.mux.data.sender();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = session.mux.data.recv() => match next {
                    Some(bytes) => self.broadcast_data(bytes).await,
                    None => break,
                },
                next = session.mux.update.recv() => match next {
                    Some(payload) => match serde_json::from_slice::<Registration>(&payload)? {
                        Registration::Host(update) => self.resize(update.window_size).await,
                        Registration::Client(_) => {
                            return Err(WarpError::Decode(
                                "client registration on host update stream".to_string(),
                            ));
                        }
                    },
                    None => break,
                },
                next = input.recv() => match next {
                    Some(bytes) => {
                        if host_out.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Run one client session against this warp until the client leaves, the
    /// warp drains, or the client falls too far behind.
    pub async fn run_client(&self, session: &mut Session) -> Result<(), WarpError> {
        let (data_tx, mut data_rx) = mpsc::channel(self.client_backlog);
        let (state_tx, mut state_rx) = mpsc::channel(STATE_QUEUE);
        let cancel = session.cancel_token();
        let handle = SessionHandle {
            data: data_tx,
            state: state_tx,
            cancel: cancel.clone(),
        };

        // Join: insert under the warp lock; the current geometry becomes the
        // client's first state message.
        {
            let mut shared = self.shared.lock().await;
            let user = shared.clients.entry(session.user.clone()).or_insert_with(|| {
                UserState::new(session.user.clone(), session.username.clone(), session.mode)
            });
            user.sessions.insert(session.key.clone(), handle.clone());
            let _ = handle.state.try_send(State {
                window_size: shared.window_size,
            });
        }
        info!(warp = %self.token, session = %session, "client attached");

        let data_out = session.mux.data.sender();
        let state_out = session.mux.state.sender();
        let warp_cancel = self.cancel.clone();
        let mode = session.mode;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = warp_cancel.cancelled() => break Ok(()),
                next = data_rx.recv() => match next {
                    Some(bytes) => {
                        // Guarded so a stalled transport cannot outlive a
                        // cancellation.
                        tokio::select! {
                            res = data_out.send(bytes) => {
                                if let Err(e) = res {
                                    break Err(WarpError::Io(e));
                                }
                            }
                            _ = cancel.cancelled() => break Ok(()),
                        }
                    }
                    None => break Ok(()),
                },
                next = state_rx.recv() => match next {
                    Some(state) => {
                        tokio::select! {
                            res = state_out.send_json(&state) => {
                                if let Err(e) = res {
                                    break Err(WarpError::Io(e));
                                }
                            }
                            _ = cancel.cancelled() => break Ok(()),
                        }
                    }
                    None => break Ok(()),
                },
                next = session.mux.data.recv() => match next {
                    Some(bytes) => {
                        // Input from a read-only viewer is silently discarded.
                        if mode.can_write() && self.host_input.send(bytes).await.is_err() {
                            break Ok(());
                        }
                    }
                    None => break Ok(()),
                },
            }
        };

        // Leave: remove this session; drop the user entry with its last one.
        {
            let mut shared = self.shared.lock().await;
            if let Some(user) = shared.clients.get_mut(&session.user) {
                user.sessions.remove(&session.key);
                if user.sessions.is_empty() {
                    shared.clients.remove(&session.user);
                }
            }
        }
        info!(warp = %self.token, session = %session, "client detached");
        result
    }

    /// Fan host-authored bytes out to every attached session whose user has
    /// read capability. The client set is snapshotted under the lock and sent
    /// to outside it, so a join or leave mid-broadcast only affects later
    /// broadcasts. A session whose queue is full is disconnected rather than
    /// allowed to backpressure the host.
    async fn broadcast_data(&self, bytes: Bytes) {
        let targets: Vec<(String, SessionHandle)> = {
            let shared = self.shared.lock().await;
            shared
                .clients
                .values()
                .filter(|user| user.mode.can_read())
                .flat_map(|user| {
                    user.sessions
                        .iter()
                        .map(|(key, handle)| (key.clone(), handle.clone()))
                })
                .collect()
        };
        for (key, handle) in targets {
            match handle.data.try_send(bytes.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(warp = %self.token, session = %key, "client backlog full, disconnecting");
                    handle.cancel.cancel();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    handle.cancel.cancel();
                }
            }
        }
    }

    /// Record the new authoritative geometry and broadcast it to every
    /// attached session's state queue.
    async fn resize(&self, window_size: WindowSize) {
        let targets: Vec<SessionHandle> = {
            let mut shared = self.shared.lock().await;
            shared.window_size = window_size;
            shared
                .clients
                .values()
                .flat_map(|user| user.sessions.values().cloned())
                .collect()
        };
        debug!(
            warp = %self.token,
            rows = window_size.rows,
            cols = window_size.cols,
            "window resized"
        );
        let state = State { window_size };
        for handle in targets {
            match handle.state.try_send(state) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(warp = %self.token, "state backlog full, disconnecting");
                    handle.cancel.cancel();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    handle.cancel.cancel();
                }
            }
        }
    }
}
