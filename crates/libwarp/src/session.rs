use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use warp_protocol::mux::Mux;
use warp_protocol::{AccessSet, Registration, Token, WindowSize};

use crate::error::WarpError;

/// Role a connection declared in its registration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Host,
    ShellClient,
}

/// One live connection: the three channel handles plus the identity fixed by
/// its registration message. Warp token, kind, user and mode are immutable
/// after the handshake.
#[derive(Debug)]
pub struct Session {
    pub warp: Token,
    pub kind: SessionKind,
    /// Participant token: the client's session key, or a generated id for a
    /// host.
    pub user: String,
    /// Per-session key, used to index this session within its user's state.
    pub key: String,
    pub username: String,
    pub mode: AccessSet,
    /// Present for hosts only; carried by their registration.
    pub window_size: Option<WindowSize>,
    pub mux: Mux,
    pub remote: String,
    cancel: CancellationToken,
}

impl Session {
    /// Read exactly one registration message from the update channel and fix
    /// the session's identity from it. A decode failure is fatal to this
    /// session only.
    pub async fn handshake(
        mut mux: Mux,
        remote: String,
        cancel: CancellationToken,
    ) -> Result<Self, WarpError> {
        let payload = mux.update.recv().await.ok_or(WarpError::Disconnected)?;
        let registration: Registration = serde_json::from_slice(&payload)?;

        let session = match registration {
            Registration::Host(host) => {
                let user = uuid::Uuid::new_v4().to_string();
                Session {
                    warp: host.warp,
                    kind: SessionKind::Host,
                    key: user.clone(),
                    user,
                    username: "host".to_string(),
                    mode: AccessSet::read_write(),
                    window_size: Some(host.window_size),
                    mux,
                    remote,
                    cancel,
                }
            }
            Registration::Client(client) => Session {
                warp: client.warp,
                kind: SessionKind::ShellClient,
                user: client.key.clone(),
                key: client.key,
                username: client.username,
                mode: client.mode,
                window_size: None,
                mux,
                remote,
                cancel,
            },
        };
        debug!(session = %session, "session registered");
        Ok(session)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the session scope and close its connection. Idempotent; the
    /// single call site lives in the connection handler.
    pub fn teardown(&self) {
        self.cancel.cancel();
        self.mux.close();
        debug!(session = %self, "session torn down");
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SessionKind::Host => "host",
            SessionKind::ShellClient => "client",
        };
        write!(
            f,
            "{}/{}:{}@{}",
            self.warp, kind, self.username, self.remote
        )
    }
}
