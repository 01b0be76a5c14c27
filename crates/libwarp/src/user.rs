use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use warp_protocol::{AccessSet, State};

/// Host-local shell capability. Deliberately a distinct type from the
/// client-facing [`AccessSet`] so a host's own capability on its shell is
/// never handed out to, or checked against, a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellCaps {
    pub read: bool,
    pub write: bool,
}

impl ShellCaps {
    pub const fn full() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

/// Outbound handles for one attached session: its bounded data queue, its
/// state queue and the token that tears the session down.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub data: mpsc::Sender<Bytes>,
    pub state: mpsc::Sender<State>,
    pub cancel: CancellationToken,
}

/// One participant within a warp: identity, granted capabilities and the
/// sessions currently attached for that participant.
#[derive(Debug)]
pub struct UserState {
    pub user: String,
    pub username: String,
    pub mode: AccessSet,
    pub sessions: HashMap<String, SessionHandle>,
}

impl UserState {
    pub fn new(user: String, username: String, mode: AccessSet) -> Self {
        Self {
            user,
            username,
            mode,
            sessions: HashMap::new(),
        }
    }
}

/// The warp's owning participant. Exactly one per warp, set at creation and
/// never replaced. The session map is a reserved extension point for
/// host-spawned auxiliary sessions and stays empty.
#[derive(Debug)]
pub struct HostState {
    pub user: String,
    pub username: String,
    pub shell: ShellCaps,
    pub sessions: HashMap<String, SessionHandle>,
}

impl HostState {
    pub fn new(user: String, username: String) -> Self {
        Self {
            user,
            username,
            shell: ShellCaps::full(),
            sessions: HashMap::new(),
        }
    }
}
