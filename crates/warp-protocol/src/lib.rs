pub mod codec;
pub mod mux;

use serde::{Deserialize, Serialize};

/// Opaque identifier of an active warp; possession is the only credential.
pub type Token = String;

/// Default daemon address used by both `warpd` and the CLI.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:4242";

/// Default daemon port.
pub const DEFAULT_PORT: u16 = 4242;

/// Terminal geometry. The host is authoritative for the value carried here.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

/// Client-facing capability set: what a shell client may do with the host's
/// terminal. The host-local shell capability is a separate type
/// (`libwarp::user::ShellCaps`) so the two permission spaces cannot be
/// confused for one another.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessSet {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

impl AccessSet {
    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    pub fn can_read(&self) -> bool {
        self.read
    }

    pub fn can_write(&self) -> bool {
        self.write
    }
}

/// Host registration, and on subsequent sends, a host window resize.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HostUpdate {
    pub warp: Token,
    pub window_size: WindowSize,
}

/// Single registration message sent by a shell client.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientUpdate {
    pub warp: Token,
    /// Random per-session key generated by the client.
    pub key: String,
    #[serde(default)]
    pub is_host: bool,
    pub username: String,
    pub mode: AccessSet,
}

/// Messages carried on the update stream, tagged by the sender's role.
/// The daemon dispatches on this tag and never infers the role from content.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Registration {
    Host(HostUpdate),
    Client(ClientUpdate),
}

/// Host-to-client status message on the state stream. Resizes are idempotent;
/// clients may observe them in any order relative to data bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub window_size: WindowSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_tag_format() {
        let reg = Registration::Host(HostUpdate {
            warp: "ae7fd234abe2".to_string(),
            window_size: WindowSize { rows: 40, cols: 120 },
        });
        let json = serde_json::to_string(&reg).unwrap();
        assert!(json.contains(r#""kind":"host""#));
        let parsed: Registration = serde_json::from_str(&json).unwrap();
        match parsed {
            Registration::Host(h) => {
                assert_eq!(h.warp, "ae7fd234abe2");
                assert_eq!(h.window_size, WindowSize { rows: 40, cols: 120 });
            }
            Registration::Client(_) => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_update_defaults() {
        // is_host defaults to false when a client omits it
        let json = r#"{"kind":"client","warp":"abc","key":"k1","username":"alice","mode":{"read":true,"write":true}}"#;
        let parsed: Registration = serde_json::from_str(json).unwrap();
        match parsed {
            Registration::Client(c) => {
                assert!(!c.is_host);
                assert!(c.mode.can_read());
                assert!(c.mode.can_write());
            }
            Registration::Host(_) => panic!("wrong variant"),
        }
    }

    #[test]
    fn access_set_capabilities() {
        assert!(AccessSet::read_only().can_read());
        assert!(!AccessSet::read_only().can_write());
        assert!(AccessSet::read_write().can_write());
        let none = AccessSet::default();
        assert!(!none.can_read());
        assert!(!none.can_write());
    }

    #[test]
    fn state_roundtrip() {
        let st = State {
            window_size: WindowSize { rows: 24, cols: 80 },
        };
        let json = serde_json::to_string(&st).unwrap();
        let parsed: State = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, st);
    }
}
