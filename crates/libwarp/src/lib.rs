pub mod error;
pub mod registry;
pub mod session;
pub mod user;
pub mod warp;

pub use error::WarpError;
pub use registry::Registry;
pub use session::{Session, SessionKind};
pub use user::{HostState, SessionHandle, ShellCaps, UserState};
pub use warp::Warp;
