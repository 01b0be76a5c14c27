use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use libwarp::user::HostState;
use libwarp::{Registry, Session, SessionKind, Warp, WarpError};
use warp_protocol::mux::Mux;

use crate::config::DaemonConfig;

/// Bind and serve until ctrl-c.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %listener.local_addr()?, "warpd listening");
    let registry = Arc::new(Registry::new());

    tokio::select! {
        result = serve(listener, registry, config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

/// Accept loop. An accept error is logged and serving continues; a
/// per-connection error terminates only that connection.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: DaemonConfig,
) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let registry = Arc::clone(&registry);
                let config = config.clone();
                tokio::spawn(async move {
                    match handle(stream, addr.to_string(), registry, config).await {
                        Ok(()) => debug!(remote = %addr, "done handling connection"),
                        Err(e) => info!(remote = %addr, error = %e, "connection ended"),
                    }
                });
            }
            Err(e) => error!(error = %e, "accept error"),
        }
    }
}

async fn handle(
    stream: TcpStream,
    remote: String,
    registry: Arc<Registry>,
    config: DaemonConfig,
) -> Result<(), WarpError> {
    debug!(remote = %remote, "handling new connection");
    let cancel = CancellationToken::new();
    let mux = Mux::with_options(stream, config.max_frame_bytes, cancel.child_token());

    let mut session = match Session::handshake(mux, remote, cancel.clone()).await {
        Ok(session) => session,
        Err(e) => {
            cancel.cancel();
            return Err(e);
        }
    };

    let result = match session.kind {
        SessionKind::Host => handle_host(&registry, &config, &mut session).await,
        SessionKind::ShellClient => handle_client(&registry, &mut session).await,
    };
    session.teardown();
    result
}

/// A host connection creates the warp (failing if the token is taken), runs
/// its relay loop, and removes the warp once the host is gone. This removal
/// is the only path that deletes a warp.
async fn handle_host(
    registry: &Registry,
    config: &DaemonConfig,
    session: &mut Session,
) -> Result<(), WarpError> {
    let window_size = session
        .window_size
        .ok_or_else(|| WarpError::Decode("host registration missing window size".to_string()))?;
    let host = HostState::new(session.user.clone(), session.username.clone());
    let token = session.warp.clone();
    let backlog = config.client_backlog;
    let warp = registry
        .create_if_absent(&token, || Warp::new(token.clone(), window_size, host, backlog))
        .await?;
    info!(warp = %session.warp, session = %session, "warp created");

    let result = warp.run_host(session).await;

    registry.remove(&session.warp).await;
    warp.teardown();
    info!(warp = %session.warp, "warp removed");
    result
}

async fn handle_client(registry: &Registry, session: &mut Session) -> Result<(), WarpError> {
    let warp = registry.lookup(&session.warp).await?;
    warp.run_client(session).await
}
