//! Relay engine tests over in-memory duplex transports: fan-out ordering,
//! permission enforcement, state propagation and teardown cascades.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use libwarp::user::HostState;
use libwarp::{Session, Warp};
use warp_protocol::mux::Mux;
use warp_protocol::{
    AccessSet, ClientUpdate, HostUpdate, Registration, State, WindowSize,
};

const WAIT: Duration = Duration::from_secs(5);

fn test_warp(token: &str, rows: u16, cols: u16, backlog: usize) -> Arc<Warp> {
    Warp::new(
        token.to_string(),
        WindowSize { rows, cols },
        HostState::new("host-user".to_string(), "host".to_string()),
        backlog,
    )
}

/// Register a host session against a duplex pair; returns the peer-side mux
/// that plays the remote host.
async fn attach_host(warp: &Arc<Warp>, token: &str, rows: u16, cols: u16) -> Mux {
    let (daemon_side, peer) = duplex_pair(64 * 1024);
    peer.update
        .send_json(&Registration::Host(HostUpdate {
            warp: token.to_string(),
            window_size: WindowSize { rows, cols },
        }))
        .await
        .expect("send host registration");
    let mut session = Session::handshake(daemon_side, "host-peer".to_string(), CancellationToken::new())
        .await
        .expect("host handshake");
    let warp = Arc::clone(warp);
    tokio::spawn(async move {
        let _ = warp.run_host(&mut session).await;
        warp.teardown();
        session.teardown();
    });
    peer
}

/// Register a client session; returns the peer-side mux playing the remote
/// shell client.
async fn attach_client(warp: &Arc<Warp>, token: &str, key: &str, mode: AccessSet) -> Mux {
    attach_client_with_buffer(warp, token, key, mode, 64 * 1024).await
}

async fn attach_client_with_buffer(
    warp: &Arc<Warp>,
    token: &str,
    key: &str,
    mode: AccessSet,
    buffer: usize,
) -> Mux {
    let (daemon_side, peer) = duplex_pair(buffer);
    peer.update
        .send_json(&Registration::Client(ClientUpdate {
            warp: token.to_string(),
            key: key.to_string(),
            is_host: false,
            username: format!("user-{key}"),
            mode,
        }))
        .await
        .expect("send client registration");
    let mut session = Session::handshake(daemon_side, "client-peer".to_string(), CancellationToken::new())
        .await
        .expect("client handshake");
    let warp = Arc::clone(warp);
    tokio::spawn(async move {
        let _ = warp.run_client(&mut session).await;
        session.teardown();
    });
    peer
}

fn duplex_pair(buffer: usize) -> (Mux, Mux) {
    let (a, b) = tokio::io::duplex(buffer);
    (Mux::new(a), Mux::new(b))
}

async fn recv_state(peer: &mut Mux) -> State {
    let payload = timeout(WAIT, peer.state.recv())
        .await
        .expect("state recv timed out")
        .expect("state channel closed");
    serde_json::from_slice(&payload).expect("state decode")
}

async fn wait_for_clients(warp: &Arc<Warp>, count: usize) {
    timeout(WAIT, async {
        while warp.client_count().await != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client count never settled");
}

#[tokio::test]
async fn fan_out_preserves_per_client_order() {
    let warp = test_warp("t-order", 24, 80, 64);
    let host = attach_host(&warp, "t-order", 24, 80).await;
    let mut c1 = attach_client(&warp, "t-order", "k1", AccessSet::read_write()).await;
    let mut c2 = attach_client(&warp, "t-order", "k2", AccessSet::read_only()).await;
    wait_for_clients(&warp, 2).await;

    for chunk in [&b"b1"[..], b"b2", b"b3"] {
        host.data.send(Bytes::copy_from_slice(chunk)).await.unwrap();
    }

    for client in [&mut c1, &mut c2] {
        for expected in [&b"b1"[..], b"b2", b"b3"] {
            let got = timeout(WAIT, client.data.recv())
                .await
                .expect("data recv timed out")
                .expect("data channel closed");
            assert_eq!(got.as_ref(), expected);
        }
    }
}

#[tokio::test]
async fn read_only_client_input_never_reaches_the_host() {
    let warp = test_warp("t-perm", 24, 80, 64);
    let mut host = attach_host(&warp, "t-perm", 24, 80).await;
    let viewer = attach_client(&warp, "t-perm", "ro", AccessSet::read_only()).await;
    let writer = attach_client(&warp, "t-perm", "rw", AccessSet::read_write()).await;
    wait_for_clients(&warp, 2).await;

    viewer.data.send(Bytes::from_static(b"discarded")).await.unwrap();
    writer.data.send(Bytes::from_static(b"typed")).await.unwrap();

    let got = timeout(WAIT, host.data.recv())
        .await
        .expect("host recv timed out")
        .expect("host data closed");
    assert_eq!(got.as_ref(), b"typed");
    // Nothing else may arrive; the viewer's bytes were dropped at its session.
    assert!(
        timeout(Duration::from_millis(200), host.data.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn client_joins_with_current_geometry_and_follows_resizes() {
    let warp = test_warp("t-state", 40, 120, 64);
    let host = attach_host(&warp, "t-state", 40, 120).await;
    let mut early = attach_client(&warp, "t-state", "early", AccessSet::read_write()).await;
    wait_for_clients(&warp, 1).await;

    let first = recv_state(&mut early).await;
    assert_eq!(first.window_size, WindowSize { rows: 40, cols: 120 });

    host.update
        .send_json(&Registration::Host(HostUpdate {
            warp: "t-state".to_string(),
            window_size: WindowSize { rows: 50, cols: 132 },
        }))
        .await
        .unwrap();

    let second = recv_state(&mut early).await;
    assert_eq!(second.window_size, WindowSize { rows: 50, cols: 132 });

    // A later joiner sees only the current geometry, not a replay.
    let mut late = attach_client(&warp, "t-state", "late", AccessSet::read_write()).await;
    wait_for_clients(&warp, 2).await;
    let snapshot = recv_state(&mut late).await;
    assert_eq!(snapshot.window_size, WindowSize { rows: 50, cols: 132 });
    assert!(
        timeout(Duration::from_millis(200), late.state.recv())
            .await
            .is_err()
    );
    assert_eq!(warp.window_size().await, WindowSize { rows: 50, cols: 132 });
}

#[tokio::test]
async fn host_disconnect_cascades_to_every_client() {
    let warp = test_warp("t-cascade", 24, 80, 64);
    let host = attach_host(&warp, "t-cascade", 24, 80).await;
    let mut c1 = attach_client(&warp, "t-cascade", "k1", AccessSet::read_write()).await;
    let mut c2 = attach_client(&warp, "t-cascade", "k2", AccessSet::read_write()).await;
    wait_for_clients(&warp, 2).await;

    host.close();

    assert!(
        timeout(WAIT, c1.data.recv())
            .await
            .expect("c1 recv timed out")
            .is_none()
    );
    assert!(
        timeout(WAIT, c2.data.recv())
            .await
            .expect("c2 recv timed out")
            .is_none()
    );
    wait_for_clients(&warp, 0).await;
}

#[tokio::test]
async fn client_departure_leaves_others_untouched() {
    let warp = test_warp("t-leave", 24, 80, 64);
    let host = attach_host(&warp, "t-leave", 24, 80).await;
    let leaver = attach_client(&warp, "t-leave", "k1", AccessSet::read_write()).await;
    let mut stayer = attach_client(&warp, "t-leave", "k2", AccessSet::read_write()).await;
    wait_for_clients(&warp, 2).await;

    leaver.close();
    wait_for_clients(&warp, 1).await;

    host.data.send(Bytes::from_static(b"still here")).await.unwrap();
    let got = timeout(WAIT, stayer.data.recv())
        .await
        .expect("recv timed out")
        .expect("data channel closed");
    assert_eq!(got.as_ref(), b"still here");
}

#[tokio::test]
async fn slow_client_is_disconnected_not_throttling() {
    // Tiny transport buffer and backlog; the slow peer never reads.
    let warp = test_warp("t-slow", 24, 80, 8);
    let host = attach_host(&warp, "t-slow", 24, 80).await;
    let slow = attach_client_with_buffer(&warp, "t-slow", "slow", AccessSet::read_write(), 64).await;
    let mut fast = attach_client(&warp, "t-slow", "fast", AccessSet::read_write()).await;
    wait_for_clients(&warp, 2).await;

    const CHUNKS: usize = 1024;
    const CHUNK_LEN: usize = 1024;

    // Drain the fast client continuously so only the stalled one lags.
    let reader = tokio::spawn(async move {
        let mut received = 0usize;
        while received < CHUNKS * CHUNK_LEN {
            match timeout(WAIT, fast.data.recv()).await {
                Ok(Some(bytes)) => received += bytes.len(),
                _ => break,
            }
        }
        received
    });

    let chunk = Bytes::from(vec![b'x'; CHUNK_LEN]);
    for _ in 0..CHUNKS {
        host.data.send(chunk.clone()).await.unwrap();
    }

    // The stalled client is dropped; the fast one receives everything.
    wait_for_clients(&warp, 1).await;
    let received = timeout(WAIT, reader).await.expect("reader timed out").expect("reader join");
    assert_eq!(received, CHUNKS * CHUNK_LEN);
    drop(slow);
}
