use std::io::{IsTerminal, Write};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use warp_protocol::mux::Mux;
use warp_protocol::{AccessSet, ClientUpdate, Registration, State};

use crate::term::RawModeGuard;

/// Attach to a warp as a shell client. Stays in the foreground until the
/// daemon closes the connection (host gone, unknown warp, or we were too
/// slow to keep up).
pub async fn run(address: &str, id: &str, read_only: bool) -> anyhow::Result<()> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("warp connect requires a terminal");
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "guest".to_string());
    let mode = if read_only {
        AccessSet::read_only()
    } else {
        AccessSet::read_write()
    };

    let stream = TcpStream::connect(address).await?;
    let mux = Mux::new(stream);

    mux.update
        .send_json(&Registration::Client(ClientUpdate {
            warp: id.to_string(),
            key: random_key(),
            is_host: false,
            username: username.clone(),
            mode,
        }))
        .await?;

    let (_update, mut state, mut data, cancel) = mux.into_parts();
    let data_tx = data.sender();

    let _raw = RawModeGuard::enable()?;
    println!("[connected to {id} as {username}]\r");

    // Mirror the host's geometry locally whenever a state message arrives.
    let state_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                _ = state_cancel.cancelled() => break,
                next = state.recv() => match next {
                    Some(p) => p,
                    None => break,
                },
            };
            match serde_json::from_slice::<State>(&payload) {
                Ok(st) => {
                    let mut stdout = std::io::stdout();
                    let _ = write!(
                        stdout,
                        "\x1b[8;{};{}t",
                        st.window_size.rows, st.window_size.cols
                    );
                    let _ = stdout.flush();
                }
                Err(e) => debug!(error = %e, "ignoring malformed state message"),
            }
        }
    });

    // Keystrokes flow to the host on the data channel. Read-only clients
    // still send; the daemon discards their input.
    let stdin_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            let n = tokio::select! {
                _ = stdin_cancel.cancelled() => break,
                read = stdin.read(&mut buf) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                },
            };
            if data_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                break;
            }
        }
    });

    // Host output goes straight to the local terminal.
    let mut stdout = tokio::io::stdout();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            next = data.recv() => match next {
                Some(c) => c,
                None => break,
            },
        };
        stdout.write_all(&chunk).await?;
        stdout.flush().await?;
    }
    cancel.cancel();

    println!("\r\n[disconnected from {id}]\r");
    Ok(())
}

fn random_key() -> String {
    format!("{:032x}", rand::random::<u128>())
}
