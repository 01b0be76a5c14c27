use std::io::{IsTerminal, Read, Write};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use bytes::Bytes;
use crossterm::terminal;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;
use warp_protocol::mux::Mux;
use warp_protocol::{HostUpdate, Registration, Token, WindowSize};

use crate::term::RawModeGuard;

const PTY_QUEUE: usize = 64;

/// Host a shell under a new warp. Runs until the shell exits or the daemon
/// drops the connection (for instance when the ID is already taken).
pub async fn run(address: &str, id: Option<String>) -> anyhow::Result<()> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("warp open requires a terminal");
    }

    let warp: Token = id.unwrap_or_else(random_token);
    let (cols, rows) = terminal::size()?;

    let stream = TcpStream::connect(address).await?;
    let mux = Mux::new(stream);
    mux.update
        .send_json(&Registration::Host(HostUpdate {
            warp: warp.clone(),
            window_size: WindowSize { rows, cols },
        }))
        .await?;

    // The shell runs under a PTY sized like the local terminal.
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("failed to open PTY")?;

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
    let mut cmd = CommandBuilder::new(&shell);
    cmd.cwd(std::env::current_dir()?);
    let mut child = pair
        .slave
        .spawn_command(cmd)
        .with_context(|| format!("failed to spawn {shell}"))?;
    drop(pair.slave);

    let pty_writer = Arc::new(Mutex::new(
        pair.master.take_writer().context("PTY writer")?,
    ));
    let mut pty_reader = pair.master.try_clone_reader().context("PTY reader")?;
    let master = pair.master;

    println!("[warp {warp} open - join with: warp connect {warp}]");
    let _raw = RawModeGuard::enable()?;

    let (update, _state, mut data, cancel) = mux.into_parts();
    let data_tx = data.sender();
    let update_tx = update.sender();

    // The PTY reader is blocking; bridge it onto a channel from a thread.
    let (pty_tx, mut pty_rx) = mpsc::channel::<Bytes>(PTY_QUEUE);
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pty_reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if pty_tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Local keystrokes go straight to the shell.
    let stdin_cancel = cancel.clone();
    let stdin_writer = pty_writer.clone();
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
            let Ok(mut writer) = stdin_writer.lock() else { break };
            if writer.write_all(&buf[..n]).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });

    // Client keystrokes arrive on the data channel; the daemon has already
    // filtered out read-only clients.
    let remote_cancel = cancel.clone();
    let remote_writer = pty_writer.clone();
    tokio::spawn(async move {
        loop {
            let chunk = tokio::select! {
                _ = remote_cancel.cancelled() => break,
                next = data.recv() => match next {
                    Some(c) => c,
                    None => {
                        // Daemon side is gone; unwind the whole session.
                        remote_cancel.cancel();
                        break;
                    }
                },
            };
            let Ok(mut writer) = remote_writer.lock() else { break };
            if writer.write_all(&chunk).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });

    // Window resizes propagate to the shell and to the daemon.
    let mut winch = signal(SignalKind::window_change())?;
    let winch_cancel = cancel.clone();
    let resize_warp = warp.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = winch_cancel.cancelled() => break,
                changed = winch.recv() => {
                    if changed.is_none() {
                        break;
                    }
                }
            }
            let Ok((cols, rows)) = terminal::size() else {
                continue;
            };
            if master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .is_err()
            {
                break;
            }
            debug!(rows, cols, "window resized");
            let update = Registration::Host(HostUpdate {
                warp: resize_warp.clone(),
                window_size: WindowSize { rows, cols },
            });
            if update_tx.send_json(&update).await.is_err() {
                break;
            }
        }
    });

    // Shell output fans out to the local terminal and to the daemon.
    let mut stdout = std::io::stdout();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            next = pty_rx.recv() => match next {
                Some(c) => c,
                None => break,
            },
        };
        stdout.write_all(&chunk)?;
        stdout.flush()?;
        if data_tx.send(chunk).await.is_err() {
            break;
        }
    }
    cancel.cancel();

    let _ = child.kill();
    let _ = child.wait();

    println!("\r\n[warp {warp} closed]\r");
    Ok(())
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    format!("{:012x}", rng.gen_range(0u64..(1 << 48)))
}
