//! TCP control server: one task per connection, commands answered in order.

use std::io;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ControlConfig;
use crate::error::{ProtocolError, TransferError};
use crate::frame::Frame;
use crate::framing::{FrameReader, ReadLine};
use crate::protocol::{Command, Db, DbEntry, Response};
use crate::store::RemoveOutcome;

/// Bind the configured address and serve until `cancel` fires.
pub async fn run(frame: Frame, control: &ControlConfig, cancel: CancellationToken) -> Result<()> {
    let addr = control.socket_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control server on {addr}"))?;
    serve(listener, frame, control.max_line_bytes, cancel).await
}

#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
pub async fn serve(
    listener: TcpListener,
    frame: Frame,
    max_line_bytes: usize,
    cancel: CancellationToken,
) -> Result<()> {
    info!("control server listening");
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(open = connections.len(), "cancel received; closing control server");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "control: connection accepted");
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        frame.clone(),
                        max_line_bytes,
                        cancel.child_token(),
                    ));
                }
                Err(err) => warn!(error = %err, "control: accept failed"),
            },

            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "control: connection task failed");
                }
            }
        }
    }
    // In-flight receives are abandoned as hidden partial files.
    connections.shutdown().await;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    frame: Frame,
    max_line_bytes: usize,
    cancel: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, max_line_bytes);
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        outcome = session(&mut reader, &mut write_half, &frame) => outcome,
    };
    match outcome {
        Ok(()) => debug!(%peer, "control: connection closed"),
        Err(err) => debug!(%peer, error = %err, "control: connection dropped"),
    }
}

async fn session<R, W>(reader: &mut FrameReader<R>, writer: &mut W, frame: &Frame) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = match reader.read_line().await? {
            ReadLine::Line(line) => line,
            ReadLine::Eof => return Ok(()),
            ReadLine::Rejected(err) => {
                warn!(error = %err, "control: request rejected");
                write_response(writer, &Response::from(&err)).await?;
                if matches!(err, ProtocolError::LineTooLong { .. }) {
                    // The rest of the line is unread; framing is lost.
                    return Ok(());
                }
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match Command::parse(&line) {
            Ok(command) => {
                debug!(cmd = command.name(), "control: command");
                dispatch(reader, writer, frame, command).await?
            }
            Err(err) => {
                debug!(error = %err, "control: invalid request");
                Response::from(&err)
            }
        };
        write_response(writer, &response).await?;
    }
}

async fn dispatch<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut W,
    frame: &Frame,
    command: Command,
) -> io::Result<Response>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let response = match command {
        Command::ListFiles => Response::files(frame.list_files()),
        Command::DeleteFile { name } => match frame.delete_file(&name).await {
            Ok(RemoveOutcome::Removed) => Response::ok().message(format!("Deleted {name}")),
            Ok(RemoveOutcome::Missing) => Response::ok().message("already deleted"),
            Err(err) => {
                warn!(name = %name, error = %err, "control: delete failed");
                Response::error(format!("Failed to delete {name}: {err}"))
            }
        },
        Command::ReceiveFile { name, size } => {
            return receive_file(reader, writer, frame, &name, size).await;
        }
        Command::GetDb { db: Db::Location } => Response::data(
            frame
                .location_entries()
                .into_iter()
                .map(|(file_name, location)| DbEntry::Location {
                    file_name,
                    location,
                })
                .collect(),
        ),
        Command::GetDb { db: Db::History } => Response::data(
            frame
                .history_entries()
                .into_iter()
                .map(|(file_name, last_shown)| DbEntry::History {
                    file_name,
                    last_shown,
                })
                .collect(),
        ),
        Command::ClearDb { db: Db::Location } => {
            frame.clear_locations().await;
            Response::ok().message("Location DB cleared")
        }
        Command::ClearDb { db: Db::History } => {
            frame.clear_history().await;
            Response::ok().message("History DB cleared")
        }
        Command::DeleteAllFiles => match frame.delete_all_files().await {
            Ok(removed) => {
                info!(removed, "control: all photos deleted");
                Response::ok().message("All photos and data deleted")
            }
            Err(err) => {
                warn!(error = %err, "control: delete all failed");
                Response::error(format!("Failed to delete all files: {err}"))
            }
        },
        Command::GetDeviceInfo => match frame.device_info() {
            Some(screen) => Response::device(screen.width, screen.height),
            None => Response::error("display geometry unavailable"),
        },
        Command::StartSync => match frame.start_sync() {
            Ok(()) => Response::ok().message("sync started"),
            Err(err) => Response::error(err.to_string()),
        },
        Command::SyncStatus => Response::sync(frame.sync_status()),
        Command::ClearSyncError => {
            frame.clear_sync_error();
            Response::ok()
        }
        Command::MarkShown { name } => {
            if !frame.store().contains(&name) {
                Response::error(format!("File not found: {name}"))
            } else {
                frame.on_photo_shown(&name).await;
                Response::ok()
            }
        }
    };
    Ok(response)
}

/// Invite the payload, stream it into a hidden partial file, and publish it
/// only once every byte arrived.
async fn receive_file<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut W,
    frame: &Frame,
    name: &str,
    size: u64,
) -> io::Result<Response>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let incoming = frame.store().incoming(name);
    let mut file = match incoming.create_async().await {
        Ok(file) => file,
        Err(err) => {
            warn!(name, error = %err, "control: cannot create incoming file");
            return Ok(Response::error(format!("Cannot store {name}: {err}")));
        }
    };
    write_response(writer, &Response::ready()).await?;

    let received = reader.read_payload(size, &mut file).await;
    drop(file);
    match received {
        Ok(bytes) => match frame.commit_incoming(incoming).await {
            Ok(replaced) => {
                info!(name, bytes, replaced, "control: file received");
                Ok(Response::ok().message("File received"))
            }
            Err(err) => {
                warn!(name, error = %err, "control: failed to publish received file");
                Ok(Response::error(format!("Failed to store {name}: {err}")))
            }
        },
        Err(TransferError::Incomplete { expected, received }) => {
            incoming.discard();
            warn!(name, expected, received, "control: incomplete transfer");
            Ok(Response::error("incomplete transfer"))
        }
        Err(TransferError::Io(err)) => {
            incoming.discard();
            warn!(name, error = %err, "control: transfer failed");
            Ok(Response::error(format!("transfer failed: {err}")))
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = response.to_line()?;
    writer.write_all(&line).await?;
    writer.flush().await
}
