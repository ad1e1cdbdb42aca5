use std::io::{self, Write};
use std::net::ToSocketAddrs;
use std::str::FromStr;
use std::time::Duration;

use config_model::SyncConfig;
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tracing::{debug, warn};

use super::{RemoteConnector, RemoteDirectory, RemoteEntry};
use crate::error::SyncError;

/// Plain FTP in passive binary mode.
///
/// Connecting and every read on the control and data connections are bounded
/// by `sync.timeout`, so a stalled server fails the run instead of hanging it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpConnector;

impl RemoteConnector for FtpConnector {
    fn connect(&self, config: &SyncConfig) -> Result<Box<dyn RemoteDirectory>, SyncError> {
        let address = config.address();
        let mut stream = open_stream(&address, config)?;
        let (user, password) = config.credentials();
        if let Err(err) = stream.login(user, password) {
            let _ = stream.quit();
            return Err(SyncError::Login(err.to_string()));
        }
        stream.set_mode(Mode::Passive);
        let mut session = FtpDirectory {
            stream,
            timeout: config.timeout,
        };
        if let Err(err) = session.prepare(config) {
            session.close();
            return Err(err);
        }
        debug!(address = %address, user, "ftp: session ready");
        Ok(Box::new(session))
    }
}

fn open_stream(address: &str, config: &SyncConfig) -> Result<FtpStream, SyncError> {
    let failed = |detail: String| SyncError::Connect {
        address: address.to_string(),
        detail,
    };
    let mut last_error = None;
    for addr in address.to_socket_addrs().map_err(|err| failed(err.to_string()))? {
        match FtpStream::connect_timeout(addr, config.timeout) {
            Ok(stream) => {
                let control = stream.get_ref();
                control
                    .set_read_timeout(Some(config.timeout))
                    .and_then(|()| control.set_write_timeout(Some(config.timeout)))
                    .map_err(|err| failed(err.to_string()))?;
                return Ok(stream);
            }
            Err(err) => {
                debug!(%addr, error = %err, "ftp: connect attempt failed");
                last_error = Some(err.to_string());
            }
        }
    }
    Err(failed(
        last_error.unwrap_or_else(|| "no address resolved".to_string()),
    ))
}

struct FtpDirectory {
    stream: FtpStream,
    timeout: Duration,
}

impl FtpDirectory {
    fn prepare(&mut self, config: &SyncConfig) -> Result<(), SyncError> {
        self.stream
            .transfer_type(FileType::Binary)
            .map_err(|err| SyncError::Login(format!("binary mode rejected: {err}")))?;
        if let Some(dir) = config.remote_dir() {
            self.stream
                .cwd(dir)
                .map_err(|err| SyncError::Listing(format!("cannot enter {dir}: {err}")))?;
        }
        Ok(())
    }
}

impl RemoteDirectory for FtpDirectory {
    fn list(&mut self) -> Result<Vec<RemoteEntry>, SyncError> {
        let lines = self
            .stream
            .list(None)
            .map_err(|err| SyncError::Listing(err.to_string()))?;
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            match suppaftp::list::File::from_str(&line) {
                Ok(file) if file.is_file() => entries.push(RemoteEntry {
                    name: file.name().to_string(),
                    size_bytes: file.size() as u64,
                }),
                Ok(_) => {}
                Err(err) => debug!(line = %line, error = %err, "ftp: unparsed LIST line"),
            }
        }
        Ok(entries)
    }

    fn download(&mut self, name: &str, out: &mut dyn Write) -> Result<u64, SyncError> {
        let transfer = |detail: String| SyncError::Transfer {
            name: name.to_string(),
            detail,
        };
        let mut data = self
            .stream
            .retr_as_stream(name)
            .map_err(|err| transfer(err.to_string()))?;
        if let Err(err) = data.get_ref().set_read_timeout(Some(self.timeout)) {
            debug!(name, error = %err, "ftp: could not bound data reads");
        }
        let copied = io::copy(&mut data, out);
        let finalized = self.stream.finalize_retr_stream(data);
        let written = copied.map_err(|err| transfer(err.to_string()))?;
        finalized.map_err(|err| transfer(err.to_string()))?;
        Ok(written)
    }

    fn close(&mut self) {
        if let Err(err) = self.stream.quit() {
            warn!(error = %err, "ftp: logout failed");
        }
    }
}
