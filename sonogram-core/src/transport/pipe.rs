//! Named-pipe variant: line-framed protocol over a local IPC endpoint.
//!
//! Unix domain socket on Unix, named pipe (`\\.\pipe\...`) on Windows.

use std::path::Path;

use tracing::info;

use super::lines::line_channel;
use super::Channel;
use crate::error::{Result, SonogramError};

#[cfg(unix)]
pub async fn connect(path: &Path) -> Result<Channel> {
    info!(path = %path.display(), "opening unix socket");
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| connect_error(path, e))?;
    Ok(line_channel(path.display().to_string(), stream))
}

#[cfg(windows)]
pub async fn connect(path: &Path) -> Result<Channel> {
    use tokio::net::windows::named_pipe::ClientOptions;

    info!(path = %path.display(), "opening named pipe");
    let client = ClientOptions::new()
        .open(path)
        .map_err(|e| connect_error(path, e))?;
    Ok(line_channel(path.display().to_string(), client))
}

fn connect_error(path: &Path, e: std::io::Error) -> SonogramError {
    SonogramError::Connect {
        endpoint: path.display().to_string(),
        reason: e.to_string(),
    }
}
