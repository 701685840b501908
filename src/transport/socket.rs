use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Local socket server for the worker-facing packet stream. A stale socket
/// file from a previous run is removed before binding.
pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketServer {
    pub fn bind<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(target: "transport", path = %path.display(), "removed stale socket file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    target: "transport",
                    path = %self.path.display(),
                    %err,
                    "failed to remove socket file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_a_local_connection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.sock");

        let server = SocketServer::bind(&path).expect("bind succeeds");
        assert_eq!(server.path(), path.as_path());

        let client = UnixStream::connect(&path);
        let (accepted, connected) = tokio::join!(server.accept(), client);
        accepted.expect("accept succeeds");
        connected.expect("connect succeeds");
    }

    #[tokio::test]
    async fn rebinds_over_a_stale_socket_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.sock");

        // Simulate an unclean shutdown leaving the file behind.
        std::mem::forget(SocketServer::bind(&path).expect("first bind"));
        let server = SocketServer::bind(&path).expect("rebind over stale file");

        let client = UnixStream::connect(&path);
        let (accepted, connected) = tokio::join!(server.accept(), client);
        accepted.expect("accept succeeds");
        connected.expect("connect succeeds");
    }

    #[tokio::test]
    async fn drop_removes_the_socket_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.sock");

        let server = SocketServer::bind(&path).expect("bind succeeds");
        assert!(path.exists());
        drop(server);
        assert!(!path.exists());
    }
}
