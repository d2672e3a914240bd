//! OS duplex channels: unix domain sockets and Windows named pipes.

use std::fmt;
use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream a channel can hand out.
pub(crate) trait ChannelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ChannelStream for T {}

/// Stream produced by [`ChannelListener::accept`] and [`connect`].
pub(crate) type BoxedStream = Box<dyn ChannelStream>;

/// OS-level address of an instance's channel.
///
/// Derived from `(namespace, instance id)`:
/// `<dir>/<namespace>.<instance>.sock` on unix,
/// `\\.\pipe\<namespace>.<instance>` on Windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Derive the channel name for `instance`.
    ///
    /// `socket_dir` only applies to unix sockets and defaults to the OS
    /// temp directory.
    #[cfg(unix)]
    pub fn derive(namespace: &str, instance: &str, socket_dir: Option<&Path>) -> Self {
        let dir = socket_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let path = dir.join(format!("{namespace}.{instance}.sock"));
        Self(path.to_string_lossy().into_owned())
    }

    /// Derive the channel name for `instance`.
    #[cfg(windows)]
    pub fn derive(namespace: &str, instance: &str, _socket_dir: Option<&Path>) -> Self {
        Self(format!(r"\\.\pipe\{namespace}.{instance}"))
    }

    /// The raw OS name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(unix)]
pub(crate) struct ChannelListener {
    inner: tokio::net::UnixListener,
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl ChannelListener {
    /// Bind the channel, replacing a stale socket file left by a dead process.
    ///
    /// Fails with `AddrInUse` if a live listener still answers on the path.
    pub(crate) fn bind(name: &ChannelName) -> io::Result<Self> {
        let path = std::path::PathBuf::from(name.as_str());
        if std::os::unix::net::UnixStream::connect(&path).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("channel {name} is served by a live instance"),
            ));
        }
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("removed stale socket file {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let inner = tokio::net::UnixListener::bind(&path)?;
        Ok(Self { inner, path })
    }

    pub(crate) async fn accept(&mut self) -> io::Result<BoxedStream> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(Box::new(stream))
    }
}

#[cfg(unix)]
impl Drop for ChannelListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
pub(crate) async fn connect(name: &ChannelName) -> io::Result<BoxedStream> {
    let stream = tokio::net::UnixStream::connect(name.as_str()).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
pub(crate) struct ChannelListener {
    name: ChannelName,
    next: tokio::net::windows::named_pipe::NamedPipeServer,
}

#[cfg(windows)]
impl ChannelListener {
    pub(crate) fn bind(name: &ChannelName) -> io::Result<Self> {
        let next = tokio::net::windows::named_pipe::ServerOptions::new()
            .first_pipe_instance(true)
            .create(name.as_str())?;
        Ok(Self {
            name: name.clone(),
            next,
        })
    }

    /// Wait for a client on the pending pipe instance, then create the next
    /// instance so further clients can connect.
    pub(crate) async fn accept(&mut self) -> io::Result<BoxedStream> {
        self.next.connect().await?;
        let fresh =
            tokio::net::windows::named_pipe::ServerOptions::new().create(self.name.as_str())?;
        let connected = std::mem::replace(&mut self.next, fresh);
        Ok(Box::new(connected))
    }
}

#[cfg(windows)]
pub(crate) async fn connect(name: &ChannelName) -> io::Result<BoxedStream> {
    let client = tokio::net::windows::named_pipe::ClientOptions::new().open(name.as_str())?;
    Ok(Box::new(client))
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn test_channel_name_derivation() {
        let dir = Path::new("/run/app");
        let name = ChannelName::derive("orders", "worker-2", Some(dir));
        assert_eq!(name.as_str(), "/run/app/orders.worker-2.sock");
        assert_eq!(name.to_string(), "/run/app/orders.worker-2.sock");
    }

    #[tokio::test]
    async fn test_listener_accepts_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let name = ChannelName::derive("test", "root", Some(dir.path()));

        let mut listener = ChannelListener::bind(&name).expect("bind");
        let client = tokio::spawn({
            let name = name.clone();
            async move {
                let mut stream = connect(&name).await.expect("connect");
                stream.write_all(b"ping").await.expect("write");
            }
        });

        let mut server_side = listener.accept().await.expect("accept");
        let mut buf = [0u8; 4];
        server_side.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");
        client.await.expect("client task");

        drop(listener);
        assert!(!Path::new(name.as_str()).exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let name = ChannelName::derive("test", "root", Some(dir.path()));
        std::fs::write(name.as_str(), b"stale").expect("stale file");

        let _listener = ChannelListener::bind(&name).expect("bind over stale file");
    }

    #[tokio::test]
    async fn test_bind_refuses_a_live_channel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let name = ChannelName::derive("test", "root", Some(dir.path()));
        let _live = ChannelListener::bind(&name).expect("first bind");

        let second = ChannelListener::bind(&name);
        assert!(matches!(second, Err(ref e) if e.kind() == io::ErrorKind::AddrInUse));
        assert!(Path::new(name.as_str()).exists());

        // The live listener still accepts.
        connect(&name).await.expect("connect to live listener");
    }
}
