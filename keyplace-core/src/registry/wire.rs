use crate::{KeyplaceError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// `[u32 big-endian length][payload]`
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(KeyplaceError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut buf = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, accumulating partial reads until the advertised length is
/// satisfied. A stream that ends early is a protocol error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(KeyplaceError::Protocol(
                "stream closed before frame length".to_string(),
            ));
        }
        Err(error) => return Err(error.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(KeyplaceError::Protocol(format!(
            "advertised frame length {} exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let read = reader.read(&mut payload[filled..]).await?;
        if read == 0 {
            return Err(KeyplaceError::Protocol(format!(
                "stream closed after {} of {} payload bytes",
                filled, len
            )));
        }
        filled += read;
    }

    Ok(payload)
}

/// One persistent registry connection with strictly sequential
/// request/response exchanges.
///
/// The stream sits behind a mutex held for the whole exchange, so concurrent
/// callers queue instead of interleaving frames. Any transport or framing
/// failure drops the stream; later calls fail with a connection error.
pub struct WireClient {
    addr: String,
    timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl WireClient {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        if host.trim().is_empty() {
            return Err(KeyplaceError::Connection(
                "registry host can't be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(KeyplaceError::Connection(format!(
                "invalid registry port: {}",
                port
            )));
        }

        let addr = format!("{}:{}", host, port);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                return Err(KeyplaceError::Connection(format!(
                    "failed to connect to registry at {}: {}",
                    addr, error
                )));
            }
            Err(_) => {
                return Err(KeyplaceError::Timeout(format!(
                    "connect to registry at {}",
                    addr
                )));
            }
        };
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to registry at {}", addr);
        Ok(Self {
            addr,
            timeout,
            stream: Mutex::new(Some(stream)),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn send(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(|| {
            KeyplaceError::Connection(format!("registry connection to {} is closed", self.addr))
        })?;

        let exchange = async {
            write_frame(stream, payload).await?;
            read_frame(stream).await
        };

        let outcome = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(KeyplaceError::Timeout(format!(
                "registry request to {}",
                self.addr
            ))),
        };

        if let Err(error) = &outcome {
            // The stream position is unknown now; never reuse it.
            tracing::warn!("Dropping registry connection to {}: {}", self.addr, error);
            *guard = None;
        }

        outcome
    }

    pub async fn close(&self) -> Result<()> {
        let stream = self.stream.lock().await.take();
        if let Some(mut stream) = stream {
            stream.shutdown().await?;
            tracing::debug!("Closed registry connection to {}", self.addr);
        }
        Ok(())
    }
}
