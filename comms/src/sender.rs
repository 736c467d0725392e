use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize};

/// Writes length prefixed frames, a message's zero copy tail goes straight to the writer.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Frames `msg` and writes it out.
    ///
    /// # Returns
    /// `InvalidInput` if the frame would exceed `MAX_FRAME_LEN`, the peer would reject it anyway.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let tail = msg.serialize(buf);
        let frame_len = buf.len() - LEN_TYPE_SIZE + tail.map_or(0, <[u8]>::len);

        if frame_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {frame_len} bytes exceeds the limit of {MAX_FRAME_LEN}"),
            ));
        }

        buf[..LEN_TYPE_SIZE].copy_from_slice(&(frame_len as LenType).to_be_bytes());
        tx.write_all(buf).await?;

        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }
}
