use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    /// Waits to receive a new message, using the receiver's own buffer.
    ///
    /// The returned `T` borrows the receiver until it's dropped.
    pub async fn recv<'s, T: Deserialize<'s>>(&'s mut self) -> io::Result<T> {
        let Self { rx, buf } = self;
        read_frame(rx, buf).await?;
        T::deserialize(buf)
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// # Arguments
    /// * `buf` - The buffer to use for deserialization, the returned
    ///           `T`'s lifetimes will be tied to this buffer.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    pub async fn recv_into<'buf, T>(&mut self, buf: &'buf mut Vec<u8>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
    {
        read_frame(&mut self.rx, buf).await?;
        T::deserialize(buf)
    }
}

/// Reads one length prefixed frame into `buf`, replacing its contents.
async fn read_frame<R: AsyncRead + Unpin>(rx: &mut R, buf: &mut Vec<u8>) -> io::Result<()> {
    let mut size_buf = [0; LEN_TYPE_SIZE];
    rx.read_exact(&mut size_buf).await?;
    let len = LenType::from_be_bytes(size_buf);

    if len > MAX_FRAME_LEN as LenType {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the limit of {MAX_FRAME_LEN}"),
        ));
    }

    buf.clear();
    buf.resize(len as usize, 0);
    rx.read_exact(buf).await?;
    Ok(())
}
