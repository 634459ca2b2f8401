use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    DEFAULT_MAX_FRAME_LEN, Deserialize, FrameErr, LEN_TYPE_SIZE, LenType, Result, msg::Ack,
};

/// The receiving end handle of the communication.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    /// Creates a new `FrameReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            max_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Caps the body size this receiver is willing to buffer.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Waits to receive a whole frame from the inner reader and decodes it.
    ///
    /// The peer closing the stream mid frame yields `FrameErr::Truncated`, it never
    /// returns a partially filled message.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `FrameErr` on failure.
    pub async fn recv<T: Deserialize>(&mut self) -> Result<T> {
        self.read_exactly(LEN_TYPE_SIZE).await?;
        // SAFETY: `read_exactly` filled the buffer with exactly `LEN_TYPE_SIZE` bytes.
        let declared = LenType::from_be_bytes(self.buf.as_slice().try_into().unwrap());

        let len = usize::try_from(declared)
            .ok()
            .filter(|&len| len <= self.max_len)
            .ok_or(FrameErr::TooLarge {
                declared,
                max: self.max_len,
            })?;

        self.read_exactly(len).await?;
        T::deserialize(&self.buf)
    }

    /// Waits for the acknowledgement byte of the peer.
    ///
    /// # Returns
    /// `None` if the peer closed the stream without answering.
    pub async fn recv_ack(&mut self) -> Result<Option<Ack>> {
        let mut byte = [0; 1];
        match self.rx.read(&mut byte).await? {
            0 => Ok(None),
            _ => Ack::from_byte(byte[0]).map(Some),
        }
    }

    /// Replaces the inner buffer contents with exactly `n` bytes from the reader.
    async fn read_exactly(&mut self, n: usize) -> Result<()> {
        self.buf.clear();
        (&mut self.rx)
            .take(n as u64)
            .read_to_end(&mut self.buf)
            .await?;

        if self.buf.len() < n {
            return Err(FrameErr::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }

        Ok(())
    }
}
