mod codec;
mod error;
pub mod msg;
mod params;
mod receiver;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{Deserialize, Reader, Serialize, decode, decode_frame, encode, encode_frame};
pub use error::{FrameErr, Result};
pub use params::{ParameterSet, Signature, Tensor};
pub use receiver::FrameReceiver;
pub use sender::FrameSender;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest frame a receiver accepts unless told otherwise, 256 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Creates both `FrameReceiver` and `FrameSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a frame receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
