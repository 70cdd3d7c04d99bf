pub mod bridge;
pub mod event;
pub mod msg;
pub mod relay;

mod frame;

use tokio::io::{AsyncRead, AsyncWrite};

pub use frame::{FrameReceiver, FrameSender};
pub use relay::RelayHandle;

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Frames larger than this are rejected as corrupt.
const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Creates both `FrameReceiver` and `FrameSender` channel parts.
///
/// Given a reader and writer returns both ends of a length-prefixed
/// frame stream.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
