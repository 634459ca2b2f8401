//! The subordinate side of the collection protocol.

use std::time::Duration;

use comms::msg::{Ack, Submit};
use log::debug;
use tokio::{
    net::{TcpStream, ToSocketAddrs},
    time,
};

use crate::error::SubmitErr;

/// Hands `msg` to the parent listening at `parent` and waits for its acknowledgement.
///
/// # Arguments
/// * `parent` - The address of the parent's subordinate listener.
/// * `msg` - This node's parameters and sample count.
/// * `timeout` - The bound on the whole exchange.
///
/// # Errors
/// A `SubmitErr` if the connection fails, the parent rejects the frame, closes without
/// answering or the exchange doesn't finish within `timeout`.
pub async fn submit<A: ToSocketAddrs>(
    parent: A,
    msg: &Submit,
    timeout: Duration,
) -> Result<(), SubmitErr> {
    time::timeout(timeout, exchange(parent, msg))
        .await
        .map_err(|_| SubmitErr::Timeout)?
}

async fn exchange<A: ToSocketAddrs>(parent: A, msg: &Submit) -> Result<(), SubmitErr> {
    let stream = TcpStream::connect(parent).await?;
    let parent = stream.peer_addr()?;

    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    tx.send(msg).await?;
    debug!("submitted {} parameters to {parent}", msg.params.num_params());

    match rx.recv_ack().await? {
        Some(Ack::Accepted) => Ok(()),
        Some(Ack::Rejected) => Err(SubmitErr::Rejected { parent }),
        None => Err(SubmitErr::NoAck { parent }),
    }
}
