use std::{io, net::SocketAddr, time::Duration};

use comms::{DEFAULT_MAX_FRAME_LEN, FrameErr, ParameterSet, msg::Ack, msg::Submit};
use log::{debug, info, warn};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    task::JoinSet,
    time::{self, Instant},
};

use crate::error::{BindErr, IncompleteErr};

/// The parameters one subordinate submitted during a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub addr: SocketAddr,
    pub weight: Option<u64>,
    pub params: ParameterSet,
}

/// A connection that didn't produce a valid submission.
#[derive(Debug)]
pub struct SubmissionFailure {
    pub addr: SocketAddr,
    pub reason: FrameErr,
}

/// The outcome of a complete collection.
#[derive(Debug, Default)]
pub struct Collection {
    /// Submissions in the order they finished arriving.
    pub received: Vec<Submission>,
    pub failures: Vec<SubmissionFailure>,
}

type Served = (SocketAddr, Result<Submit, FrameErr>);

// Pause after a failed accept so a persistent error doesn't busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Listens for subordinate nodes and gathers one submission per connection.
///
/// The socket is bound once and reused for every round.
pub struct SubordinateListener {
    listener: TcpListener,
    addr: SocketAddr,
    read_timeout: Duration,
    max_frame_len: usize,
}

impl SubordinateListener {
    /// The default bound on a single connection's read.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Binds a new `SubordinateListener`.
    ///
    /// # Arguments
    /// * `addr` - The address to listen at.
    ///
    /// # Errors
    /// `BindErr` naming `addr` if the socket can't be bound. It's never retried.
    pub async fn bind<A>(addr: A) -> Result<Self, BindErr>
    where
        A: ToSocketAddrs + ToString,
    {
        let bind_err = |source: io::Error| BindErr {
            addr: addr.to_string(),
            source,
        };

        let listener = TcpListener::bind(&addr).await.map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;
        info!("listening for subordinates at {local}");

        Ok(Self {
            listener,
            addr: local,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    /// Bounds how long a single accepted connection may take to deliver its frame.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Caps the frame size accepted from subordinates.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Collects exactly `num_children` submissions or fails once `timeout` elapses.
    ///
    /// Every accepted connection is read in its own task so a slow subordinate never
    /// holds back the others. A connection that sends a malformed frame, stalls past the
    /// read timeout or drops is recorded as a failure and its slot is offered again.
    ///
    /// # Arguments
    /// * `num_children` - The amount of submissions to wait for.
    /// * `timeout` - The time budget for the whole collection.
    ///
    /// # Returns
    /// The submissions in arrival order and the failed connections.
    ///
    /// # Errors
    /// `IncompleteErr` carrying the partial submissions if the deadline passes first.
    pub async fn collect(
        &mut self,
        num_children: usize,
        timeout: Duration,
    ) -> Result<Collection, IncompleteErr> {
        let deadline = Instant::now() + timeout;
        let mut collection = Collection::default();
        let mut tasks = JoinSet::new();

        let expired = time::sleep_until(deadline);
        tokio::pin!(expired);

        while collection.received.len() < num_children {
            let accepting = collection.received.len() + tasks.len() < num_children;

            tokio::select! {
                _ = &mut expired => break,

                accepted = self.listener.accept(), if accepting => match accepted {
                    Ok((stream, addr)) => {
                        debug!("subordinate connected from {addr}");
                        let read_deadline = deadline.min(Instant::now() + self.read_timeout);
                        tasks.spawn(serve(stream, addr, read_deadline, self.max_frame_len));
                    }
                    Err(e) => {
                        warn!("failed to accept a subordinate connection: {e}");
                        time::sleep(ACCEPT_BACKOFF).await;
                    }
                },

                Some(joined) = tasks.join_next() => match joined {
                    Ok((addr, Ok(Submit { weight, params }))) => {
                        let arrived = collection.received.len() + 1;
                        info!(arrived = arrived, expected = num_children; "received parameters from {addr}");
                        collection.received.push(Submission { addr, weight, params });
                    }
                    Ok((addr, Err(reason))) => {
                        warn!("discarding submission from {addr}: {reason}");
                        collection.failures.push(SubmissionFailure { addr, reason });
                    }
                    Err(e) => warn!("subordinate connection task failed: {e}"),
                },
            }
        }

        // Dropping `tasks` aborts any read still in flight.
        if collection.received.len() < num_children {
            return Err(IncompleteErr {
                expected: num_children,
                received: collection.received,
                failures: collection.failures,
            });
        }

        Ok(collection)
    }
}

/// Reads a single submission from `stream` and acknowledges it.
async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    deadline: Instant,
    max_frame_len: usize,
) -> Served {
    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = comms::channel(rx, tx);
    let mut rx = rx.with_max_len(max_frame_len);

    let res = match time::timeout_at(deadline, rx.recv::<Submit>()).await {
        Ok(res) => res,
        Err(_) => Err(FrameErr::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "the subordinate didn't send a complete frame in time",
        ))),
    };

    let ack = match res {
        Ok(_) => Ack::Accepted,
        Err(_) => Ack::Rejected,
    };

    if let Err(e) = tx.send_ack(ack).await {
        debug!("failed to acknowledge {addr}: {e}");
    }

    let _ = tx.shutdown().await;
    (addr, res)
}
