use std::{net::SocketAddr, time::Duration};

use comms::{ParameterSet, Signature, msg::Submit};
use node::{SubmitErr, SubordinateListener};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time,
};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

fn params(value: f32) -> ParameterSet {
    let signature = Signature::new(vec![vec![2, 2], vec![1]]);
    ParameterSet::filled(&signature, value)
}

async fn child(parent: SocketAddr, value: f32, weight: Option<u64>) {
    let msg = Submit {
        weight,
        params: params(value),
    };

    node::submit(parent, &msg, SUBMIT_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn collects_every_child() {
    let mut listener = SubordinateListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr();

    let children = tokio::spawn(async move {
        tokio::join!(child(addr, 1.0, Some(10)), child(addr, 2.0, None));
    });

    let collection = listener.collect(2, Duration::from_secs(5)).await.unwrap();
    children.await.unwrap();

    assert_eq!(collection.received.len(), 2);
    assert!(collection.failures.is_empty());

    let mut weights: Vec<_> = collection.received.iter().map(|s| s.weight).collect();
    weights.sort();
    assert_eq!(weights, vec![None, Some(10)]);
}

#[tokio::test]
async fn listener_is_reused_across_rounds() {
    let mut listener = SubordinateListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr();

    for round in 0..3 {
        let value = round as f32;
        let submitted = tokio::spawn(child(addr, value, Some(1)));

        let collection = listener.collect(1, Duration::from_secs(5)).await.unwrap();
        submitted.await.unwrap();

        assert_eq!(collection.received[0].params, params(value));
    }
}

#[tokio::test]
async fn timeout_returns_partial_results() {
    let mut listener = SubordinateListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr();

    let submitted = tokio::spawn(child(addr, 3.0, Some(7)));

    let err = listener
        .collect(2, Duration::from_millis(300))
        .await
        .unwrap_err();
    submitted.await.unwrap();

    assert_eq!(err.expected, 2);
    assert_eq!(err.missing(), 1);
    assert_eq!(err.received.len(), 1);
    assert_eq!(err.received[0].weight, Some(7));
}

#[tokio::test]
async fn zero_children_returns_immediately() {
    let mut listener = SubordinateListener::bind("127.0.0.1:0").await.unwrap();

    let collection = time::timeout(
        Duration::from_millis(100),
        listener.collect(0, Duration::from_secs(60)),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(collection.received.is_empty());
}

#[tokio::test]
async fn malformed_frame_is_isolated() {
    let mut listener = SubordinateListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr();

    let collecting =
        tokio::spawn(async move { listener.collect(1, Duration::from_secs(5)).await });

    // A submission whose weight flag is neither 0 nor 1.
    let mut bad = TcpStream::connect(addr).await.unwrap();
    bad.write_all(&2u64.to_be_bytes()).await.unwrap();
    bad.write_all(&[7, 0]).await.unwrap();
    assert_eq!(bad.read_u8().await.unwrap(), 0x01);

    child(addr, 4.0, Some(3)).await;

    let collection = collecting.await.unwrap().unwrap();

    assert_eq!(collection.received.len(), 1);
    assert_eq!(collection.received[0].params, params(4.0));
    assert_eq!(collection.failures.len(), 1);
    assert!(collection.failures[0].reason.is_malformed());
}

#[tokio::test]
async fn stalled_child_frees_its_slot() {
    let listener = SubordinateListener::bind("127.0.0.1:0").await.unwrap();
    let mut listener = listener.with_read_timeout(Duration::from_millis(200));
    let addr = listener.local_addr();

    let collecting =
        tokio::spawn(async move { listener.collect(1, Duration::from_secs(5)).await });

    // Connects and sends half a length prefix, then goes silent.
    let mut stalled = TcpStream::connect(addr).await.unwrap();
    stalled.write_all(&[0, 0, 0, 0]).await.unwrap();

    child(addr, 5.0, None).await;

    let collection = collecting.await.unwrap().unwrap();
    assert_eq!(collection.received[0].params, params(5.0));
}

#[tokio::test]
async fn stalled_child_does_not_delay_other_reads() {
    let listener = SubordinateListener::bind("127.0.0.1:0").await.unwrap();
    let mut listener = listener.with_read_timeout(Duration::from_secs(30));
    let addr = listener.local_addr();

    let collecting =
        tokio::spawn(async move { listener.collect(2, Duration::from_secs(2)).await });

    let mut stalled = TcpStream::connect(addr).await.unwrap();
    stalled.write_all(&[0, 0, 0, 0]).await.unwrap();

    // The ack only comes back once the parent has read the whole frame.
    time::timeout(Duration::from_millis(1_000), child(addr, 6.0, Some(2)))
        .await
        .expect("the second child waited on the stalled one");

    let err = collecting.await.unwrap().unwrap_err();

    assert_eq!(err.received.len(), 1);
    assert_eq!(err.received[0].params, params(6.0));
    drop(stalled);
}

#[tokio::test]
async fn bind_conflict_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let err = SubordinateListener::bind(addr.as_str()).await.err().unwrap();

    assert_eq!(err.addr, addr);
    assert_eq!(err.source.kind(), std::io::ErrorKind::AddrInUse);
}

#[tokio::test]
async fn submit_reports_rejection() {
    let parent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = parent.local_addr().unwrap();

    let rejecting = tokio::spawn(async move {
        let (mut stream, _) = parent.accept().await.unwrap();
        let len = stream.read_u64().await.unwrap();
        let mut body = vec![0; len as usize];
        stream.read_exact(&mut body).await.unwrap();
        stream.write_u8(0x01).await.unwrap();
    });

    let msg = Submit {
        weight: None,
        params: params(1.0),
    };
    let err = node::submit(addr, &msg, SUBMIT_TIMEOUT).await.unwrap_err();
    rejecting.await.unwrap();

    assert!(matches!(err, SubmitErr::Rejected { parent } if parent == addr));
}

#[tokio::test]
async fn submit_reports_missing_ack() {
    let parent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = parent.local_addr().unwrap();

    let closing = tokio::spawn(async move {
        let (mut stream, _) = parent.accept().await.unwrap();
        let len = stream.read_u64().await.unwrap();
        let mut body = vec![0; len as usize];
        stream.read_exact(&mut body).await.unwrap();
    });

    let msg = Submit {
        weight: Some(1),
        params: params(1.0),
    };
    let err = node::submit(addr, &msg, SUBMIT_TIMEOUT).await.unwrap_err();
    closing.await.unwrap();

    assert!(matches!(err, SubmitErr::NoAck { .. }));
}
