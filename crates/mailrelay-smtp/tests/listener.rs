//! Listener tests over real TCP sockets.

#![allow(clippy::unwrap_used)]

use mailrelay_smtp::Listener;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn expect_reply(reader: &mut BufReader<TcpStream>, code: &str) -> String {
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with(code), "expected {code}, got {line:?}");
        if line.as_bytes().get(3) == Some(&b' ') {
            return line;
        }
    }
}

async fn command(reader: &mut BufReader<TcpStream>, line: &str, code: &str) -> String {
    reader.get_mut().write_all(line.as_bytes()).await.unwrap();
    expect_reply(reader, code).await
}

#[tokio::test]
async fn test_message_reaches_queue() {
    let listener = Listener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .with_hostname("relay.test");
    let addr = listener.local_addr().unwrap();
    let (queue, mut inbox) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(listener.run(queue, shutdown.clone()));

    let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let greeting = expect_reply(&mut client, "220").await;
    assert!(greeting.contains("relay.test"));

    command(&mut client, "EHLO client.test\r\n", "250").await;
    command(&mut client, "MAIL FROM:<alice@example.com>\r\n", "250").await;
    command(&mut client, "RCPT TO:<bob@example.com>\r\n", "250").await;
    command(&mut client, "RCPT TO:<carol@example.com>\r\n", "250").await;
    command(&mut client, "DATA\r\n", "354").await;
    let queued = command(
        &mut client,
        "Subject: Hello\r\nTo: bob@example.com\r\n\r\nHi Bob\r\n.\r\n",
        "250",
    )
    .await;
    assert!(queued.contains("queued"));
    command(&mut client, "QUIT\r\n", "221").await;

    let envelope = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.rcpt_to.len(), 2);
    assert_eq!(
        envelope.data,
        b"Subject: Hello\r\nTo: bob@example.com\r\n\r\nHi Bob\r\n"
    );

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let listener = Listener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (queue, _inbox) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(listener.run(queue, shutdown.clone()));

    let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
    expect_reply(&mut client, "220").await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let mut line = String::new();
    let read = client.read_line(&mut line).await.unwrap_or(0);
    assert_eq!(read, 0);
}
