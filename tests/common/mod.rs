//! In-process stand-in for a game server's rcon port.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use frostbite_rcon::packet::{Packet, PacketBuffer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const DEADLINE: Duration = Duration::from_secs(5);

pub fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

pub struct FakeServer {
    listener: TcpListener,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        FakeServer { listener }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("fake server address")
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = tokio::time::timeout(DEADLINE, self.listener.accept())
            .await
            .expect("no client connected")
            .expect("accept failed");
        Peer {
            stream,
            buffer: PacketBuffer::new(),
        }
    }
}

/// The server side of one accepted client connection.
pub struct Peer {
    stream: TcpStream,
    buffer: PacketBuffer,
}

impl Peer {
    pub async fn read_packet(&mut self) -> Packet {
        loop {
            let next = self
                .buffer
                .next_packet()
                .expect("client sent a malformed packet");
            if let Some(packet) = next {
                return packet;
            }

            let mut chunk = [0u8; 1024];
            let n = tokio::time::timeout(DEADLINE, self.stream.read(&mut chunk))
                .await
                .expect("client sent nothing")
                .expect("read from client failed");
            assert!(n > 0, "client closed the connection");
            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Waits for the client to close its side.
    pub async fn read_eof(&mut self) {
        let mut chunk = [0u8; 1024];
        loop {
            let n = tokio::time::timeout(DEADLINE, self.stream.read(&mut chunk))
                .await
                .expect("client never closed")
                .unwrap_or(0);
            if n == 0 {
                return;
            }
        }
    }

    pub async fn send(&mut self, packet: &Packet) {
        self.send_raw(&packet.pack()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to client failed");
    }

    pub async fn respond(&mut self, sequence: u32, list: &[&str]) {
        self.send(&Packet::new(true, true, sequence, words(list))).await;
    }
}

/// Polls `check` until it holds or the deadline passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < DEADLINE {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
