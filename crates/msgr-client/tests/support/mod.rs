//! Scripted-server helpers shared by the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use msgr_client::{ClientConfig, StaticAuthenticator};

/// The ticket the test authenticator hands out.
pub const TEST_TICKET: &str = "t=T&p=P";

/// A line-oriented view of one accepted server-side connection.
pub struct Wire {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Wire {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    /// Reads one CRLF-terminated line, excluding the terminator.
    pub async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self
                .buf
                .windows(2)
                .position(|w| w == b"\r\n")
            {
                let line = self.buf[..pos].to_vec();
                self.buf.drain(..pos + 2);
                return String::from_utf8(line).expect("client sent non-UTF-8 line");
            }
            let mut page = [0u8; 1024];
            let n = self.stream.read(&mut page).await.expect("server read");
            assert!(n > 0, "client closed the connection mid-script");
            self.buf.extend_from_slice(&page[..n]);
        }
    }

    /// Reads exactly `n` payload bytes.
    pub async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        while self.buf.len() < n {
            let mut page = [0u8; 1024];
            let read = self.stream.read(&mut page).await.expect("server read");
            assert!(read > 0, "client closed the connection mid-payload");
            self.buf.extend_from_slice(&page[..read]);
        }
        let out = self.buf[..n].to_vec();
        self.buf.drain(..n);
        out
    }

    /// Reads a line and asserts its prefix.
    pub async fn expect(&mut self, prefix: &str) -> String {
        let line = self.read_line().await;
        assert!(
            line.starts_with(prefix),
            "expected a line starting with {prefix:?}, got {line:?}"
        );
        line
    }

    /// Writes one line, appending CRLF.
    pub async fn send(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("server write");
    }

    /// Writes raw bytes (payloads).
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("server write");
    }
}

/// Returns the n-th space-separated token of a line.
pub fn field(line: &str, index: usize) -> &str {
    line.split(' ').nth(index).expect("missing field")
}

/// A client config pointed at a scripted server, with the static
/// authenticator and short timeouts.
pub fn test_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new()
        .with_dispatch_server(addr.to_string())
        .with_reply_timeout(Duration::from_secs(5))
        .with_login_timeout(Duration::from_secs(10))
        .with_authenticator(Arc::new(StaticAuthenticator::new(TEST_TICKET)))
}

/// Drives the whole login handshake on an accepted NS connection, serving
/// `contacts` LST entries and `groups` LSG entries, then echoes the initial
/// CHG. Panics on any deviation.
pub async fn serve_login(wire: &mut Wire, login: &str, contacts: u32, groups: u32) {
    let line = wire.expect("VER ").await;
    assert!(line.ends_with("MSNP12"), "unexpected VER: {line:?}");
    wire.send(&format!("VER {} MSNP12", field(&line, 1))).await;

    let line = wire.expect("CVR ").await;
    wire.send(&format!(
        "CVR {} 8.1.0178 8.1.0178 1.0.0000 http://example.invalid http://example.invalid",
        field(&line, 1)
    ))
    .await;

    let line = wire.expect("USR ").await;
    assert_eq!(field(&line, 2), "TWN");
    assert_eq!(field(&line, 3), "I");
    assert_eq!(field(&line, 4), login);
    wire.send(&format!("USR {} TWN S ct=1,rver=1,id=507", field(&line, 1)))
        .await;

    let line = wire.expect("USR ").await;
    assert_eq!(field(&line, 3), "S");
    assert_eq!(field(&line, 4), TEST_TICKET);
    wire.send(&format!("USR {} OK {} 1 0", field(&line, 1), login))
        .await;

    let line = wire.expect("SYN ").await;
    let trid = field(&line, 1).to_string();
    wire.send(&format!(
        "SYN {trid} 2006-01-01T00:00:00.0000000-00:00 2006-01-01T00:00:00.0000000-00:00 {contacts} {groups}"
    ))
    .await;
    wire.send("GTC A").await;
    wire.send("BLP AL").await;
    wire.send("PRP MFN My%20Name").await;
    for g in 0..groups {
        wire.send(&format!("LSG Group%20{g} g-{g}")).await;
    }
    // Bits 11 = forward + allow + reverse.
    for i in 0..contacts {
        let group = if groups > 0 { " g-0" } else { "" };
        wire.send(&format!("LST N=c{i}@x.y F=C{i} C=guid-{i} 11{group}"))
            .await;
    }

    let line = wire.expect("CHG ").await;
    wire.send(&line).await;
}
