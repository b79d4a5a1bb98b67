//! Line framing over an async byte stream.
//!
//! The wire alternates CRLF-terminated ASCII header lines with raw payload
//! runs of a length declared in the preceding header. [`LineFramer`] owns a
//! growable buffer filled in small pages and exposes exactly those two read
//! shapes; [`CommandReader`] and [`CommandWriter`] sit on top of it and the
//! command codec.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::command::{Command, Decoded};
use crate::error::{ProtocolError, ProtocolResult};
use crate::{MAX_LINE_LENGTH, MAX_PAYLOAD_SIZE, READ_CHUNK};

/// Reads CRLF-terminated lines and exact-length byte runs from a stream.
///
/// Invariant: after a line or payload is consumed, the buffer holds exactly
/// the unread tail, starting at index zero.
pub struct LineFramer<R> {
    inner: R,
    buf: Vec<u8>,
    /// Bytes already scanned for a CRLF, to avoid rescanning on refill.
    scanned: usize,
}

impl<R> LineFramer<R> {
    /// Creates a framer over the given stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
        }
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwraps this framer, returning the underlying stream. Any buffered
    /// bytes are discarded.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    /// Reads the next line, excluding the CRLF, decoded as UTF-8.
    ///
    /// Returns `Ok(None)` on a clean EOF (stream ended between frames).
    /// EOF in the middle of a line is [`ProtocolError::Transport`].
    pub async fn read_line(&mut self) -> ProtocolResult<Option<String>> {
        loop {
            // A trailing \r is not a terminator until the next byte shows
            // up, so the scan stops one short of the buffer end and the
            // boundary byte is rescanned after a refill.
            if let Some(pos) = find_crlf(&self.buf, self.scanned.saturating_sub(1)) {
                let line = self.buf[..pos].to_vec();
                self.buf.drain(..pos + 2);
                self.scanned = 0;
                let line = String::from_utf8(line).map_err(|_| ProtocolError::LineEncoding)?;
                trace!(line = %line, "<<");
                return Ok(Some(line));
            }
            self.scanned = self.buf.len();

            if self.buf.len() > MAX_LINE_LENGTH {
                return Err(ProtocolError::LineTooLong {
                    max: MAX_LINE_LENGTH,
                });
            }

            if self.fill().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Transport);
            }
        }
    }

    /// Reads exactly `n` bytes.
    ///
    /// EOF before `n` bytes arrive is [`ProtocolError::Transport`].
    pub async fn read_exact(&mut self, n: usize) -> ProtocolResult<Vec<u8>> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(ProtocolError::Transport);
            }
        }
        let out = self.buf[..n].to_vec();
        self.buf.drain(..n);
        self.scanned = 0;
        Ok(out)
    }

    /// Appends up to one page from the transport. Returns the byte count;
    /// zero means EOF.
    async fn fill(&mut self) -> ProtocolResult<usize> {
        let mut page = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut page).await?;
        self.buf.extend_from_slice(&page[..n]);
        Ok(n)
    }
}

/// Finds the offset of `\r\n` in `buf`, scanning from `from`.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    (from..buf.len() - 1).find(|&i| buf[i] == b'\r' && buf[i + 1] == b'\n')
}

/// A lazy producer of inbound commands.
///
/// Exactly one reader drives each connection's receive side. Unknown
/// identifiers come back as [`Command::Unknown`] so the caller can log and
/// skip them without losing stream position.
pub struct CommandReader<R> {
    framer: LineFramer<R>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    /// Creates a reader over the given stream.
    pub fn new(inner: R) -> Self {
        Self {
            framer: LineFramer::new(inner),
        }
    }

    /// Reads the next command, payload included.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    pub async fn next(&mut self) -> ProtocolResult<Option<Command>> {
        let Some(line) = self.framer.read_line().await? else {
            return Ok(None);
        };

        match Command::decode(&line)? {
            Decoded::Complete(cmd) => Ok(Some(cmd)),
            Decoded::NeedsPayload(partial) => {
                let len = partial.payload_len();
                if len > MAX_PAYLOAD_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: len,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                let payload = self.framer.read_exact(len).await?;
                Ok(Some(partial.into_command(payload)))
            }
        }
    }
}

/// Serializes commands to a stream, one complete frame per call.
///
/// Callers are responsible for mutual exclusion; a frame must never be
/// interleaved with another writer's bytes.
pub struct CommandWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> CommandWriter<W> {
    /// Creates a writer over the given stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one command (header line plus payload) and flushes.
    pub async fn send(&mut self, command: &Command) -> ProtocolResult<()> {
        let frame = command.encode();
        trace!(verb = %command.verb(), bytes = frame.len(), ">>");
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts down the underlying stream.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgr_core::Presence;
    use std::io::Cursor;

    #[tokio::test]
    async fn read_single_line() {
        let mut framer = LineFramer::new(Cursor::new(b"VER 1 MSNP12\r\n".to_vec()));
        assert_eq!(framer.read_line().await.unwrap().unwrap(), "VER 1 MSNP12");
        assert!(framer.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_multiple_lines_then_payload() {
        let mut wire = Vec::new();
        wire.extend_from_slice(b"QNG 50\r\nMSG r@x.y R 3\r\nhey");
        let mut framer = LineFramer::new(Cursor::new(wire));

        assert_eq!(framer.read_line().await.unwrap().unwrap(), "QNG 50");
        assert_eq!(framer.read_line().await.unwrap().unwrap(), "MSG r@x.y R 3");
        assert_eq!(framer.read_exact(3).await.unwrap(), b"hey");
    }

    #[tokio::test]
    async fn crlf_split_across_reads() {
        // Feed the line in fragments, splitting between \r and \n.
        let (client, mut server) = tokio::io::duplex(16);
        let mut framer = LineFramer::new(client);

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(b"CHG 6 NLN 0\r").await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"\nPNG\r\n").await.unwrap();
        });

        assert_eq!(framer.read_line().await.unwrap().unwrap(), "CHG 6 NLN 0");
        assert_eq!(framer.read_line().await.unwrap().unwrap(), "PNG");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn bare_cr_inside_line_is_kept() {
        let mut framer = LineFramer::new(Cursor::new(b"AB\rCD\r\n".to_vec()));
        assert_eq!(framer.read_line().await.unwrap().unwrap(), "AB\rCD");
    }

    #[tokio::test]
    async fn eof_mid_line_is_transport_error() {
        let mut framer = LineFramer::new(Cursor::new(b"VER 1 MSN".to_vec()));
        assert!(matches!(
            framer.read_line().await,
            Err(ProtocolError::Transport)
        ));
    }

    #[tokio::test]
    async fn eof_mid_payload_is_transport_error() {
        let mut framer = LineFramer::new(Cursor::new(b"ab".to_vec()));
        assert!(matches!(
            framer.read_exact(5).await,
            Err(ProtocolError::Transport)
        ));
    }

    #[tokio::test]
    async fn buffer_starts_at_unread_byte_after_line() {
        // Both frames arrive in one page; the second must survive the first
        // line's consumption intact.
        let mut framer = LineFramer::new(Cursor::new(b"OUT OTH\r\nQNG 42\r\n".to_vec()));
        assert_eq!(framer.read_line().await.unwrap().unwrap(), "OUT OTH");
        assert_eq!(framer.read_line().await.unwrap().unwrap(), "QNG 42");
    }

    #[tokio::test]
    async fn reader_decodes_command_stream() {
        let mut wire = Vec::new();
        wire.extend_from_slice(b"VER 1 MSNP12\r\n");
        wire.extend_from_slice(b"MSG r@x.y R%20Nick 3\r\nhey");
        let mut reader = CommandReader::new(Cursor::new(wire));

        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            Command::Ver {
                trid: 1,
                dialects: vec!["MSNP12".into()]
            }
        );
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            Command::MsgReceive {
                sender: "r@x.y".into(),
                nickname: "R Nick".into(),
                payload: b"hey".to_vec(),
            }
        );
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_surfaces_unknown_commands() {
        let mut reader = CommandReader::new(Cursor::new(b"WHO 1 x\r\nPNG\r\n".to_vec()));
        let first = reader.next().await.unwrap().unwrap();
        assert!(matches!(first, Command::Unknown { .. }));
        assert_eq!(reader.next().await.unwrap().unwrap(), Command::Png);
    }

    #[tokio::test]
    async fn reader_rejects_oversized_payload() {
        let line = format!("NOT {}\r\n", MAX_PAYLOAD_SIZE + 1);
        let mut reader = CommandReader::new(Cursor::new(line.into_bytes()));
        assert!(matches!(
            reader.next().await,
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn writer_emits_contiguous_frames() {
        let mut out = Vec::new();
        {
            let mut writer = CommandWriter::new(Cursor::new(&mut out));
            writer
                .send(&Command::Chg {
                    trid: 6,
                    status: Presence::Online,
                    capabilities: Default::default(),
                    object: None,
                })
                .await
                .unwrap();
            writer
                .send(&Command::MsgSend {
                    trid: 7,
                    class: crate::MsgClass::Acknowledged,
                    payload: b"MIME-Version: 1.0\r\n\r\nHi!".to_vec(),
                })
                .await
                .unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("CHG 6 NLN 0\r\nMSG 7 A 24\r\nMIME-Version:"));
    }

    #[tokio::test]
    async fn line_too_long() {
        let mut wire = vec![b'A'; MAX_LINE_LENGTH * 2];
        wire.extend_from_slice(b"\r\n");
        let mut framer = LineFramer::new(Cursor::new(wire));
        assert!(matches!(
            framer.read_line().await,
            Err(ProtocolError::LineTooLong { .. })
        ));
    }
}
