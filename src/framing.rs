//! Connection-scoped reader for a stream mixing `\n`-terminated command lines
//! with raw length-delimited payloads.
//!
//! Lines are read one byte at a time and payloads in chunks never larger
//! than what remains, so the reader holds no bytes beyond the current call.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, TransferError};

const PAYLOAD_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
pub enum ReadLine {
    Line(String),
    /// The peer closed its write side before sending another byte.
    Eof,
    /// The line could not be accepted. After [`ProtocolError::LineTooLong`]
    /// the rest of the line is still unread.
    Rejected(ProtocolError),
}

pub struct FrameReader<R> {
    inner: R,
    max_line_bytes: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            max_line_bytes,
        }
    }

    /// Read up to and including the next `\n`; the terminator (and a
    /// preceding `\r`) is stripped. An unterminated final line is returned
    /// as is.
    pub async fn read_line(&mut self) -> io::Result<ReadLine> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.inner.read(&mut byte).await? == 0 {
                if line.is_empty() {
                    return Ok(ReadLine::Eof);
                }
                break;
            }
            if byte[0] == b'\n' {
                break;
            }
            if line.len() >= self.max_line_bytes {
                return Ok(ReadLine::Rejected(ProtocolError::LineTooLong {
                    limit: self.max_line_bytes,
                }));
            }
            line.push(byte[0]);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(match String::from_utf8(line) {
            Ok(line) => ReadLine::Line(line),
            Err(_) => ReadLine::Rejected(ProtocolError::NotUtf8),
        })
    }

    /// Copy exactly `len` bytes into `out`.
    ///
    /// If `out` fails the remaining payload is still consumed so the next
    /// command line starts at the right byte; the write error is returned
    /// afterwards.
    pub async fn read_payload<W>(&mut self, len: u64, out: &mut W) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let chunk = usize::try_from(len).map_or(PAYLOAD_CHUNK, |len| len.min(PAYLOAD_CHUNK));
        let mut buf = vec![0u8; chunk];
        let mut received = 0u64;
        let mut write_error = None;
        while received < len {
            let want = usize::try_from(len - received).map_or(buf.len(), |left| left.min(buf.len()));
            let n = self.inner.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(TransferError::Incomplete {
                    expected: len,
                    received,
                });
            }
            if write_error.is_none() {
                if let Err(err) = out.write_all(&buf[..n]).await {
                    write_error = Some(err);
                }
            }
            received += n as u64;
        }
        if let Some(err) = write_error {
            return Err(TransferError::Io(err));
        }
        out.flush().await?;
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(read: ReadLine) -> String {
        match read {
            ReadLine::Line(line) => line,
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn payload_between_lines_is_not_split() {
        let mut wire = Vec::new();
        wire.extend_from_slice(b"{\"cmd\":\"receive_file\",\"name\":\"a.jpg\",\"size\":6}\n");
        wire.extend_from_slice(b"ab\ncd\n");
        wire.extend_from_slice(b"{\"cmd\":\"list_files\"}\n");
        let mut reader = FrameReader::new(wire.as_slice(), 1024);

        assert!(line(reader.read_line().await.unwrap()).contains("receive_file"));
        let mut file = Vec::new();
        assert_eq!(reader.read_payload(6, &mut file).await.unwrap(), 6);
        assert_eq!(file, b"ab\ncd\n");
        assert_eq!(line(reader.read_line().await.unwrap()), "{\"cmd\":\"list_files\"}");
        assert!(matches!(reader.read_line().await.unwrap(), ReadLine::Eof));
    }

    #[tokio::test]
    async fn large_payload_arrives_whole() {
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut wire = body.clone();
        wire.extend_from_slice(b"next\n");
        let mut reader = FrameReader::new(wire.as_slice(), 1024);
        let mut file = Vec::new();
        reader.read_payload(body.len() as u64, &mut file).await.unwrap();
        assert_eq!(file, body);
        assert_eq!(line(reader.read_line().await.unwrap()), "next");
    }

    #[tokio::test]
    async fn short_payload_is_incomplete() {
        let mut reader = FrameReader::new(&b"abc"[..], 1024);
        let mut file = Vec::new();
        match reader.read_payload(10, &mut file).await {
            Err(TransferError::Incomplete { expected, received }) => {
                assert_eq!((expected, received), (10, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_length_payload_reads_nothing() {
        let mut reader = FrameReader::new(&b"next\n"[..], 1024);
        let mut file = Vec::new();
        assert_eq!(reader.read_payload(0, &mut file).await.unwrap(), 0);
        assert_eq!(line(reader.read_line().await.unwrap()), "next");
    }

    #[tokio::test]
    async fn crlf_and_unterminated_lines() {
        let mut reader = FrameReader::new(&b"one\r\ntwo"[..], 1024);
        assert_eq!(line(reader.read_line().await.unwrap()), "one");
        assert_eq!(line(reader.read_line().await.unwrap()), "two");
        assert!(matches!(reader.read_line().await.unwrap(), ReadLine::Eof));
    }

    #[tokio::test]
    async fn limit_does_not_count_the_newline() {
        let mut wire = vec![b'x'; 16];
        wire.extend_from_slice(b"\n");
        wire.extend_from_slice(&[b'y'; 17]);
        wire.extend_from_slice(b"\n");
        let mut reader = FrameReader::new(wire.as_slice(), 16);
        assert_eq!(line(reader.read_line().await.unwrap()), "x".repeat(16));
        assert!(matches!(
            reader.read_line().await.unwrap(),
            ReadLine::Rejected(ProtocolError::LineTooLong { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn overlong_and_invalid_lines_are_rejected() {
        let long = vec![b'x'; 40];
        let mut reader = FrameReader::new(long.as_slice(), 16);
        assert!(matches!(
            reader.read_line().await.unwrap(),
            ReadLine::Rejected(ProtocolError::LineTooLong { limit: 16 })
        ));

        let mut reader = FrameReader::new(&b"\xff\xfe\n"[..], 16);
        assert!(matches!(
            reader.read_line().await.unwrap(),
            ReadLine::Rejected(ProtocolError::NotUtf8)
        ));
    }
}
