//! Reading and writing frames over a byte stream.
//!
//! [`FrameReader`] and [`FrameWriter`] wrap the two halves of a connection.
//! Header lines are `\n`-delimited; a file payload is raw bytes running up to
//! the first occurrence of [`SENTINEL`], which is found on a sliding window so
//! it may straddle any number of reads.

use crate::clock::Stamp;
use crate::error::{DecodeError, EncodeError};
use crate::frame::{CHUNK_SIZE, Frame, MAX_LINE_LEN, SENTINEL};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Decodes frames from the read half of a connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::with_capacity(CHUNK_SIZE, inner),
        }
    }

    /// Read one line without its terminator.
    ///
    /// Returns `Ok(None)` when the stream closes cleanly between lines. A
    /// stream that closes partway through a line is an error.
    pub async fn read_line(&mut self) -> Result<Option<String>, DecodeError> {
        let mut buf = Vec::new();
        let n = (&mut self.inner)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            if buf.len() >= MAX_LINE_LEN {
                return Err(DecodeError::LineTooLong(MAX_LINE_LEN));
            }
            return Err(DecodeError::Truncated(buf.len()));
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| DecodeError::NotUtf8)
    }

    /// Read and parse the next header line.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        match self.read_line().await? {
            Some(line) => Frame::parse_line(&line).map(Some),
            None => Ok(None),
        }
    }

    /// Copy a file payload into `sink`, consuming the end marker.
    ///
    /// Bytes that follow the marker in the same read stay buffered for the
    /// next frame. Returns the payload length.
    pub async fn read_file_body<W>(&mut self, sink: &mut W) -> Result<u64, DecodeError>
    where
        W: AsyncWrite + Unpin,
    {
        // Holds at most SENTINEL.len() - 1 bytes carried between reads, plus
        // the current read.
        let mut window: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + SENTINEL.len());
        let mut written = 0u64;

        loop {
            let chunk = self.inner.fill_buf().await?;
            if chunk.is_empty() {
                return Err(DecodeError::UnterminatedFile(written + window.len() as u64));
            }
            let read = chunk.len();
            window.extend_from_slice(chunk);

            if let Some(pos) = find_sentinel(&window) {
                sink.write_all(&window[..pos])
                    .await
                    .map_err(DecodeError::Sink)?;
                written += pos as u64;
                let unconsumed = window.len() - (pos + SENTINEL.len());
                self.inner.consume(read - unconsumed);
                sink.flush().await.map_err(DecodeError::Sink)?;
                return Ok(written);
            }
            self.inner.consume(read);

            let keep = window.len().min(SENTINEL.len() - 1);
            let flush = window.len() - keep;
            sink.write_all(&window[..flush])
                .await
                .map_err(DecodeError::Sink)?;
            written += flush as u64;
            window.drain(..flush);
        }
    }

    /// Read a whole file payload into memory.
    pub async fn decode_file_body(&mut self) -> Result<Vec<u8>, DecodeError> {
        let mut body = Vec::new();
        self.read_file_body(&mut body).await?;
        Ok(body)
    }
}

/// Encodes frames onto the write half of a connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        let bytes = frame.encode()?;
        self.write_encoded(&bytes).await
    }

    /// Write bytes produced by [`Frame::encode`].
    pub async fn write_encoded(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Stream a file frame: header, payload read from `source`, end marker.
    ///
    /// The payload is scanned as it goes out. If it would complete the end
    /// marker the chunk is not written and `SentinelInPayload` is returned;
    /// the header and earlier chunks are already on the wire, so the caller
    /// must close the connection.
    pub async fn write_file<S>(
        &mut self,
        name: &str,
        stamp: &Stamp,
        source: &mut S,
    ) -> Result<u64, EncodeError>
    where
        S: AsyncRead + Unpin,
    {
        self.write_frame(&Frame::file(name, stamp.clone())).await?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut tail: Vec<u8> = Vec::with_capacity(SENTINEL.len());
        let mut sent = 0u64;
        loop {
            let n = source.read(&mut buf).await.map_err(EncodeError::Source)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            let mut window = tail.clone();
            window.extend_from_slice(chunk);
            if let Some(pos) = find_sentinel(&window) {
                return Err(EncodeError::SentinelInPayload(
                    sent - tail.len() as u64 + pos as u64,
                ));
            }
            self.inner.write_all(chunk).await?;
            sent += n as u64;

            let keep = window.len().min(SENTINEL.len() - 1);
            tail = window[window.len() - keep..].to_vec();
        }
        self.inner.write_all(SENTINEL).await?;
        self.inner.flush().await?;
        Ok(sent)
    }

    pub async fn shutdown(&mut self) -> Result<(), EncodeError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

fn find_sentinel(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(SENTINEL.len())
        .position(|window| window == SENTINEL)
}
