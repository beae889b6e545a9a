//! Streaming value reader.

use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// A readable handle to one entry's value.
///
/// Uncompressed entries stream directly from the data file; gzip entries are
/// decompressed up front and served from the resulting buffer. Either way
/// the reader owns what it reads from, and dropping it releases the file
/// handle.
pub struct ValueReader {
    inner: Inner,
}

enum Inner {
    Plain(tokio::fs::File),
    Buffered(Cursor<Vec<u8>>),
}

impl ValueReader {
    pub(crate) fn plain(file: tokio::fs::File) -> Self {
        Self {
            inner: Inner::Plain(file),
        }
    }

    pub(crate) fn buffered(buf: Vec<u8>) -> Self {
        Self {
            inner: Inner::Buffered(Cursor::new(buf)),
        }
    }

    /// Drains the rest of the reader into a single buffer.
    pub async fn into_bytes(mut self) -> std::io::Result<Bytes> {
        match self.inner {
            Inner::Buffered(cursor) => {
                let pos = (cursor.position() as usize).min(cursor.get_ref().len());
                let mut buf = cursor.into_inner();
                buf.drain(..pos);
                Ok(Bytes::from(buf))
            }
            Inner::Plain(_) => {
                let mut buf = Vec::new();
                self.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl AsyncRead for ValueReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().inner {
            Inner::Plain(file) => Pin::new(file).poll_read(cx, buf),
            Inner::Buffered(cursor) => Pin::new(cursor).poll_read(cx, buf),
        }
    }
}
