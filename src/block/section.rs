//! SectionReader: the `[0, size)` window over a `SnapshotFile`, with a cursor
//! for sequential reads and seeks.

use super::reader::SnapshotFile;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

/// Bounded reader over one snapshot.
///
/// Reads at or past `size()` are end-of-stream (`Ok(0)`), never errors.
/// Clones share the underlying file but each keeps its own cursor. The
/// positional methods take `&self`, so one reader can also be shared behind
/// an `Arc` for concurrent `read_at`.
pub struct SectionReader {
    file: Arc<SnapshotFile>,
    limit: u64,
    pos: u64,
    pending: Mutex<Option<PendingRead>>,
}

/// An `AsyncRead` fetch in flight, valid only while the cursor is still at `offset`.
struct PendingRead {
    offset: u64,
    fut: BoxFuture<'static, Result<Vec<u8>>>,
}

impl std::fmt::Debug for SectionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionReader")
            .field("limit", &self.limit)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl Clone for SectionReader {
    fn clone(&self) -> Self {
        Self {
            file: self.file.clone(),
            limit: self.limit,
            pos: self.pos,
            pending: Mutex::new(None),
        }
    }
}

impl SectionReader {
    pub fn new(file: Arc<SnapshotFile>) -> Self {
        let limit = file.size();
        Self {
            file,
            limit,
            pos: 0,
            pending: Mutex::new(None),
        }
    }

    pub fn size(&self) -> u64 {
        self.limit
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn file(&self) -> &Arc<SnapshotFile> {
        &self.file
    }

    /// Positional read that ignores the cursor; may return fewer bytes than asked.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.limit || buf.is_empty() {
            return Ok(0);
        }
        let max = (self.limit - offset).min(buf.len() as u64) as usize;
        self.file.read_at(&mut buf[..max], offset).await
    }

    pub async fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.read_exact_at(buf, offset).await
    }

    /// Read at the cursor and advance it by the number of bytes read.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.drop_pending();
        let n = self.read_at(buf, self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Move the cursor. Positions past the end are allowed and read as EOF.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.limit.checked_add_signed(delta),
        }
        .ok_or(Error::InvalidSeek)?;
        self.drop_pending();
        self.pos = target;
        Ok(target)
    }

    fn drop_pending(&mut self) {
        *self.pending.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn read_task(file: Arc<SnapshotFile>, pos: u64, len: usize) -> PendingRead {
        let fut: BoxFuture<'static, Result<Vec<u8>>> = Box::pin(async move {
            let mut data = vec![0u8; len];
            let n = file.read_at(&mut data, pos).await?;
            data.truncate(n);
            Ok(data)
        });
        PendingRead { offset: pos, fut }
    }
}

impl AsyncRead for SectionReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let pos = this.pos;
        let slot = this
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        // A read abandoned mid-flight is stale once the cursor has moved.
        if slot.as_ref().is_some_and(|p| p.offset != pos) {
            *slot = None;
        }
        if slot.is_none() {
            if pos >= this.limit || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            let len = (this.limit - pos).min(buf.remaining() as u64) as usize;
            *slot = Some(Self::read_task(this.file.clone(), pos, len));
        }
        let Some(pending) = slot.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let res = ready!(pending.fut.as_mut().poll(cx));
        *slot = None;
        match res {
            Ok(data) => {
                // The caller may hand in a smaller buffer on re-poll; the rest is re-read later.
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                this.pos += n as u64;
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

impl AsyncSeek for SectionReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        self.get_mut().seek(position)?;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}
