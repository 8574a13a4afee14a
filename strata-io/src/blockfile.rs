//! Serialized, staleness-aware block storage
//!
//! A [`BlockFile`] owns a file handle and mediates all access to it in
//! fixed-size block units. Every write bumps a session-local serial counter
//! immediately before and after touching the file, and stamps the covered
//! blocks with it; callers hold onto serials as cache-validity tokens.
//! Serials are never persisted — a freshly opened file starts at a
//! caller-supplied initial serial, chosen high enough to invalidate any
//! cache built in a previous session.
//!
//! Overlapping I/O is coordinated rather than raced: writes are admitted in
//! submission order, a write waits for in-flight reads over its range, and a
//! read queued behind a pending write retries once that write completes.
//! Disjoint ranges proceed concurrently.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::trace;

use strata_format::{Result, StrataError};

use crate::fs;

/// Construction parameters for a [`BlockFile`]
#[derive(Debug, Clone)]
pub struct BlockFileOptions {
    /// Size of each block in bytes (positive)
    pub block_size: usize,
    /// Whether write operations are permitted at all
    pub writable: bool,
    /// Logical time before this session's first write; the default
    /// last-write serial for any block never written this session
    pub initial_serial: u64,
}

impl Default for BlockFileOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            writable: false,
            initial_serial: 0,
        }
    }
}

/// Result of a (conditional) block read
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// The block bytes, or `None` when the caller's serial is still current
    pub data: Option<Bytes>,
    /// Max last-write serial across the covered blocks at read time
    pub range_serial: u64,
    /// The file's serial counter after the read
    pub file_serial: u64,
}

/// Result of a (conditional) block write
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    /// False when the optimistic serial check rejected the write
    pub wrote: bool,
    /// The serial stamped on the range (or the serial that caused the skip)
    pub serial: u64,
}

/// Per-block occupancy while reads or writes are in flight
#[derive(Debug, Default)]
struct BlockHold {
    readers: usize,
    write_pending: bool,
}

struct PendingWrite {
    id: u64,
    start: u64,
    end: u64,
    /// Present until the write is admitted to execute
    admit: Option<oneshot::Sender<()>>,
    /// Reads queued behind this write, woken on completion
    waiters: Vec<oneshot::Sender<()>>,
}

struct State {
    serial: u64,
    next_write_id: u64,
    block_serials: HashMap<u64, u64>,
    holds: HashMap<u64, BlockHold>,
    writes: VecDeque<PendingWrite>,
}

struct Inner {
    file: File,
    block_size: usize,
    writable: bool,
    initial_serial: u64,
    state: Mutex<State>,
}

/// Serial-numbered, concurrency-safe block access over a file handle
#[derive(Clone)]
pub struct BlockFile {
    inner: Arc<Inner>,
}

enum Admission {
    Wait(oneshot::Receiver<()>),
    Unchanged { range_serial: u64, file_serial: u64 },
    Go { range_serial: u64 },
}

impl BlockFile {
    /// Wrap a file handle; fails synchronously on a non-positive block size
    pub fn new(file: File, opts: BlockFileOptions) -> Result<Self> {
        if opts.block_size == 0 {
            return Err(StrataError::InvalidArgument(
                "Block size must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                file,
                block_size: opts.block_size,
                writable: opts.writable,
                initial_serial: opts.initial_serial,
                state: Mutex::new(State {
                    serial: opts.initial_serial,
                    next_write_id: 0,
                    block_serials: HashMap::new(),
                    holds: HashMap::new(),
                    writes: VecDeque::new(),
                }),
            }),
        })
    }

    /// The block size this file was opened with
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Whether writes are permitted
    pub fn writable(&self) -> bool {
        self.inner.writable
    }

    /// The serial assumed for blocks never written this session
    pub fn initial_serial(&self) -> u64 {
        self.inner.initial_serial
    }

    /// The current value of the serial counter
    pub fn current_serial(&self) -> u64 {
        self.state().serial
    }

    /// Read `length` contiguous blocks starting at `index`
    pub async fn read(&self, index: u64, length: u64) -> Result<ReadOutcome> {
        self.read_if_changed(index, length, None).await
    }

    /// Read `length` blocks at `index` unless the caller's cached copy is
    /// still valid
    ///
    /// When `old_serial` equals the range's current max last-write serial the
    /// cached copy is current: no I/O is performed and `data` is `None`. The
    /// read queues behind any pending write overlapping the range and never
    /// observes a torn write.
    pub async fn read_if_changed(
        &self,
        index: u64,
        length: u64,
        old_serial: Option<u64>,
    ) -> Result<ReadOutcome> {
        let (index, end) = self.check_range(index, length)?;
        loop {
            let admission = {
                let mut state = self.state();
                if let Some(write) = state
                    .writes
                    .iter_mut()
                    .find(|w| w.start < end && w.end > index)
                {
                    let (tx, rx) = oneshot::channel();
                    write.waiters.push(tx);
                    Admission::Wait(rx)
                } else {
                    let range_serial = Self::range_serial(&state, self.inner.initial_serial, index, end);
                    if old_serial == Some(range_serial) {
                        Admission::Unchanged {
                            range_serial,
                            file_serial: state.serial,
                        }
                    } else {
                        for block in index..end {
                            state.holds.entry(block).or_default().readers += 1;
                        }
                        Admission::Go { range_serial }
                    }
                }
            };
            match admission {
                Admission::Wait(rx) => {
                    // The write completing (or aborting) wakes us to retry.
                    let _ = rx.await;
                }
                Admission::Unchanged {
                    range_serial,
                    file_serial,
                } => {
                    return Ok(ReadOutcome {
                        data: None,
                        range_serial,
                        file_serial,
                    })
                }
                Admission::Go { range_serial } => {
                    let result = self.read_blocks(index, end - index).await;
                    let file_serial = {
                        let mut state = self.state();
                        Self::release_readers(&mut state, index, end);
                        state.serial
                    };
                    let data = result?;
                    return Ok(ReadOutcome {
                        data: Some(data),
                        range_serial,
                        file_serial,
                    });
                }
            }
        }
    }

    /// Unconditional write of `data` starting at block `index`
    pub async fn write(&self, index: u64, data: Bytes) -> Result<WriteOutcome> {
        self.write_unless_changed(index, data, None).await
    }

    /// Write `data` at block `index` unless the range changed past
    /// `check_serial`
    ///
    /// The write covers `ceil(data.len() / block_size)` blocks. When
    /// `check_serial` is provided and is below the range's current max
    /// last-write serial, the write is skipped without touching the file and
    /// `wrote` is false — the caller re-reads and retries. Writes execute in
    /// submission order over overlapping ranges; disjoint writes may run
    /// concurrently.
    pub async fn write_unless_changed(
        &self,
        index: u64,
        data: Bytes,
        check_serial: Option<u64>,
    ) -> Result<WriteOutcome> {
        if !self.inner.writable {
            return Err(StrataError::NotWritable);
        }
        if data.is_empty() {
            return Err(StrataError::InvalidArgument(
                "Cannot write an empty buffer".to_string(),
            ));
        }
        let length = data.len().div_ceil(self.inner.block_size) as u64;
        let (index, end) = self.check_range(index, length)?;

        let (id, admit) = {
            let mut state = self.state();
            let id = state.next_write_id;
            state.next_write_id += 1;
            // Flag held blocks so releasing readers re-run the scheduler.
            for block in index..end {
                if let Some(hold) = state.holds.get_mut(&block) {
                    if hold.readers > 0 {
                        hold.write_pending = true;
                    }
                }
            }
            let (tx, rx) = oneshot::channel();
            state.writes.push_back(PendingWrite {
                id,
                start: index,
                end,
                admit: Some(tx),
                waiters: Vec::new(),
            });
            Self::schedule(&mut state);
            (id, rx)
        };
        admit.await.map_err(|_| {
            StrataError::Internal("Write admission dropped before execution".to_string())
        })?;

        {
            let mut state = self.state();
            if let Some(check) = check_serial {
                let current = Self::range_serial(&state, self.inner.initial_serial, index, end);
                if check < current {
                    trace!(index, length, check, current, "write skipped by serial check");
                    Self::finish_write(&mut state, id);
                    return Ok(WriteOutcome {
                        wrote: false,
                        serial: current,
                    });
                }
            }
            // Stamp before touching the file so concurrent serial checks see
            // the range as in flux.
            state.serial += 1;
            let serial = state.serial;
            for block in index..end {
                state.block_serials.insert(block, serial);
            }
        }

        let io_result = self.write_blocks(index, end - index, data).await;

        let serial = {
            let mut state = self.state();
            state.serial += 1;
            let serial = state.serial;
            for block in index..end {
                state.block_serials.insert(block, serial);
            }
            Self::finish_write(&mut state, id);
            serial
        };
        io_result?;
        trace!(index, length, serial, "write complete");
        Ok(WriteOutcome {
            wrote: true,
            serial,
        })
    }

    /// Flush file contents and metadata to stable storage
    pub async fn sync(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.file.sync_all())
            .await
            .map_err(|e| StrataError::Internal(format!("Blocking sync task failed: {e}")))??;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoning panic cannot leave the table half-updated in a way the
        // scheduler cannot tolerate; continue with the inner state.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_range(&self, index: u64, length: u64) -> Result<(u64, u64)> {
        if length == 0 {
            return Err(StrataError::InvalidArgument(
                "Length 0 is not a positive block count".to_string(),
            ));
        }
        let end = index.checked_add(length).ok_or_else(|| {
            StrataError::InvalidArgument(format!("Block range {index}+{length} overflows"))
        })?;
        end.checked_mul(self.inner.block_size as u64).ok_or_else(|| {
            StrataError::InvalidArgument(format!("Block range {index}+{length} overflows"))
        })?;
        Ok((index, end))
    }

    fn range_serial(state: &State, initial: u64, start: u64, end: u64) -> u64 {
        (start..end)
            .map(|block| state.block_serials.get(&block).copied().unwrap_or(initial))
            .max()
            .unwrap_or(initial)
    }

    fn release_readers(state: &mut State, start: u64, end: u64) {
        let mut recheck = false;
        for block in start..end {
            if let Some(hold) = state.holds.get_mut(&block) {
                hold.readers = hold.readers.saturating_sub(1);
                if hold.readers == 0 {
                    recheck |= hold.write_pending;
                    state.holds.remove(&block);
                }
            }
        }
        if recheck {
            Self::schedule(state);
        }
    }

    /// Admit every queued write that is at the effective head of its range's
    /// FIFO and has no in-flight readers over its blocks
    fn schedule(state: &mut State) {
        let mut aborted = Vec::new();
        for i in 0..state.writes.len() {
            if state.writes[i].admit.is_none() {
                continue; // already admitted (possibly still running)
            }
            let (start, end) = (state.writes[i].start, state.writes[i].end);
            let blocked_by_write = state
                .writes
                .iter()
                .take(i)
                .any(|w| w.start < end && w.end > start);
            if blocked_by_write {
                continue;
            }
            let blocked_by_reader = (start..end)
                .any(|block| state.holds.get(&block).is_some_and(|h| h.readers > 0));
            if blocked_by_reader {
                continue;
            }
            let id = state.writes[i].id;
            if let Some(tx) = state.writes[i].admit.take() {
                if tx.send(()).is_err() {
                    // Submitter abandoned the write before admission; drop
                    // the entry so it cannot wedge the queue.
                    aborted.push(id);
                }
            }
        }
        for id in aborted {
            Self::finish_write(state, id);
        }
    }

    fn finish_write(state: &mut State, id: u64) {
        if let Some(pos) = state.writes.iter().position(|w| w.id == id) {
            if let Some(entry) = state.writes.remove(pos) {
                Self::schedule(state);
                for waiter in entry.waiters {
                    let _ = waiter.send(());
                }
            }
        }
    }

    async fn read_blocks(&self, index: u64, length: u64) -> Result<Bytes> {
        let inner = Arc::clone(&self.inner);
        let len = (length as usize)
            .checked_mul(inner.block_size)
            .ok_or_else(|| {
                StrataError::InvalidArgument(format!("Read of {length} blocks overflows"))
            })?;
        let offset = index * inner.block_size as u64;
        let buf = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
            let mut buf = vec![0u8; len];
            fs::read_exact_at(&inner.file, &mut buf, offset)?;
            Ok(buf)
        })
        .await
        .map_err(|e| StrataError::Internal(format!("Blocking read task failed: {e}")))??;
        Ok(Bytes::from(buf))
    }

    async fn write_blocks(&self, index: u64, length: u64, data: Bytes) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let offset = index * inner.block_size as u64;
        tokio::task::spawn_blocking(move || {
            // Reads always cover whole blocks; a short buffer is padded to
            // the block boundary so the range reads back in full.
            let padded_len = length as usize * inner.block_size;
            if data.len() == padded_len {
                fs::write_all_at(&inner.file, &data, offset)
            } else {
                let mut padded = vec![0u8; padded_len];
                padded[..data.len()].copy_from_slice(&data);
                fs::write_all_at(&inner.file, &padded, offset)
            }
        })
        .await
        .map_err(|e| StrataError::Internal(format!("Blocking write task failed: {e}")))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_block_size() {
        let file = tempfile::tempfile().unwrap();
        let result = BlockFile::new(
            file,
            BlockFileOptions {
                block_size: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(StrataError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn rejects_zero_length_read() {
        let file = tempfile::tempfile().unwrap();
        let bf = BlockFile::new(file, BlockFileOptions::default()).unwrap();
        assert!(matches!(
            bf.read(0, 0).await,
            Err(StrataError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn rejects_write_when_not_writable() {
        let file = tempfile::tempfile().unwrap();
        let bf = BlockFile::new(file, BlockFileOptions::default()).unwrap();
        let result = bf.write(0, Bytes::from_static(b"data")).await;
        assert!(matches!(result, Err(StrataError::NotWritable)));
    }
}
