//! Write-ahead log for the store's single-writer durability path (§5).
//!
//! Format per entry: `[LSN: 8 bytes][CRC32: 4 bytes][len: 4 bytes][payload]`.
//! `replay` truncates a torn trailing write rather than failing the whole
//! log, matching the WAL-journaling semantics §2 asks for.

use crc32fast::Hasher;
use docgraph_core::error::{CoreError, ErrorCategory};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("data integrity error (CRC mismatch)")]
    CrcMismatch,
}

impl CoreError for WalError {
    fn category(&self) -> ErrorCategory {
        match self {
            WalError::Io(_) => ErrorCategory::Internal,
            WalError::CrcMismatch => ErrorCategory::Integrity,
        }
    }
}

pub struct Wal {
    file: BufWriter<File>,
    current_lsn: AtomicU64,
}

impl Wal {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;

        Ok(Self {
            file: BufWriter::new(file),
            current_lsn: AtomicU64::new(0),
        })
    }

    /// Appends a journal entry and returns its assigned LSN. Not flushed:
    /// callers batch appends within a transaction and flush once.
    pub async fn append(&mut self, payload: &[u8]) -> Result<u64, WalError> {
        let lsn = self.current_lsn.fetch_add(1, Ordering::SeqCst) + 1;
        let len = payload.len() as u32;

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let crc = hasher.finalize();

        self.file.write_u64(lsn).await?;
        self.file.write_u32(crc).await?;
        self.file.write_u32(len).await?;
        self.file.write_all(payload).await?;

        Ok(lsn)
    }

    pub async fn flush(&mut self) -> Result<(), WalError> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        Ok(())
    }

    pub fn current_lsn(&self) -> u64 {
        self.current_lsn.load(Ordering::SeqCst)
    }

    /// Replays every durable entry from the start of the file, truncating
    /// a torn trailing write if the process died mid-append.
    pub async fn replay<F>(&mut self, mut callback: F) -> Result<u64, WalError>
    where
        F: FnMut(u64, Vec<u8>) -> Result<(), WalError>,
    {
        self.file.flush().await?;
        let file = self.file.get_mut();
        file.seek(std::io::SeekFrom::Start(0)).await?;

        let mut last_lsn = 0;
        let mut valid_end_pos = 0;

        loop {
            let lsn = match file.read_u64().await {
                Ok(v) => v,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            };

            let crc = file.read_u32().await?;
            let len = file.read_u32().await? as usize;

            let mut payload = vec![0u8; len];
            match file.read_exact(&mut payload).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Hasher::new();
            hasher.update(&payload);
            if hasher.finalize() != crc {
                return Err(WalError::CrcMismatch);
            }

            callback(lsn, payload)?;
            last_lsn = lsn;
            valid_end_pos = file.stream_position().await?;
        }

        if valid_end_pos < file.metadata().await?.len() {
            file.set_len(valid_end_pos).await?;
        }

        file.seek(std::io::SeekFrom::End(0)).await?;
        self.current_lsn.store(last_lsn, Ordering::SeqCst);

        Ok(last_lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_assigns_monotonic_lsns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).await.unwrap();

        let lsn1 = wal.append(b"Hello WAL").await.unwrap();
        let lsn2 = wal.append(b"Second Entry").await.unwrap();

        assert!(lsn1 > 0);
        assert!(lsn2 > lsn1);
        wal.flush().await.unwrap();
    }

    #[tokio::test]
    async fn replay_recovers_every_entry_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay.wal");

        {
            let mut wal = Wal::open(&path).await.unwrap();
            wal.append(b"Entry 1").await.unwrap();
            wal.append(b"Entry 2").await.unwrap();
            wal.flush().await.unwrap();
        }

        {
            let mut wal = Wal::open(&path).await.unwrap();
            let mut recovered = Vec::new();

            let last_lsn = wal
                .replay(|lsn, payload| {
                    recovered.push((lsn, payload));
                    Ok(())
                })
                .await
                .unwrap();

            assert_eq!(last_lsn, 2);
            assert_eq!(recovered.len(), 2);
            assert_eq!(recovered[0].1, b"Entry 1");
            assert_eq!(recovered[1].1, b"Entry 2");
            assert_eq!(wal.current_lsn(), 2);
        }
    }

    #[tokio::test]
    async fn replay_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idempotent.wal");

        let mut wal = Wal::open(&path).await.unwrap();
        wal.append(b"only entry").await.unwrap();
        wal.flush().await.unwrap();

        let first = wal.replay(|_, _| Ok(())).await.unwrap();
        let second = wal.replay(|_, _| Ok(())).await.unwrap();
        assert_eq!(first, second);
    }
}
