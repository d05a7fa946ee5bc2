/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Append-only, height-indexed storage of irreversible blocks.
//!
//! The block log is a pair of files in the chain's data directory:
//!
//! |File|Content|
//! |---|---|
//! |`block_log`|One frame per block, in block number order. A frame is the block's length as a `u32` (LE), the block's borsh encoding, and then the offset of the frame's start as a `u64` (LE).|
//! |`block_log.index`|The offset of each block's frame as a `u64` (LE), at position `(number - 1) * 8`.|
//!
//! The trailing offset of each frame lets the head be read from the end of the log without the index. If
//! the index disagrees with the log on open, it is rebuilt by scanning the log.
//!
//! Only blocks that have become irreversible are appended, strictly in increasing order, so the log has
//! no gaps. Nothing is ever deleted except by [`wipe`](BlockLog::wipe).

use borsh::BorshDeserialize;
use std::fmt::{self, Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::basic::{borsh_bytes, BlockNumber};
use crate::types::block::SignedBlock;

pub const BLOCK_LOG_FILE: &str = "block_log";
pub const BLOCK_LOG_INDEX_FILE: &str = "block_log.index";

const LEN_SIZE: u64 = 4;
const OFFSET_SIZE: u64 = 8;

pub struct BlockLog {
    log_path: PathBuf,
    index_path: PathBuf,
    log: File,
    index: File,
    head: Option<SignedBlock>,
    /// Whether every append is synced to disk before returning.
    locking: bool,
}

impl BlockLog {
    /// Open the block log in `data_dir`, creating empty files if there are none.
    pub fn open(data_dir: &Path) -> Result<BlockLog, BlockLogError> {
        std::fs::create_dir_all(data_dir)?;
        let log_path = data_dir.join(BLOCK_LOG_FILE);
        let index_path = data_dir.join(BLOCK_LOG_INDEX_FILE);
        let mut block_log = BlockLog {
            log: open_rw(&log_path)?,
            index: open_rw(&index_path)?,
            log_path,
            index_path,
            head: None,
            locking: true,
        };

        let log_len = block_log.log.metadata()?.len();
        if log_len == 0 {
            if block_log.index.metadata()?.len() != 0 {
                log::warn!("Block log is empty but its index is not, clearing the index");
                block_log.index.set_len(0)?;
            }
            return Ok(block_log);
        }

        let head = match block_log.read_head(log_len) {
            Ok(head) => head,
            Err(err) => {
                log::warn!("Failed to read the block log head ({}), rebuilding the index", err);
                block_log.rebuild_index()?;
                return Ok(block_log);
            }
        };
        let (head, head_offset) = head;
        let expected_index_len = head.num().int() as u64 * OFFSET_SIZE;
        let index_len = block_log.index.metadata()?.len();
        let index_agrees = index_len == expected_index_len
            && block_log.read_u64_at_index(index_len - OFFSET_SIZE)? == head_offset;
        block_log.head = Some(head);
        if !index_agrees {
            log::warn!("Block log index is inconsistent with the log, rebuilding it");
            block_log.rebuild_index()?;
        }
        Ok(block_log)
    }

    fn read_head(&self, log_len: u64) -> Result<(SignedBlock, u64), BlockLogError> {
        if log_len < LEN_SIZE + OFFSET_SIZE {
            return Err(BlockLogError::Corrupt { offset: 0 });
        }
        let head_offset = self.read_u64_at_log(log_len - OFFSET_SIZE)?;
        let (head, next) = self.read_frame(head_offset)?;
        if next != log_len {
            return Err(BlockLogError::Corrupt {
                offset: head_offset,
            });
        }
        Ok((head, head_offset))
    }

    pub fn head(&self) -> Option<&SignedBlock> {
        self.head.as_ref()
    }

    /// The number of the last block in the log, or 0 if the log is empty.
    pub fn head_num(&self) -> BlockNumber {
        self.head
            .as_ref()
            .map_or(BlockNumber::new(0), |head| head.num())
    }

    /// Append `block`, which must be the block right after the current head. Returns the offset of its frame.
    pub fn append(&mut self, block: &SignedBlock) -> Result<u64, BlockLogError> {
        let expected = self.head_num() + 1;
        if block.num() != expected {
            return Err(BlockLogError::OutOfOrder {
                expected,
                got: block.num(),
            });
        }

        let offset = self.log.seek(SeekFrom::End(0))?;
        let bytes = borsh_bytes(block);
        let mut frame = Vec::with_capacity(bytes.len() + (LEN_SIZE + OFFSET_SIZE) as usize);
        frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        frame.extend_from_slice(&bytes);
        frame.extend_from_slice(&offset.to_le_bytes());
        self.log.write_all(&frame)?;

        self.index.seek(SeekFrom::End(0))?;
        self.index.write_all(&offset.to_le_bytes())?;

        if self.locking {
            self.log.sync_data()?;
            self.index.sync_data()?;
        }
        self.head = Some(block.clone());
        Ok(offset)
    }

    pub fn read_block_by_num(&self, num: BlockNumber) -> Result<Option<SignedBlock>, BlockLogError> {
        if num.int() == 0 || num > self.head_num() {
            return Ok(None);
        }
        let offset = self.read_u64_at_index((num.int() as u64 - 1) * OFFSET_SIZE)?;
        let (block, _) = self.read_frame(offset)?;
        if block.num() != num {
            return Err(BlockLogError::Corrupt { offset });
        }
        Ok(Some(block))
    }

    /// Toggle syncing to disk after every append. Reindexing turns this off for throughput; it must be
    /// turned back on before normal operation resumes.
    pub fn set_locking(&mut self, locking: bool) -> Result<(), BlockLogError> {
        if locking && !self.locking {
            self.flush()?;
        }
        self.locking = locking;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), BlockLogError> {
        self.log.flush()?;
        self.index.flush()?;
        self.log.sync_all()?;
        self.index.sync_all()?;
        Ok(())
    }

    /// Truncate the log and its index.
    pub fn wipe(&mut self) -> Result<(), BlockLogError> {
        self.log.set_len(0)?;
        self.index.set_len(0)?;
        self.head = None;
        Ok(())
    }

    /// Rewrite the index by scanning every frame of the log. A torn frame at the end of the log, left by a
    /// crash mid-append, is truncated away.
    pub fn rebuild_index(&mut self) -> Result<(), BlockLogError> {
        let log_len = self.log.metadata()?.len();
        let mut offsets = Vec::new();
        let mut head = None;
        let mut offset = 0;
        while offset < log_len {
            match self.read_frame(offset) {
                Ok((block, next)) if next <= log_len => {
                    if block.num().int() as usize != offsets.len() + 1 {
                        return Err(BlockLogError::Corrupt { offset });
                    }
                    offsets.push(offset);
                    head = Some(block);
                    offset = next;
                }
                Ok(_) | Err(_) => {
                    log::warn!(
                        "Truncating torn block log frame at offset {} of {}",
                        offset,
                        log_len
                    );
                    self.log.set_len(offset)?;
                    break;
                }
            }
        }

        let mut index_bytes = Vec::with_capacity(offsets.len() * OFFSET_SIZE as usize);
        for offset in &offsets {
            index_bytes.extend_from_slice(&offset.to_le_bytes());
        }
        self.index.set_len(0)?;
        self.index.seek(SeekFrom::Start(0))?;
        self.index.write_all(&index_bytes)?;
        self.index.sync_all()?;
        self.head = head;
        log::info!("Rebuilt block log index with {} blocks", offsets.len());
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Read the frame starting at `offset`. Returns the block and the offset of the next frame.
    fn read_frame(&self, offset: u64) -> Result<(SignedBlock, u64), BlockLogError> {
        let mut log = &self.log;
        log.seek(SeekFrom::Start(offset))?;
        let mut len = [0u8; LEN_SIZE as usize];
        log.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as u64;
        if offset + LEN_SIZE + len + OFFSET_SIZE > self.log.metadata()?.len() {
            return Err(BlockLogError::Corrupt { offset });
        }
        let mut bytes = vec![0u8; len as usize];
        log.read_exact(&mut bytes)?;
        let mut trailer = [0u8; OFFSET_SIZE as usize];
        log.read_exact(&mut trailer)?;
        if u64::from_le_bytes(trailer) != offset {
            return Err(BlockLogError::Corrupt { offset });
        }
        let block = SignedBlock::try_from_slice(&bytes)
            .map_err(|source| BlockLogError::Deserialize { offset, source })?;
        Ok((block, offset + LEN_SIZE + len + OFFSET_SIZE))
    }

    fn read_u64_at_log(&self, position: u64) -> Result<u64, BlockLogError> {
        read_u64_at(&self.log, position)
    }

    fn read_u64_at_index(&self, position: u64) -> Result<u64, BlockLogError> {
        read_u64_at(&self.index, position)
    }
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
}

fn read_u64_at(mut file: &File, position: u64) -> Result<u64, BlockLogError> {
    file.seek(SeekFrom::Start(position))?;
    let mut bytes = [0u8; OFFSET_SIZE as usize];
    file.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[derive(Debug)]
pub enum BlockLogError {
    Io(io::Error),
    Corrupt { offset: u64 },
    Deserialize { offset: u64, source: io::Error },
    OutOfOrder { expected: BlockNumber, got: BlockNumber },
}

impl Display for BlockLogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockLogError::Io(err) => write!(f, "block log i/o error: {}", err),
            BlockLogError::Corrupt { offset } => {
                write!(f, "block log frame at offset {} is corrupt", offset)
            }
            BlockLogError::Deserialize { offset, source } => write!(
                f,
                "failed to deserialize block log frame at offset {}: {}",
                offset, source
            ),
            BlockLogError::OutOfOrder { expected, got } => write!(
                f,
                "block {} appended to the block log, expected block {}",
                got, expected
            ),
        }
    }
}

impl std::error::Error for BlockLogError {}

impl From<io::Error> for BlockLogError {
    fn from(value: io::Error) -> Self {
        BlockLogError::Io(value)
    }
}
