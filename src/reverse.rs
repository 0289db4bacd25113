//! Reverse line reading for large log files.
//!
//! Log files can be gigabytes while the interesting window is the last few
//! minutes, so lines are read newest-first in fixed-size chunks seeked
//! backward from the end of the file. Nothing is buffered beyond one chunk
//! plus the carry-over segment of a line split across a chunk boundary.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Default backward read chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Iterator over a file's lines in reverse physical order (last line first).
///
/// Each chunk read may cut a line in two; the partial head of a chunk is
/// held back and completed by the tail of the next (older) chunk before it
/// is yielded, so no line is ever truncated or duplicated. When the
/// physical start of the file is reached, the held segment is yielded as
/// the final (oldest) line. Blank lines are skipped.
#[derive(Debug)]
pub struct ReverseLineReader {
    file: File,
    /// Absolute offset of the first byte not yet read (we read backward).
    pos: u64,
    chunk_size: usize,
    /// Partial first line of the most recently read chunk; its start lies
    /// in an older chunk (or it is the first line of the file).
    carry: Vec<u8>,
    /// Complete lines from the current chunk, oldest first; popped from
    /// the back to yield newest first.
    pending: Vec<String>,
    done: bool,
}

impl ReverseLineReader {
    /// Open `path` and position at its current end.
    ///
    /// A missing file surfaces as `io::ErrorKind::NotFound`; callers treat
    /// that as "no data yet" rather than a fatal error.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_chunk_size(path, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let pos = file.metadata()?.len();
        Ok(Self {
            file,
            pos,
            chunk_size: chunk_size.max(1),
            carry: Vec::new(),
            pending: Vec::new(),
            done: false,
        })
    }

    /// Read the chunk immediately before `pos`, append the carry segment,
    /// and split into lines. The head piece becomes the new carry unless
    /// the physical start of the file was reached.
    fn read_prev_chunk(&mut self) -> io::Result<()> {
        let start = self.pos.saturating_sub(self.chunk_size as u64);
        let mut chunk = vec![0u8; (self.pos - start) as usize];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut chunk)?;
        self.pos = start;

        chunk.extend_from_slice(&self.carry);

        let mut pieces = chunk.split(|&b| b == b'\n');
        let head = pieces.next().unwrap_or_default().to_vec();
        for piece in pieces {
            if !piece.is_empty() {
                self.pending
                    .push(String::from_utf8_lossy(piece).into_owned());
            }
        }

        if start == 0 {
            self.done = true;
            self.carry.clear();
            if !head.is_empty() {
                // Oldest line of the file; yield it last.
                self.pending
                    .insert(0, String::from_utf8_lossy(&head).into_owned());
            }
        } else {
            self.carry = head;
        }
        Ok(())
    }
}

impl Iterator for ReverseLineReader {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.read_prev_chunk() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
