//! Rotated archive fallback.
//!
//! Log rotation renames the live file to `<name>.1.gz` (then `.2.gz` and
//! so on) in the same directory. When the live file does not reach back
//! far enough for every window, the engine continues into the first
//! generation only; older generations are never read.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Path of the newest rotated archive for `file`: `<basename>.1.gz` next
/// to the live file. `None` when the path has no file name to derive from.
pub fn newest_archive(file: &Path) -> Option<PathBuf> {
    let name = file.file_name()?;
    let mut archive_name = name.to_os_string();
    archive_name.push(".1.gz");
    Some(file.with_file_name(archive_name))
}

/// Open a gzip archive as a buffered line reader. A missing archive
/// surfaces as `io::ErrorKind::NotFound`; callers skip the fallback.
pub fn open(path: &Path) -> io::Result<impl BufRead + std::fmt::Debug> {
    let file = File::open(path)?;
    Ok(BufReader::new(GzDecoder::new(file)))
}
