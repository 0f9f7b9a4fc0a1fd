//! Splits a backup archive into ordered part files.
//!
//! Parts are written next to the source as `<name>.part.<NNNN>`. The index is
//! zero-padded to at least four digits (wider when needed) so that sorting
//! part names lexically gives transfer order.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

use crate::{errors::Error, Result};

/// Block size for every streaming copy; no more than this is buffered at once.
pub const COPY_BLOCK_SIZE: usize = 64 * 1024;

const MIN_INDEX_WIDTH: usize = 4;

/// Split `path` into `ceil(size / max_part_bytes)` parts, in order.
///
/// The caller owns the returned files and must remove them (see
/// [`remove_parts`]). The source file is left untouched.
pub fn split(path: &Path, max_part_bytes: u64) -> Result<Vec<PathBuf>> {
    if max_part_bytes == 0 {
        return Err(Error::Config("chunk size must be greater than zero".to_string()));
    }

    let size = file_size(path)?;
    let count = part_count(size, max_part_bytes);
    let width = index_width(count);

    let mut src = File::open(path).map_err(|e| not_found_or_io(path, e))?;
    let mut buf = vec![0u8; COPY_BLOCK_SIZE];
    let mut parts = Vec::with_capacity(count as usize);
    let mut remaining = size;

    for index in 0..count {
        let part = part_path(path, index, width);
        let len = remaining.min(max_part_bytes);

        let written = File::create(&part)
            .map_err(Error::Io)
            .and_then(|f| copy_exact(&mut src, f, len, &mut buf));
        parts.push(part);

        if let Err(e) = written {
            remove_parts(&parts);
            return Err(e);
        }
        remaining -= len;
    }

    tracing::debug!(
        path = %path.display(),
        size,
        parts = parts.len(),
        "split backup into parts"
    );
    Ok(parts)
}

/// Number of parts `split` produces for a file of `size` bytes.
pub fn part_count(size: u64, max_part_bytes: u64) -> u64 {
    size.div_ceil(max_part_bytes)
}

/// Path of part `index` for `source`.
pub fn part_path(source: &Path, index: u64, width: usize) -> PathBuf {
    let mut name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "backup".into());
    name.push(format!(".part.{index:0width$}"));
    source.with_file_name(name)
}

fn index_width(count: u64) -> usize {
    let last = count.saturating_sub(1);
    last.to_string().len().max(MIN_INDEX_WIDTH)
}

fn copy_exact(src: &mut File, dst: File, len: u64, buf: &mut [u8]) -> Result<()> {
    let mut out = BufWriter::with_capacity(COPY_BLOCK_SIZE, dst);
    let mut left = len;
    while left > 0 {
        let want = (buf.len() as u64).min(left) as usize;
        let n = src.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source file shrank while splitting",
            )));
        }
        out.write_all(&buf[..n])?;
        left -= n as u64;
    }
    out.flush()?;
    Ok(())
}

/// Size of a local file, mapping "missing" to [`Error::NotFound`].
pub fn file_size(path: &Path) -> Result<u64> {
    let md = fs::metadata(path).map_err(|e| not_found_or_io(path, e))?;
    if !md.is_file() {
        return Err(Error::NotFound(format!("{} is not a file", path.display())));
    }
    Ok(md.len())
}

fn not_found_or_io(path: &Path, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound(format!("file does not exist: {}", path.display()))
    } else {
        Error::Io(e)
    }
}

/// Best-effort removal of generated part files.
pub fn remove_parts(parts: &[PathBuf]) {
    for p in parts {
        if let Err(e) = fs::remove_file(p) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %p.display(), error = %e, "failed to remove part file");
            }
        }
    }
}

/// Hex SHA-256 of a file, streamed in [`COPY_BLOCK_SIZE`] blocks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| not_found_or_io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
