use anyhow::{Context, Result};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Maps `path` read-only for its full length. Empty files yield `None`
/// (a zero-length mapping is an error on Linux).
pub fn open_ro_map(path: impl AsRef<Path>) -> Result<Option<Mmap>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if len == 0 {
        return Ok(None);
    }
    let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?;
    Ok(Some(map))
}

/// Creates (or truncates) `path`, sizes it to exactly `len` bytes and
/// maps it writable. `len == 0` leaves an empty file and yields `None`.
pub fn create_rw_map(path: impl AsRef<Path>, len: u64) -> Result<Option<MmapMut>> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.set_len(len)
        .with_context(|| format!("truncate {} to {} bytes", path.display(), len))?;
    if len == 0 {
        return Ok(None);
    }
    let map =
        unsafe { MmapMut::map_mut(&file) }.with_context(|| format!("mmap {}", path.display()))?;
    Ok(Some(map))
}
