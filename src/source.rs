// Sources:
// - https://doc.rust-lang.org/std/os/unix/fs/trait.FileExt.html

//! Positioned reads against the medium holding the volume.
//!
//! Each read names its own offset, so no cursor is shared between callers.
//! A plain `Read + Seek` source is usable through a `Mutex`, which keeps a
//! seek and its read together.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

/// A byte source that can fill a buffer from an absolute offset.
pub trait ReadAt {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl ReadAt for [u8] {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let src = usize::try_from(offset)
            .ok()
            .and_then(|start| self.get(start..start.checked_add(buf.len())?))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of buffer")
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl ReadAt for Vec<u8> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_slice().read_exact_at(offset, buf)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<R: Read + Seek> ReadAt for Mutex<R> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut inner = self
            .lock()
            .map_err(|_| io::Error::other("byte source lock poisoned"))?;
        inner.seek(SeekFrom::Start(offset))?;
        inner.read_exact(buf)
    }
}

#[cfg(unix)]
impl ReadAt for std::fs::File {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }
}
