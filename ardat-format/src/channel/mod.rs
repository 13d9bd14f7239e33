//! Range-bounded views over shared file descriptors.
//!
//! A [`SharedChannel`] is a window `[start, start + size)` onto a file, with its own position.
//! Any number of windows may share one OS handle; the [`ChannelFactory`] hands them out and
//! counts them, and the handle is closed when the last window closes.

mod factory;
mod lines;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

pub use self::factory::ChannelFactory;
pub(crate) use self::factory::{Access, Descriptor};
pub use self::lines::read_line;
use crate::error::{Error, RangeError, Result};

#[derive(Debug)]
pub struct SharedChannel {
    descriptor: Arc<Descriptor>,
    start: u64,
    size: u64,
    position: u64,
    growable: bool,
    open: bool,
}

impl SharedChannel {
    pub(crate) fn new(descriptor: Arc<Descriptor>, start: u64, size: u64, growable: bool) -> Self {
        SharedChannel {
            descriptor,
            start,
            size,
            position: 0,
            growable,
            open: true,
        }
    }

    #[inline(always)]
    pub(crate) fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    #[inline(always)]
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::ClosedChannel)
        }
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        self.descriptor.path()
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[inline(always)]
    pub fn is_growable(&self) -> bool {
        self.growable
    }

    /// Absolute offset of the window in the underlying file.
    #[inline(always)]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline(always)]
    pub fn remaining(&self) -> u64 {
        self.size - self.position
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.ensure_open()?;
        if position > self.size {
            return Err(RangeError::OutOfBounds {
                start: position,
                size: 0,
                extent: self.size,
            }
            .into());
        }
        self.position = position;
        Ok(())
    }

    /// Reads from the current position, never past the end of the window. Returns `0` once the
    /// position has reached the window size.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() || self.position >= self.size {
            return Ok(0);
        }

        let wanted = std::cmp::min(buf.len() as u64, self.size - self.position) as usize;
        let at = self.start + self.position;
        let read = self.descriptor.with_file(|file| {
            file.seek(SeekFrom::Start(at))?;
            loop {
                match file.read(&mut buf[..wanted]) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    result => break result,
                }
            }
        })?;

        if read == 0 {
            // The file ended inside our window.
            return Err(RangeError::OutOfBounds {
                start: self.start,
                size: self.size,
                extent: at,
            }
            .into());
        }

        self.position += read as u64;
        Ok(read)
    }

    /// Reads until `buf` is full.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 => {
                    return Err(RangeError::Exceeded {
                        requested: self.position + (buf.len() - filled) as u64,
                        limit: self.size,
                    }
                    .into())
                }
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Writes all of `buf` at the current position. Growable views extend their size; bounded
    /// views refuse writes that would pass the end of the window.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if self.descriptor.access() == Access::Read {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "view is read-only").into());
        }

        let end = self.position + buf.len() as u64;
        if !self.growable && end > self.size {
            return Err(RangeError::Exceeded {
                requested: end,
                limit: self.size,
            }
            .into());
        }

        let at = self.start + self.position;
        self.descriptor.with_file(|file| {
            file.seek(SeekFrom::Start(at))?;
            file.write_all(buf)
        })?;

        self.position = end;
        if end > self.size {
            self.size = end;
        }
        Ok(buf.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.descriptor.with_file(|file| file.flush())
    }

    /// Rebinds the window to `[start, start + size)` in absolute file coordinates.
    pub fn set_range(&mut self, start: u64, size: u64) -> Result<()> {
        self.ensure_open()?;
        let extent = self.descriptor.extent()?;
        if start.checked_add(size).map_or(true, |end| end > extent) {
            return Err(RangeError::OutOfBounds {
                start,
                size,
                extent,
            }
            .into());
        }

        self.start = start;
        self.size = size;
        self.position = std::cmp::min(self.position, size);
        Ok(())
    }

    /// Moves the window to `start`, keeping its size where the file allows.
    pub fn set_range_from(&mut self, start: u64) -> Result<()> {
        self.ensure_open()?;
        let extent = self.descriptor.extent()?;
        let available = extent.checked_sub(start).ok_or(RangeError::OutOfBounds {
            start,
            size: 0,
            extent,
        })?;
        self.set_range(start, std::cmp::min(self.size, available))
    }

    pub fn set_size(&mut self, size: u64) -> Result<()> {
        if !self.growable {
            return self.set_range(self.start, size);
        }

        self.ensure_open()?;
        let end = self.start + size;
        self.descriptor.with_file(|file| {
            if file.metadata()?.len() < end {
                file.set_len(end)?;
            }
            Ok(())
        })?;
        self.size = size;
        self.position = std::cmp::min(self.position, size);
        Ok(())
    }

    /// Shrinks the window. Growable views shrink the underlying file along with it.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.ensure_open()?;
        if size > self.size {
            return Err(RangeError::Exceeded {
                requested: size,
                limit: self.size,
            }
            .into());
        }

        if self.growable {
            let end = self.start + size;
            self.descriptor.with_file(|file| file.set_len(end))?;
        }
        self.size = size;
        self.position = std::cmp::min(self.position, size);
        Ok(())
    }

    /// Releases this view's hold on the descriptor. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            self.descriptor.release();
        }
    }
}

impl Drop for SharedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for SharedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(SharedChannel::read(self, buf)?)
    }
}

impl Write for SharedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(SharedChannel::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(SharedChannel::flush(self)?)
    }
}

impl Seek for SharedChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => add_signed(self.size, d),
            SeekFrom::Current(d) => add_signed(self.position, d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of window")
        })?;
        SharedChannel::seek(self, target)?;
        Ok(target)
    }
}

#[inline(always)]
fn add_signed(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}
