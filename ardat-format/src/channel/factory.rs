use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::SharedChannel;
use crate::error::{Error, RangeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Access {
    Read,
    ReadWrite,
}

type DescriptorKey = (PathBuf, Access);

#[derive(Debug, Default)]
struct Registry {
    descriptors: Mutex<HashMap<DescriptorKey, Weak<Descriptor>>>,
}

impl Registry {
    #[inline(always)]
    fn lock(&self) -> MutexGuard<'_, HashMap<DescriptorKey, Weak<Descriptor>>> {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One OS file handle, shared by every view the factory hands out for it.
///
/// `refs` counts open views. It only reaches zero under the registry lock, and the handle is
/// dropped at that moment.
#[derive(Debug)]
pub(crate) struct Descriptor {
    path: PathBuf,
    access: Access,
    file: Mutex<Option<File>>,
    refs: AtomicUsize,
    registry: Arc<Registry>,
}

impl Descriptor {
    #[inline(always)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    #[inline(always)]
    pub(crate) fn access(&self) -> Access {
        self.access
    }

    /// Runs `f` with the descriptor lock held. Every seek-then-I/O sequence goes through here so
    /// it is atomic with respect to sibling views.
    pub(crate) fn with_file<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut File) -> io::Result<T>,
    {
        let mut guard = self.file.lock().map_err(|_| {
            io::Error::new(io::ErrorKind::Other, "descriptor lock poisoned")
        })?;
        let file = guard.as_mut().ok_or(Error::ClosedChannel)?;
        Ok(f(file)?)
    }

    /// The true extent of the underlying file.
    #[inline(always)]
    pub(crate) fn extent(&self) -> Result<u64> {
        self.with_file(|file| Ok(file.metadata()?.len()))
    }

    #[inline(always)]
    fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let mut descriptors = self.registry.lock();
        if self.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let key = (self.path.clone(), self.access);
        if let Some(entry) = descriptors.get(&key) {
            if std::ptr::eq(entry.as_ptr(), self) {
                descriptors.remove(&key);
            }
        }
        drop(descriptors);

        let file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(file);
        tracing::debug!(path = %self.path.display(), access = ?self.access, "closed descriptor");
    }
}

/// Creates shared channels, and is the only owner of the OS file handles behind them.
///
/// Opening the same path twice through one factory reuses the already open handle and bumps its
/// reference count. Clones of a factory share the same registry.
#[derive(Debug, Clone, Default)]
pub struct ChannelFactory {
    registry: Arc<Registry>,
}

impl ChannelFactory {
    pub fn new() -> ChannelFactory {
        ChannelFactory::default()
    }

    /// Read view over the whole file.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<SharedChannel> {
        let mut channel = self.view(path.as_ref(), Access::Read)?;
        let extent = channel.descriptor().extent()?;
        channel.set_range(0, extent)?;
        Ok(channel)
    }

    /// Read view over `[start, start + size)`.
    pub fn open_range<P: AsRef<Path>>(&self, path: P, start: u64, size: u64) -> Result<SharedChannel> {
        let mut channel = self.view(path.as_ref(), Access::Read)?;
        channel.set_range(start, size)?;
        Ok(channel)
    }

    /// Read view from `start` to the current end of the file.
    pub fn open_from<P: AsRef<Path>>(&self, path: P, start: u64) -> Result<SharedChannel> {
        let mut channel = self.view(path.as_ref(), Access::Read)?;
        let extent = channel.descriptor().extent()?;
        if start > extent {
            return Err(RangeError::OutOfBounds {
                start,
                size: 0,
                extent,
            }
            .into());
        }
        channel.set_range(start, extent - start)?;
        Ok(channel)
    }

    /// Creates a new file, erroring if it already exists, and returns a growable read-write view
    /// over it.
    pub fn create<P: AsRef<Path>>(&self, path: P) -> Result<SharedChannel> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;

        let mut descriptors = self.registry.lock();
        let descriptor = Arc::new(Descriptor {
            path: path.clone(),
            access: Access::ReadWrite,
            file: Mutex::new(Some(file)),
            refs: AtomicUsize::new(1),
            registry: Arc::clone(&self.registry),
        });
        descriptors.insert((path, Access::ReadWrite), Arc::downgrade(&descriptor));
        drop(descriptors);

        tracing::debug!(path = %descriptor.path().display(), "created descriptor");
        Ok(SharedChannel::new(descriptor, 0, 0, true))
    }

    /// New bounded view over `[offset, offset + size)` of `channel`'s window, sharing its
    /// descriptor.
    pub fn derive(&self, channel: &SharedChannel, offset: u64, size: u64) -> Result<SharedChannel> {
        channel.ensure_open()?;
        let end = offset.checked_add(size);
        if end.map_or(true, |end| end > channel.size()) {
            return Err(RangeError::OutOfBounds {
                start: offset,
                size,
                extent: channel.size(),
            }
            .into());
        }

        let descriptor = Arc::clone(channel.descriptor());
        descriptor.retain();
        Ok(SharedChannel::new(
            descriptor,
            channel.start() + offset,
            size,
            false,
        ))
    }

    /// Like [`derive`](Self::derive), spanning to the end of `channel`'s window.
    pub fn derive_from(&self, channel: &SharedChannel, offset: u64) -> Result<SharedChannel> {
        let size = channel.size().checked_sub(offset).ok_or(RangeError::OutOfBounds {
            start: offset,
            size: 0,
            extent: channel.size(),
        })?;
        self.derive(channel, offset, size)
    }

    /// A second view over exactly the same window.
    pub fn duplicate(&self, channel: &SharedChannel) -> Result<SharedChannel> {
        self.derive(channel, 0, channel.size())
    }

    /// Number of OS handles currently held open by this factory.
    pub fn open_descriptors(&self) -> usize {
        self.registry
            .lock()
            .values()
            .filter(|d| d.strong_count() > 0)
            .count()
    }

    /// Sum of open views over `path`, across access modes.
    pub fn reference_count<P: AsRef<Path>>(&self, path: P) -> usize {
        let path = match path.as_ref().canonicalize() {
            Ok(path) => path,
            Err(_) => return 0,
        };
        self.registry
            .lock()
            .iter()
            .filter(|((p, _), _)| *p == path)
            .filter_map(|(_, d)| d.upgrade())
            .map(|d| d.refs.load(Ordering::Acquire))
            .sum()
    }

    fn view(&self, path: &Path, access: Access) -> Result<SharedChannel> {
        let path = path.canonicalize()?;
        let key = (path, access);

        let mut descriptors = self.registry.lock();
        if let Some(descriptor) = descriptors.get(&key).and_then(Weak::upgrade) {
            if descriptor.refs.load(Ordering::Acquire) > 0 {
                descriptor.retain();
                return Ok(SharedChannel::new(descriptor, 0, 0, false));
            }
        }

        let file = match access {
            Access::Read => OpenOptions::new().read(true).open(&key.0)?,
            Access::ReadWrite => OpenOptions::new().read(true).write(true).open(&key.0)?,
        };
        let descriptor = Arc::new(Descriptor {
            path: key.0.clone(),
            access,
            file: Mutex::new(Some(file)),
            refs: AtomicUsize::new(1),
            registry: Arc::clone(&self.registry),
        });
        descriptors.insert(key, Arc::downgrade(&descriptor));
        drop(descriptors);

        tracing::debug!(path = %descriptor.path().display(), access = ?access, "opened descriptor");
        Ok(SharedChannel::new(descriptor, 0, 0, false))
    }
}
