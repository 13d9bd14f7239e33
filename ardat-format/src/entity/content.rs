use std::path::{Path, PathBuf};

use super::encoding::{ContentEncoding, Direction, Layer};
use crate::channel::{ChannelFactory, SharedChannel};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Locator {
    path: PathBuf,
    start: u64,
    size: Option<u64>,
}

/// The bytes of a file entity: where they live, and the view over them while it is bound.
///
/// Releasing the view keeps the location, so the content can be bound again later through the
/// same factory. Encoding layers, if any, sit between the view and the reader; the last one added
/// is the one read from.
#[derive(Debug)]
pub struct ContentSource {
    factory: ChannelFactory,
    locator: Locator,
    channel: Option<SharedChannel>,
    layers: Vec<Layer>,
}

impl ContentSource {
    /// Unbound content spanning the whole file at `path`.
    pub fn from_path<P: Into<PathBuf>>(factory: &ChannelFactory, path: P) -> ContentSource {
        ContentSource {
            factory: factory.clone(),
            locator: Locator {
                path: path.into(),
                start: 0,
                size: None,
            },
            channel: None,
            layers: Vec::new(),
        }
    }

    /// Unbound content over `[start, start + size)` of the file at `path`.
    pub fn from_range<P: Into<PathBuf>>(
        factory: &ChannelFactory,
        path: P,
        start: u64,
        size: u64,
    ) -> ContentSource {
        ContentSource {
            factory: factory.clone(),
            locator: Locator {
                path: path.into(),
                start,
                size: Some(size),
            },
            channel: None,
            layers: Vec::new(),
        }
    }

    /// Content already bound to `channel`. Its window is remembered for re-binding.
    pub fn from_channel(factory: &ChannelFactory, channel: SharedChannel) -> ContentSource {
        ContentSource {
            factory: factory.clone(),
            locator: Locator {
                path: channel.path().to_path_buf(),
                start: channel.start(),
                size: Some(channel.size()),
            },
            channel: Some(channel),
            layers: Vec::new(),
        }
    }

    /// Content read through `encoding`, on top of any layers already present.
    pub fn encoded(mut self, encoding: ContentEncoding) -> ContentSource {
        self.layers.push(Layer::new(encoding, Direction::Encode));
        self
    }

    /// Content read with `encoding` undone, on top of any layers already present.
    pub fn decoded(mut self, encoding: ContentEncoding) -> ContentSource {
        self.layers.push(Layer::new(encoding, Direction::Decode));
        self
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.locator.path
    }

    pub fn is_opened(&self) -> bool {
        self.channel.as_ref().map_or(false, SharedChannel::is_open)
    }

    /// Number of bytes a reader gets, after every layer.
    pub fn size(&self) -> Result<u64> {
        let raw = self.raw_size()?;
        self.layers.iter().try_fold(raw, |size, layer| layer.size(size))
    }

    fn raw_size(&self) -> Result<u64> {
        if let Some(channel) = self.channel.as_ref().filter(|c| c.is_open()) {
            return Ok(channel.size());
        }
        match self.locator.size {
            Some(size) => Ok(size),
            None => {
                let len = std::fs::metadata(&self.locator.path)?.len();
                Ok(len.saturating_sub(self.locator.start))
            }
        }
    }

    pub fn open(&mut self) -> Result<()> {
        if self.is_opened() {
            return Ok(());
        }

        let locator = &self.locator;
        let channel = match locator.size {
            Some(size) => self.factory.open_range(&locator.path, locator.start, size)?,
            None => self.factory.open_from(&locator.path, locator.start)?,
        };
        self.channel = Some(channel);
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.channel.as_mut() {
            Some(channel) => read_layers(&mut self.layers, channel, buf),
            None => Err(Error::ClosedChannel),
        }
    }

    pub fn rewind(&mut self) -> Result<()> {
        match self.channel.as_mut() {
            Some(channel) => {
                self.layers.iter_mut().for_each(Layer::reset);
                channel.seek(0)
            }
            None => Err(Error::ClosedChannel),
        }
    }

    pub fn release(&mut self) {
        self.layers.iter_mut().for_each(Layer::reset);
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}

fn read_layers(layers: &mut [Layer], channel: &mut SharedChannel, buf: &mut [u8]) -> Result<usize> {
    match layers.split_last_mut() {
        Some((outer, inner)) => outer.read(buf, |dst| read_layers(&mut *inner, &mut *channel, dst)),
        None => channel.read(buf),
    }
}
