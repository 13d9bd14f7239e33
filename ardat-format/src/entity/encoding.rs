use std::fmt;

use crate::error::{Error, Result};

/// Property listing the encodings applied to a file's stored content, first applied first.
pub const ENCODING_KEY: &str = "encoding";

const ENCODING_SEP: char = ',';

/// Bytes pulled from the layer below per refill. Even, so hex pairs never straddle a refill.
const WINDOW: usize = 1024;

/// A reversible transformation of file content, applied on the way into an archive and undone on
/// the way out.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub enum ContentEncoding {
    /// Every byte as two lowercase hexadecimal digits.
    Hex,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Hex => "hex",
        }
    }

    pub fn parse(value: &str) -> Result<ContentEncoding> {
        match value {
            "hex" => Ok(ContentEncoding::Hex),
            other => Err(Error::corrupted(format!("unknown content encoding '{}'", other))),
        }
    }

    /// Parses an `encoding` property value into its layers, first applied first.
    pub fn parse_list(value: &str) -> Result<Vec<ContentEncoding>> {
        value.split(ENCODING_SEP).map(ContentEncoding::parse).collect()
    }

    /// Appends `self` to an existing `encoding` property value.
    pub(crate) fn append_to(&self, value: Option<&str>) -> String {
        match value {
            Some(list) => format!("{}{}{}", list, ENCODING_SEP, self.as_str()),
            None => self.as_str().to_string(),
        }
    }

    pub fn encoded_size(&self, size: u64) -> u64 {
        match self {
            ContentEncoding::Hex => size * 2,
        }
    }

    pub fn decoded_size(&self, size: u64) -> Result<u64> {
        match self {
            ContentEncoding::Hex if size % 2 != 0 => Err(Error::corrupted(format!(
                "hex encoded content has an odd length of {} bytes",
                size
            ))),
            ContentEncoding::Hex => Ok(size / 2),
        }
    }

    fn encode(&self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        match self {
            ContentEncoding::Hex => {
                output.resize(input.len() * 2, 0);
                hex::encode_to_slice(input, output)
                    .map_err(|e| Error::corrupted(format!("hex encoding failed: {}", e)))
            }
        }
    }

    fn decode(&self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        match self {
            ContentEncoding::Hex => {
                output.resize(input.len() / 2, 0);
                hex::decode_to_slice(input, output)
                    .map_err(|e| Error::corrupted(format!("invalid hex content: {}", e)))
            }
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Encode,
    Decode,
}

/// One encoding step stacked over a file's raw content. Holds the output of the last refill that
/// the reader hasn't taken yet.
#[derive(Debug)]
pub(crate) struct Layer {
    encoding: ContentEncoding,
    direction: Direction,
    input: Vec<u8>,
    output: Vec<u8>,
    consumed: usize,
}

impl Layer {
    pub(crate) fn new(encoding: ContentEncoding, direction: Direction) -> Layer {
        Layer {
            encoding,
            direction,
            input: vec![0u8; WINDOW],
            output: Vec::new(),
            consumed: 0,
        }
    }

    pub(crate) fn size(&self, inner: u64) -> Result<u64> {
        match self.direction {
            Direction::Encode => Ok(self.encoding.encoded_size(inner)),
            Direction::Decode => self.encoding.decoded_size(inner),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.output.clear();
        self.consumed = 0;
    }

    /// Fills `buf` from the processed output, refilling from `inner` as needed. Returns 0 once
    /// `inner` is exhausted and everything processed has been handed out.
    pub(crate) fn read<F>(&mut self, buf: &mut [u8], mut inner: F) -> Result<usize>
    where
        F: FnMut(&mut [u8]) -> Result<usize>,
    {
        loop {
            let available = self.output.len() - self.consumed;
            if available > 0 {
                let n = std::cmp::min(available, buf.len());
                buf[..n].copy_from_slice(&self.output[self.consumed..self.consumed + n]);
                self.consumed += n;
                return Ok(n);
            }

            let mut filled = 0;
            while filled < self.input.len() {
                let n = inner(&mut self.input[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                return Ok(0);
            }

            self.consumed = 0;
            match self.direction {
                Direction::Encode => self.encoding.encode(&self.input[..filled], &mut self.output)?,
                Direction::Decode => {
                    self.encoding.decoded_size(filled as u64)?;
                    self.encoding.decode(&self.input[..filled], &mut self.output)?
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(layer: &mut Layer, data: &[u8], chunk: usize) -> Result<Vec<u8>> {
        let mut source = data;
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = layer.read(&mut buf, |dst| {
                let n = std::cmp::min(dst.len(), source.len());
                dst[..n].copy_from_slice(&source[..n]);
                source = &source[n..];
                Ok(n)
            })?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn hex_layers() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        let encoded = drain(&mut Layer::new(ContentEncoding::Hex, Direction::Encode), &data, 7).unwrap();
        assert_eq!(encoded, hex::encode(&data).into_bytes());
        assert_eq!(&encoded[..6], b"000102");

        let decoded = drain(&mut Layer::new(ContentEncoding::Hex, Direction::Decode), &encoded, 4096).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn bad_hex_is_corruption() {
        for input in [&b"abc"[..], &b"zz"[..]] {
            let mut layer = Layer::new(ContentEncoding::Hex, Direction::Decode);
            assert!(matches!(drain(&mut layer, input, 16), Err(Error::ArchiveCorrupted(_))));
        }
    }

    #[test]
    fn property_lists() {
        assert_eq!(
            ContentEncoding::parse_list("hex,hex").unwrap(),
            [ContentEncoding::Hex, ContentEncoding::Hex]
        );
        assert_eq!(ContentEncoding::Hex.append_to(Some("hex")), "hex,hex");
        assert!(matches!(ContentEncoding::parse_list("rot13"), Err(Error::ArchiveCorrupted(_))));
        assert_eq!(ContentEncoding::Hex.decoded_size(6).unwrap(), 3);
        assert!(ContentEncoding::Hex.decoded_size(5).is_err());
    }
}
