use super::SharedChannel;
use crate::error::{Error, Result};

const CHUNK: usize = 512;

/// Reads one `\n`-terminated line in bulk and leaves the channel positioned just past the line
/// feed. Returns `None` at the end of the channel.
///
/// A line longer than `max` bytes, or one cut off by the end of the channel, is treated as
/// corruption.
pub fn read_line(channel: &mut SharedChannel, max: usize) -> Result<Option<String>> {
    let mut line = Vec::new();
    let mut chunk = [0u8; CHUNK];

    loop {
        let read = channel.read(&mut chunk)?;
        if read == 0 {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(Error::corrupted(format!(
                "line truncated by the end of data at offset {:#x}",
                channel.start() + channel.position()
            )));
        }

        if let Some(lf) = chunk[..read].iter().position(|b| *b == b'\n') {
            line.extend_from_slice(&chunk[..lf]);
            let overshoot = (read - lf - 1) as u64;
            channel.seek(channel.position() - overshoot)?;
            break;
        }

        line.extend_from_slice(&chunk[..read]);
        if line.len() > max {
            break;
        }
    }

    if line.len() > max {
        return Err(Error::corrupted(format!("line exceeds {} bytes", max)));
    }

    String::from_utf8(line)
        .map(Some)
        .map_err(|_| Error::corrupted("line is not valid UTF-8"))
}
