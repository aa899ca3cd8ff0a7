//! Splits a clamd reply stream into numbered response slots.

use crate::error::FrameError;

/// Number of commands in a scrape that produce numbered replies
/// (PING, VERSION, STATS).
pub const SLOT_COUNT: usize = 3;

const ID_SEPARATOR: &[u8] = b": ";

/// Reply payloads of one session, indexed by request ID - 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSlots([Vec<u8>; SLOT_COUNT]);

impl ResponseSlots {
    pub fn new(ping: impl Into<Vec<u8>>, version: impl Into<Vec<u8>>, stats: impl Into<Vec<u8>>) -> Self {
        Self([ping.into(), version.into(), stats.into()])
    }

    pub fn ping(&self) -> &[u8] {
        &self.0[0]
    }

    pub fn version(&self) -> &[u8] {
        &self.0[1]
    }

    pub fn stats(&self) -> &[u8] {
        &self.0[2]
    }

    pub fn as_mut_slice(&mut self) -> &mut [Vec<u8>] {
        &mut self.0
    }
}

/// Parses `<ID>: <payload>\0` frames from `data` into `slots[ID - 1]`.
///
/// `data` must end on a frame boundary; nothing is buffered between calls.
/// A later frame with the same ID replaces the earlier payload. An empty
/// buffer is not an error.
pub fn demultiplex(mut data: &[u8], slots: &mut [Vec<u8>]) -> Result<(), FrameError> {
    while !data.is_empty() {
        let sep = data
            .windows(ID_SEPARATOR.len())
            .position(|w| w == ID_SEPARATOR)
            .ok_or(FrameError::MissingId)?;

        let id_text = String::from_utf8_lossy(&data[..sep]);
        let id: i64 = id_text
            .parse()
            .map_err(|_| FrameError::InvalidId(id_text.to_string()))?;
        if id < 1 || id > slots.len() as i64 {
            return Err(FrameError::IdOutOfRange(id));
        }

        data = &data[sep + ID_SEPARATOR.len()..];
        let end = data
            .iter()
            .position(|&b| b == 0)
            .ok_or(FrameError::MissingTerminator)?;

        slots[(id - 1) as usize] = data[..end].to_vec();
        data = &data[end + 1..];
    }

    Ok(())
}
