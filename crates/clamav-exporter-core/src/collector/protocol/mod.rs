//! clamd multiplexed session protocol.
//!
//! Commands are sent in the null-terminated envelope `z<COMMAND>\0`. Inside
//! an `IDSESSION` every command that produces a reply gets a 1-based request
//! ID, and the reply comes back as `<ID>: <payload>\0`. `IDSESSION` and `END`
//! do not produce numbered replies.

pub mod demux;

pub use demux::{ResponseSlots, SLOT_COUNT, demultiplex};

/// Exact payload of a healthy `PING` reply.
pub const PING_ACK: &[u8] = b"PONG";

/// Marker byte that selects the null-terminated command format.
const ENVELOPE_PREFIX: u8 = b'z';

/// Commands sent during one scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    IdSession,
    Ping,
    Version,
    Stats,
    End,
}

impl Command {
    /// Fixed command order of a scrape session.
    pub const SCRAPE_SEQUENCE: [Command; 5] = [
        Command::IdSession,
        Command::Ping,
        Command::Version,
        Command::Stats,
        Command::End,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::IdSession => "IDSESSION",
            Command::Ping => "PING",
            Command::Version => "VERSION",
            Command::Stats => "STATS",
            Command::End => "END",
        }
    }

    /// Wraps the command in the `z<COMMAND>\0` envelope.
    pub fn encode(self) -> Vec<u8> {
        let name = self.name().as_bytes();
        let mut frame = Vec::with_capacity(name.len() + 2);
        frame.push(ENVELOPE_PREFIX);
        frame.extend_from_slice(name);
        frame.push(0);
        frame
    }
}
