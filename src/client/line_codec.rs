//! Line framing for the WMP control port
//!
//! Inbound framing is delegated to a length-limited [`LinesCodec`]: each
//! complete line is yielded with its `\n` (and a trailing `\r`) stripped.
//! Empty lines are skipped. A line longer than [`MAX_LINE_LENGTH`] is
//! discarded up to and including its terminator, and so is a line that is not
//! valid UTF-8; both are logged and framing continues with the next line.
//! Outgoing commands are terminated with CRLF.

use crate::client::message::WmpCommand;
use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

/// Longest line accepted; longer lines are dropped whole
pub const MAX_LINE_LENGTH: usize = 4096;

/// CRLF line codec for WMP
#[derive(Debug, Clone)]
pub struct WmpLineCodec {
    lines: LinesCodec,
}

impl WmpLineCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for WmpLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WmpLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            match self.lines.decode(buf) {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(line) => return Ok(line),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        "Discarding inbound line longer than {} bytes",
                        MAX_LINE_LENGTH
                    );
                }
                // The offending line has already been consumed
                Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("Discarding inbound line that is not valid UTF-8");
                }
                Err(LinesCodecError::Io(e)) => return Err(e),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None => {
                // A partial line at EOF is dropped
                buf.clear();
                *self = Self::new();
                Ok(None)
            }
        }
    }
}

impl Encoder<WmpCommand> for WmpLineCodec {
    type Error = io::Error;

    fn encode(&mut self, command: WmpCommand, dst: &mut BytesMut) -> Result<(), io::Error> {
        let line = command.to_string();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
