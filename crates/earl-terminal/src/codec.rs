//! Line framing for the terminal wire protocol.
//!
//! The firmware speaks newline-terminated ASCII, one command or event per
//! line. The codec extracts complete lines from the byte stream (partial
//! reads are buffered), strips the terminator and a stray `\r`, and on
//! the way out appends the newline.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use earl_core::Error;

/// A serial line in a bad state can produce endless garbage without a
/// newline; cap the buffer and drop it instead of growing forever.
const MAX_LINE_LENGTH: usize = 1024;

#[derive(Debug, Default)]
pub struct TerminalCodec;

impl TerminalCodec {
    pub fn new() -> Self {
        TerminalCodec
    }
}

impl Decoder for TerminalCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Error> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_LINE_LENGTH {
                // Unterminated garbage; discard and resynchronize.
                src.clear();
            }
            return Ok(None);
        };
        let line = src.split_to(pos + 1);
        let mut end = pos;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
        Ok(Some(
            String::from_utf8_lossy(&line[..end]).into_owned(),
        ))
    }
}

impl Encoder<String> for TerminalCodec {
    type Error = Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Error> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
