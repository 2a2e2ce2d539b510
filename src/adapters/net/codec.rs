//! CR LF line codec for the game's text protocol.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

const TERMINATOR: &[u8; 2] = b"\r\n";

/// Splits an inbound byte stream into `CR LF` terminated lines.
///
/// Lines are decoded as UTF-8 with invalid sequences replaced by U+FFFD.
/// Bytes after the last terminator stay in the buffer until more data
/// arrives; whatever is left unterminated at end of stream is dropped.
#[derive(Debug, Default)]
pub struct CrlfLineCodec {
    // Offset already scanned without finding a terminator.
    next_index: usize,
}

impl CrlfLineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for CrlfLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let start = self.next_index.min(buf.len());
        match find_terminator(&buf[start..]) {
            Some(offset) => {
                let line = buf.split_to(start + offset);
                buf.advance(TERMINATOR.len());
                self.next_index = 0;
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            None => {
                // A trailing CR may be completed by the next read.
                self.next_index = buf.len().saturating_sub(1);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "discarding unterminated input at end of stream");
            buf.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack.windows(TERMINATOR.len()).position(|window| window == TERMINATOR)
}
