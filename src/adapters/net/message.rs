//! Outbound messages queued on a connection.

use std::ops::BitOr;

use bytes::Bytes;

/// Bit flags attached to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutFlags(u8);

impl OutFlags {
    pub const NONE: Self = Self(0);
    /// Close the connection once this message has been written and flushed.
    pub const CLOSE: Self = Self(1);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for OutFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Raw bytes to write to a client plus delivery flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutMessage {
    pub data: Bytes,
    pub flags: OutFlags,
}

impl OutMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), flags: OutFlags::NONE }
    }

    /// A text line; `CR LF` is appended.
    pub fn line(text: impl AsRef<str>) -> Self {
        let text = text.as_ref();
        let mut data = Vec::with_capacity(text.len() + 2);
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(b"\r\n");
        Self::new(data)
    }

    /// Write `data`, then close the connection.
    pub fn close(data: impl Into<Bytes>) -> Self {
        Self::new(data).with_flags(OutFlags::CLOSE)
    }

    #[must_use]
    pub fn with_flags(mut self, flags: OutFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn closes_connection(&self) -> bool {
        self.flags.contains(OutFlags::CLOSE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert!(OutFlags::NONE.is_empty());
        assert!(!OutFlags::NONE.contains(OutFlags::CLOSE));
        assert!((OutFlags::NONE | OutFlags::CLOSE).contains(OutFlags::CLOSE));
        assert!(!OutFlags::CLOSE.contains(OutFlags::NONE));
    }

    #[test]
    fn test_line_appends_crlf() {
        let msg = OutMessage::line("Welcome!");
        assert_eq!(&msg.data[..], b"Welcome!\r\n");
        assert!(!msg.closes_connection());
    }

    #[test]
    fn test_close_message() {
        let msg = OutMessage::close(&b"Goodbye\r\n"[..]);
        assert!(msg.closes_connection());
        assert_eq!(msg.flags.bits(), 1);
    }
}
