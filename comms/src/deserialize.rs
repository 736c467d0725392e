use std::io;

/// Parses a message out of a received frame, borrowing from it where possible.
pub trait Deserialize<'a>: Sized {
    /// # Returns
    /// `InvalidData` if `buf` is not a valid frame body.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
