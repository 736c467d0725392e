pub trait Serialize<'a> {
    /// Writes the head of the message into `buf`.
    ///
    /// # Returns
    /// A trailing slice to be written right after `buf` without copying it, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
