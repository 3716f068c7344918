use bytes::{Buf, Bytes};

/// An item of an outgoing body stream.
///
/// The chunked encoder turns each [`PayloadItem::Chunk`] into one chunk on the wire, and
/// [`PayloadItem::Eof`] into the terminal zero-size chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    /// A chunk of payload data
    Chunk(Data),
    /// Marks the end of the payload stream
    Eof,
}
