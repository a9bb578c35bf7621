//! Multipart messages
//!
//! Every message on a broker socket is an ordered list of opaque frames.
//! Routing information travels as leading frames, separated from the
//! application payload by an empty delimiter frame.

use bytes::Bytes;

/// An ordered list of frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart(Vec<Bytes>);

impl Multipart {
    /// Create an empty message
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Create a message from existing frames
    pub fn from_frames(frames: Vec<Bytes>) -> Self {
        Self(frames)
    }

    /// Append a frame
    pub fn push(&mut self, frame: impl Into<Bytes>) {
        self.0.push(frame.into());
    }

    /// Append an empty delimiter frame
    pub fn push_delimiter(&mut self) {
        self.0.push(Bytes::new());
    }

    /// Prepend a frame
    pub fn push_front(&mut self, frame: impl Into<Bytes>) {
        self.0.insert(0, frame.into());
    }

    /// Builder-style append
    pub fn with(mut self, frame: impl Into<Bytes>) -> Self {
        self.push(frame);
        self
    }

    /// Borrow all frames
    pub fn frames(&self) -> &[Bytes] {
        &self.0
    }

    /// Take ownership of the frames
    pub fn into_frames(self) -> Vec<Bytes> {
        self.0
    }

    /// Get a frame by position
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.0.get(index)
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the message has no frames
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split off the leading frame, returning it and the remainder
    pub fn split_first(mut self) -> Option<(Bytes, Multipart)> {
        if self.0.is_empty() {
            return None;
        }
        let first = self.0.remove(0);
        Some((first, self))
    }

    /// Total payload size across all frames
    pub fn byte_len(&self) -> usize {
        self.0.iter().map(Bytes::len).sum()
    }
}

impl From<Vec<Bytes>> for Multipart {
    fn from(frames: Vec<Bytes>) -> Self {
        Self(frames)
    }
}

impl<F: Into<Bytes>> FromIterator<F> for Multipart {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for Multipart {
    type Item = Bytes;
    type IntoIter = std::vec::IntoIter<Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
