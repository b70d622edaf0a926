//! Messages flowing through the pipeline.
//!
//! A [`Batch`] is an ordered group of [`MessagePart`]s processed as one transactional unit. Part
//! order is significant: it defines multipart section order and per-part dispatch order.

use std::ops::Index;

use bytes::Bytes;
use indexmap::IndexMap;

use crate::transaction::ResultStore;

/// Key/value metadata attached to a single message part.
pub type Metadata = IndexMap<String, String>;

/// An immutable payload with mutable metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagePart {
    payload: Bytes,
    metadata: Metadata,
}

impl MessagePart {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_insert(key, value);
        self
    }

    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn metadata_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Inserts a metadata value, replacing any previous value stored under `key`.
    pub fn metadata_insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl From<&'static str> for MessagePart {
    fn from(payload: &'static str) -> Self {
        Self::new(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<Vec<u8>> for MessagePart {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<String> for MessagePart {
    fn from(payload: String) -> Self {
        Self::new(payload)
    }
}

/// Side information the upstream pipeline associates with a batch.
///
/// The batch does not own anything referenced from here: a result store is a shared handle owned
/// by whoever created it, and is only ever written to.
#[derive(Clone, Debug, Default)]
pub struct BatchContext {
    result_store: Option<ResultStore>,
}

impl BatchContext {
    pub const fn result_store(&self) -> Option<&ResultStore> {
        self.result_store.as_ref()
    }
}

/// An ordered sequence of message parts.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    parts: Vec<MessagePart>,
    context: BatchContext,
}

impl Batch {
    pub fn new(parts: Vec<MessagePart>) -> Self {
        Self {
            parts,
            context: BatchContext::default(),
        }
    }

    /// Builds a batch from raw payloads, one part per payload.
    pub fn from_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        Self::new(payloads.into_iter().map(MessagePart::new).collect())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MessagePart> {
        self.parts.get(index)
    }

    pub fn first(&self) -> Option<&MessagePart> {
        self.parts.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessagePart> {
        self.parts.iter()
    }

    pub fn push(&mut self, part: MessagePart) {
        self.parts.push(part);
    }

    pub const fn context(&self) -> &BatchContext {
        &self.context
    }

    /// Associates a result store with this batch. Replies correlated from writes of this batch
    /// are appended to it.
    pub fn attach_result_store(&mut self, store: ResultStore) {
        self.context.result_store = Some(store);
    }

    pub fn result_store(&self) -> Option<&ResultStore> {
        self.context.result_store()
    }

    /// Splits the batch into one-part batches, in order, each sharing this batch's context.
    pub fn split_parts(&self) -> impl Iterator<Item = Batch> + '_ {
        self.parts.iter().map(|part| Batch {
            parts: vec![part.clone()],
            context: self.context.clone(),
        })
    }

    pub fn into_parts(self) -> Vec<MessagePart> {
        self.parts
    }
}

impl Index<usize> for Batch {
    type Output = MessagePart;

    fn index(&self, index: usize) -> &Self::Output {
        &self.parts[index]
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a MessagePart;
    type IntoIter = std::slice::Iter<'a, MessagePart>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}

impl FromIterator<MessagePart> for Batch {
    fn from_iter<T: IntoIterator<Item = MessagePart>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_parts_preserves_order_and_context() {
        let store = ResultStore::new();
        let mut batch = Batch::from_payloads(["a", "b", "c"]);
        batch.attach_result_store(store.clone());

        let split = batch.split_parts().collect::<Vec<_>>();

        assert_eq!(split.len(), 3);
        for (single, expected) in split.iter().zip(["a", "b", "c"]) {
            assert_eq!(single.len(), 1);
            assert_eq!(single[0].payload(), &Bytes::from(expected));
            assert!(single.result_store().is_some());
        }
    }

    #[test]
    fn metadata_insert_replaces() {
        let mut part = MessagePart::from("payload").with_metadata("key", "one");
        part.metadata_insert("key", "two");

        assert_eq!(part.metadata_get("key"), Some("two"));
        assert_eq!(part.metadata().len(), 1);
    }
}
