//! Transactions and acknowledgements exchanged with the upstream pipeline.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::message::Batch;

/// The outcome delivered back upstream for a transaction.
pub type AckResult = crate::Result<()>;

/// An append-only sink for batches correlated back from a request/reply exchange.
///
/// Cloning yields another handle onto the same store, so it can be attached to a batch while the
/// creator keeps reading from it. Appends from concurrent writers are safe.
#[derive(Clone, Debug, Default)]
pub struct ResultStore {
    inner: Arc<Mutex<Vec<Batch>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch, taking ownership of it.
    pub fn add(&self, batch: Batch) {
        self.lock().push(batch);
    }

    /// Returns a snapshot of every batch stored so far, in append order.
    pub fn get(&self) -> Vec<Batch> {
        self.lock().clone()
    }

    /// Removes and returns every batch stored so far.
    pub fn take(&self) -> Vec<Batch> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Batch>> {
        // A poisoned store still holds valid batches; appends never leave it half written.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A batch paired with its single-use acknowledgement channel.
///
/// Acknowledging consumes the transaction, so a transaction is acknowledged at most once. Dropping
/// an unacknowledged transaction closes the channel, which the receiver observes as an error.
#[derive(Debug)]
pub struct Transaction {
    batch: Batch,
    ack: oneshot::Sender<AckResult>,
}

impl Transaction {
    pub const fn new(batch: Batch, ack: oneshot::Sender<AckResult>) -> Self {
        Self { batch, ack }
    }

    /// Creates a transaction along with the receiving half of its acknowledgement channel.
    pub fn with_receiver(batch: Batch) -> (Self, oneshot::Receiver<AckResult>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(batch, tx), rx)
    }

    pub const fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn into_parts(self) -> (Batch, Acknowledger) {
        (self.batch, Acknowledger { ack: self.ack })
    }

    /// Resolves the transaction with the outcome of its delivery.
    pub fn ack(self, result: AckResult) -> bool {
        Acknowledger { ack: self.ack }.ack(result)
    }
}

/// The acknowledgement half of a [`Transaction`] once its batch has been taken out.
#[derive(Debug)]
pub struct Acknowledger {
    ack: oneshot::Sender<AckResult>,
}

impl Acknowledger {
    /// Sends the outcome upstream. Returns `false` when the upstream side has gone away.
    pub fn ack(self, result: AckResult) -> bool {
        self.ack.send(result).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessagePart;

    #[test]
    fn result_store_clones_share_contents() {
        let store = ResultStore::new();
        let handle = store.clone();

        handle.add(Batch::new(vec![MessagePart::from("one")]));
        handle.add(Batch::new(vec![MessagePart::from("two")]));

        let stored = store.get();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1][0].payload().as_ref(), b"two");

        assert_eq!(store.take().len(), 2);
        assert!(handle.get().is_empty());
    }

    #[tokio::test]
    async fn transaction_ack_is_delivered_once() {
        let (txn, rx) = Transaction::with_receiver(Batch::from_payloads(["hello"]));
        assert_eq!(txn.batch().len(), 1);

        assert!(txn.ack(Err("boom".into())));
        let result = rx.await.expect("ack channel closed");
        assert_eq!(result.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn dropped_transaction_closes_channel() {
        let (txn, rx) = Transaction::with_receiver(Batch::default());
        drop(txn);

        assert!(rx.await.is_err());
    }
}
