// SPDX-License-Identifier: Apache-2.0

//! Downstream side of the file consumer.

use crate::bounded_channel::{BoundedSender, SendError};
use crate::entry::Entry;
use crate::error::{Error, Result};

/// Receives records produced by readers.
///
/// `emit` is called from blocking reader tasks. Returning an error refuses
/// the record: the reader stops for this cycle and the record is read again
/// on the next one.
pub trait Consumer: Send + Sync {
    fn emit(&self, entry: Entry) -> Result<()>;
}

/// Forwards records over a bounded channel, applying backpressure to the
/// readers when the channel is full.
#[derive(Clone)]
pub struct ChannelConsumer {
    tx: BoundedSender<Entry>,
}

impl ChannelConsumer {
    pub fn new(tx: BoundedSender<Entry>) -> Self {
        Self { tx }
    }
}

impl Consumer for ChannelConsumer {
    fn emit(&self, entry: Entry) -> Result<()> {
        self.tx.send_blocking(entry).map_err(|e| match e {
            SendError::Disconnected => Error::ConsumerClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;

    #[tokio::test]
    async fn test_channel_consumer_forwards() {
        let (tx, mut rx) = bounded(4);
        let consumer = ChannelConsumer::new(tx);

        consumer.emit(Entry::with_body("one")).unwrap();
        consumer.emit(Entry::with_body("two")).unwrap();
        drop(consumer);

        assert_eq!(rx.next().await.unwrap().body_string(), Some("one"));
        assert_eq!(rx.next().await.unwrap().body_string(), Some("two"));
        assert!(rx.next().await.is_none());
    }

    #[test]
    fn test_channel_consumer_closed() {
        let (tx, rx) = bounded(1);
        let consumer = ChannelConsumer::new(tx);
        drop(rx);

        assert!(matches!(
            consumer.emit(Entry::with_body("lost")),
            Err(Error::ConsumerClosed)
        ));
    }
}
