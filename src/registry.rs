use crate::bulk::BulkWriter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Shares one [`BulkWriter`] per destination between hooks.
///
/// Entries live until [`remove`](BulkRegistry::remove) or
/// [`close_all`](BulkRegistry::close_all) is called; nothing is evicted
/// automatically, so the owner is expected to call `close_all` on shutdown.
#[derive(Debug, Default)]
pub struct BulkRegistry {
    writers: Mutex<HashMap<String, Arc<BulkWriter>>>,
}

impl BulkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<BulkWriter>>> {
        self.writers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the writer registered for `destination`, creating it with
    /// `make` if there is none. `make` runs at most once per destination.
    pub fn get_or_create(&self, destination: &str, make: impl FnOnce() -> BulkWriter) -> Arc<BulkWriter> {
        let mut writers = self.lock();
        if let Some(writer) = writers.get(destination) {
            return Arc::clone(writer);
        }
        debug!(destination, "creating shared bulk writer");
        let writer = Arc::new(make());
        writers.insert(destination.to_string(), Arc::clone(&writer));
        writer
    }

    pub fn get(&self, destination: &str) -> Option<Arc<BulkWriter>> {
        self.lock().get(destination).cloned()
    }

    /// Unregister a writer without closing it.
    pub fn remove(&self, destination: &str) -> Option<Arc<BulkWriter>> {
        self.lock().remove(destination)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close and unregister every writer, waiting for their final flushes.
    /// Returns how many writers were closed by this call.
    pub async fn close_all(&self) -> usize {
        let writers: Vec<Arc<BulkWriter>> = self.lock().drain().map(|(_, writer)| writer).collect();
        let mut closed = 0;
        for writer in writers {
            if writer.close().await.is_ok() {
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::flush_fn;
    use crate::sink::BoxError;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    fn writer(tx: mpsc::UnboundedSender<Vec<u8>>) -> BulkWriter {
        BulkWriter::new(
            Duration::ZERO,
            flush_fn(move |data: Vec<u8>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(data);
                    Ok::<(), BoxError>(())
                }
            }),
        )
    }

    #[tokio::test]
    async fn same_destination_yields_same_writer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = BulkRegistry::new();
        let mut made = 0;

        let first = registry.get_or_create("http://es:9200/logs", || {
            made += 1;
            writer(tx.clone())
        });
        let second = registry.get_or_create("http://es:9200/logs", || {
            made += 1;
            writer(tx.clone())
        });
        let other = registry.get_or_create("http://es:9200/audit", || writer(tx.clone()));

        assert_eq!(made, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
        registry.close_all().await;
    }

    #[tokio::test]
    async fn close_all_flushes_and_empties() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = BulkRegistry::new();

        let shared = registry.get_or_create("dest", || writer(tx.clone()));
        shared.write(b"pending").await.unwrap();
        drop(tx);

        assert_eq!(registry.close_all().await, 1);
        assert!(registry.is_empty());
        assert!(shared.is_closed());
        assert_eq!(rx.recv().await.unwrap(), b"pending");
        assert!(registry.close_all().await == 0);
    }

    #[tokio::test]
    async fn removed_writer_stays_open() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = BulkRegistry::new();
        registry.get_or_create("dest", || writer(tx));

        let removed = registry.remove("dest").unwrap();
        assert!(registry.get("dest").is_none());
        assert!(!removed.is_closed());
        removed.close().await.unwrap();
    }
}
