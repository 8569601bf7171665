//! Segment bytes and the read handle.

mod data;
mod result;

pub use data::SegmentData;
pub use result::ReadResult;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentError;
    use crate::segment::{SegmentEntry, SegmentMetadata, SegmentState};
    use crate::types::SegmentId;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    fn active_entry() -> Arc<SegmentEntry> {
        let mut meta = SegmentMetadata::new(SegmentId::new(1), "reader");
        meta.state = SegmentState::Active;
        Arc::new(SegmentEntry::new(meta))
    }

    fn append(entry: &SegmentEntry, bytes: &[u8]) {
        let mut meta = entry.lock();
        entry.data().append(bytes).unwrap();
        meta.length += bytes.len() as u64;
        entry.publish(&meta);
    }

    #[tokio::test]
    async fn chunks_are_bounded() {
        let entry = active_entry();
        append(&entry, b"abcdefghij");
        let (_tx, shutdown) = watch::channel(false);

        let mut read = ReadResult::new(Arc::clone(&entry), 2, 5, 2, 0, shutdown);
        assert_eq!(entry.open_readers(), 1);
        assert_eq!(&read.next().await.unwrap().unwrap()[..], b"cd");
        assert_eq!(&read.next().await.unwrap().unwrap()[..], b"ef");
        assert_eq!(&read.next().await.unwrap().unwrap()[..], b"g");
        assert!(read.next().await.is_none());
        read.close();
        assert_eq!(entry.open_readers(), 0);
    }

    #[tokio::test]
    async fn tailing_read_wakes_on_append() {
        let entry = active_entry();
        let (_tx, shutdown) = watch::channel(false);
        let mut read = ReadResult::new(Arc::clone(&entry), 0, 3, 16, 0, shutdown);

        let writer = Arc::clone(&entry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            append(&writer, b"xyz");
        });

        let chunk = read.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"xyz");
        assert!(read.next().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_cancels_waiting_reader() {
        let entry = active_entry();
        let (tx, shutdown) = watch::channel(false);
        let mut read = ReadResult::new(entry, 0, 10, 16, 0, shutdown);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send_replace(true);
        });

        let err = read.next().await.unwrap().unwrap_err();
        assert!(matches!(err, SegmentError::Cancelled { .. }));
        assert!(read.next().await.is_none());
    }

    #[tokio::test]
    async fn sealed_end_finishes_read() {
        let entry = active_entry();
        append(&entry, b"ab");
        {
            let mut meta = entry.lock();
            meta.state = SegmentState::Sealed;
            entry.publish(&meta);
        }
        let (_tx, shutdown) = watch::channel(false);
        let mut read = ReadResult::new(entry, 0, 100, 16, 0, shutdown);
        assert_eq!(&read.read_to_end().await.unwrap()[..], b"ab");
    }
}
