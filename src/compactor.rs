use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::ledger::{Ledger, StoreError};

/// Compact the ledger's WAL once more than `threshold` events were appended since
/// the last compaction. Returns whether a compaction ran.
pub async fn compact_if_needed(ledger: &Ledger, threshold: u64) -> Result<bool, StoreError> {
    let appends = ledger.wal_appends_since_compact().await;
    if appends <= threshold {
        return Ok(false);
    }
    debug!("{appends} WAL appends since last compaction, compacting");
    ledger.compact().await?;
    Ok(true)
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&ledger, threshold).await {
            error!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::ledger::BookingStore;
    use crate::model::*;

    const H: Ms = 3_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hallbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let ledger = Ledger::open(test_wal_path("threshold.wal")).unwrap();
        for i in 0..5 {
            ledger
                .insert_if_no_overlap("A", Span::new(i * H, (i + 1) * H), 1)
                .await
                .unwrap()
                .unwrap();
        }

        assert!(!compact_if_needed(&ledger, 5).await.unwrap());
        assert_eq!(ledger.wal_appends_since_compact().await, 5);

        assert!(compact_if_needed(&ledger, 4).await.unwrap());
        assert_eq!(ledger.wal_appends_since_compact().await, 0);
        assert_eq!(ledger.booking_count(), 5);
    }

    #[tokio::test]
    async fn in_memory_ledger_never_compacts() {
        let ledger = Ledger::in_memory();
        ledger
            .insert_if_no_overlap("A", Span::new(0, H), 1)
            .await
            .unwrap()
            .unwrap();
        assert!(!compact_if_needed(&ledger, 0).await.unwrap());
    }

    #[tokio::test]
    async fn background_task_compacts() {
        let path = test_wal_path("background.wal");
        let ledger = Arc::new(Ledger::open(path).unwrap());
        for i in 0..3 {
            let id = ledger
                .insert_if_no_overlap("B", Span::new(i * H, (i + 1) * H), 1)
                .await
                .unwrap()
                .unwrap();
            ledger.delete(id).await.unwrap();
        }

        let task = tokio::spawn(run_compactor(ledger.clone(), 1, Duration::from_millis(10)));
        for _ in 0..100 {
            if ledger.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert_eq!(ledger.wal_appends_since_compact().await, 0);
    }
}
