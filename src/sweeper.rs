use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that keeps a site's calendar current: approved
/// bookings whose slot has passed become `completed`, and active series
/// materialize the instances that have entered the rolling horizon.
/// Paused and cancelled series are left alone.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = chrono::Utc::now();
        let today = now.date_naive();
        let time = now.time();

        for booking_id in engine.collect_finished(today, time) {
            match engine.complete_booking(booking_id).await {
                Ok(()) => {
                    info!("completed booking {booking_id}");
                    metrics::counter!(crate::observability::BOOKINGS_COMPLETED_TOTAL).increment(1);
                }
                Err(e) => {
                    // May have been cancelled in the meantime
                    debug!("sweeper skip {booking_id}: {e}");
                }
            }
        }

        for series_id in engine.active_series() {
            match engine.extend_series(series_id, today).await {
                Ok(0) => {}
                Ok(n) => {
                    info!("extended series {series_id} by {n} instances");
                    metrics::counter!(crate::observability::SERIES_INSTANCES_TOTAL)
                        .increment(n as u64);
                }
                Err(e) => {
                    debug!("sweeper skip series {series_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Actor;
    use crate::model::BookingStatus;
    use crate::notify::NotifyHub;
    use chrono::{NaiveDate, NaiveTime};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shoptime_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweep_completes_only_finished_bookings() {
        let path = test_wal_path("sweep_complete.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify, 60).unwrap());
        let tender = Actor::from_login("toolmaster:tender");
        let ada = Actor::from_login("ada");

        let rid = Ulid::new();
        engine.create_resource(&tender, rid, None, None, 1, None).await.unwrap();

        let past = Ulid::new();
        engine
            .request_booking(&ada, past, rid, "2024-03-01", "09:00", "10:00", None)
            .await
            .unwrap();
        engine
            .set_booking_status(&tender, past, 1, BookingStatus::Approved)
            .await
            .unwrap();

        let future = Ulid::new();
        engine
            .request_booking(&ada, future, rid, "2024-03-05", "09:00", "10:00", None)
            .await
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();

        let finished = engine.collect_finished(today, noon);
        assert_eq!(finished, vec![past]);
        engine.complete_booking(past).await.unwrap();

        let finished_after = engine.collect_finished(today, noon);
        assert!(finished_after.is_empty());
        assert_eq!(
            engine.get_booking(future).await.unwrap().status,
            BookingStatus::Pending
        );
    }

    #[tokio::test]
    async fn same_day_boundary_is_half_open() {
        let path = test_wal_path("sweep_boundary.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify, 60).unwrap());
        let tender = Actor::from_login("toolmaster:tender");
        let ada = Actor::from_login("ada");

        let rid = Ulid::new();
        engine.create_resource(&tender, rid, None, None, 1, None).await.unwrap();
        let bid = Ulid::new();
        engine
            .request_booking(&ada, bid, rid, "2024-03-01", "09:00", "10:00", None)
            .await
            .unwrap();
        engine.set_booking_status(&tender, bid, 1, BookingStatus::Approved).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        // At 09:59 the slot is still running
        let before = NaiveTime::from_hms_opt(9, 59, 0).unwrap();
        assert!(engine.collect_finished(today, before).is_empty());
        // At 10:00 sharp the half-open range has ended
        let at_end = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        assert_eq!(engine.collect_finished(today, at_end), vec![bid]);
    }
}
