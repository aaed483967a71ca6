//! The drain loop.
//!
//! A periodic task reads a bounded batch of the oldest undelivered
//! change records, dispatches each record to its table's subscriber
//! snapshot, and deletes the delivered batch in one watermark delete.
//! Ticks are single-flight per watcher: the loop body runs to
//! completion before the next timer fire is observed, and the manual
//! [`drain_now`](crate::SqliteWatcher::drain_now) path shares the same
//! tick lock. Delivery is at-least-once: a storage failure aborts the
//! tick without advancing the watermark, so the batch is retried.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::watcher::WatcherInner;

/// Run the periodic drain loop until shutdown is signalled.
///
/// Once the shutdown signal lands, one final tick flushes whatever was
/// captured between the last timer fire and the stop call, so a
/// just-captured change is not silently dropped by teardown.
pub(crate) async fn run(
    inner: Arc<WatcherInner>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    // A timer fire that lands while a tick is still running is skipped,
    // not queued; ticks never overlap.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(poll_interval_ms = poll_interval.as_millis() as u64, "drain loop started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                match tick(&inner).await {
                    Ok(0) => {}
                    Ok(delivered) => debug!(records = delivered, "drain tick delivered"),
                    Err(error) => {
                        warn!(%error, "drain tick failed, batch will be retried");
                        inner.report(&error);
                    }
                }
            }
        }
    }

    if let Err(error) = tick(&inner).await {
        warn!(%error, "final drain tick failed");
        inner.report(&error);
    }

    info!("drain loop stopped");
}

/// Run one drain tick: read, dispatch in order, delete up to the
/// watermark. Returns the number of records processed.
pub(crate) async fn tick(inner: &WatcherInner) -> Result<usize> {
    let _flight = inner.tick_lock.lock().await;

    let batch = {
        let conn = inner.conn.lock();
        inner.store.drain_batch(&conn, inner.batch_limit)?
    };
    let Some(last_seq) = batch.last_seq else {
        return Ok(0);
    };

    let processed = batch.records.len();
    for record in batch.records {
        // The table may have been unwatched between capture and drain;
        // stale rows are skipped, not errored.
        let Some(set) = inner.registry.snapshot(&record.table) else {
            trace!(table = %record.table, seq = record.seq, "no subscriber set, skipping");
            inner.stats.record_skipped();
            continue;
        };

        if !set.accepts(&record) {
            trace!(table = %record.table, seq = record.seq, "rejected by filter");
            inner.stats.record_skipped();
            continue;
        }

        let callbacks = set.callbacks_for(record.op);
        if callbacks.is_empty() {
            inner.stats.record_skipped();
            continue;
        }

        // All callbacks for one record race; records stay sequential.
        let results = join_all(callbacks.iter().map(|cb| cb(record.clone()))).await;
        for result in results {
            if let Err(source) = result {
                let error = Error::Callback {
                    table: record.table.clone(),
                    operation: record.op,
                    source,
                };
                inner.stats.record_callback_error();
                inner.report(&error);
            }
        }
        inner.stats.record_delivered();
    }

    {
        let conn = inner.conn.lock();
        inner.store.delete_up_to(&conn, last_seq)?;
    }
    inner.stats.record_tick();

    Ok(processed)
}
