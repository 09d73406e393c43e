//! Разовая очистка устаревших записей.
//!
//! Расписание запусков остаётся за вызывающим (cron, systemd timer и т.п.).

use std::time::Duration;

use futures::future::join_all;
use tidebus_error::TidebusResult;
use tracing::{info, warn};

use crate::store::EventStore;

/// Итог очистки.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Граница: удалены записи с меткой времени не позже неё.
    pub cutoff_ms: i64,
    pub topics: usize,
    pub removed: usize,
    /// Удаления, завершившиеся ошибкой.
    pub failed: usize,
}

/// Удаляет из топиков записи старше `max_age` относительно текущего
/// времени. Пустой `topics` означает все топики хранилища.
pub async fn sweep<S>(
    store: &S,
    topics: &[String],
    max_age: Duration,
) -> TidebusResult<SweepReport>
where
    S: EventStore + ?Sized,
{
    let now = chrono::Utc::now().timestamp_millis();
    sweep_at(store, topics, max_age, now).await
}

/// То же, что [`sweep`], с явным «текущим» временем.
pub async fn sweep_at<S>(
    store: &S,
    topics: &[String],
    max_age: Duration,
    now_ms: i64,
) -> TidebusResult<SweepReport>
where
    S: EventStore + ?Sized,
{
    let topics = if topics.is_empty() {
        store.topics().await?
    } else {
        topics.to_vec()
    };

    let cutoff_ms = now_ms.saturating_sub(i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX));
    let mut report = SweepReport {
        cutoff_ms,
        topics: topics.len(),
        ..Default::default()
    };

    for topic in &topics {
        let expired = store.range_until(topic, cutoff_ms).await?;
        if expired.is_empty() {
            continue;
        }

        // Ошибка одного удаления не прерывает остальные.
        let results = join_all(expired.iter().map(|e| store.remove(topic, &e.key))).await;
        for (entry, result) in expired.iter().zip(results) {
            match result {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(topic = %topic, key = %entry.key, error = %err, "Failed to remove expired entry");
                }
            }
        }
    }

    info!(
        cutoff_ms,
        topics = report.topics,
        removed = report.removed,
        failed = report.failed,
        "Retention sweep finished"
    );
    Ok(report)
}
