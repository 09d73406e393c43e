use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use lru::LruCache;
use tokio::sync::broadcast;

use super::Event;

/// Локальная раздача событий подписчикам этого же процесса до того, как
/// запись дойдёт через хранилище.
///
/// Каналы создаются при первой подписке и удаляются, когда в них не
/// остаётся получателей.
#[derive(Debug)]
pub(crate) struct LocalFanout {
    channels: DashMap<Arc<str>, broadcast::Sender<Event>>,
    capacity: usize,
}

impl LocalFanout {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn subscribe(
        &self,
        topic: &str,
    ) -> broadcast::Receiver<Event> {
        self.channels
            .entry(Arc::from(topic))
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Рассылает событие. Возвращает число получателей.
    pub(crate) fn emit(
        &self,
        event: &Event,
    ) -> usize {
        let receivers = match self.channels.get(event.topic.as_str()) {
            Some(tx) => tx.send(event.clone()).unwrap_or(0),
            None => return 0,
        };
        if receivers == 0 {
            self.channels
                .remove_if(event.topic.as_str(), |_, tx| tx.receiver_count() == 0);
        }
        receivers
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Недавно доставленные локально ключи одной подписки.
///
/// Запись из хранилища с таким ключом пропускается, если ключ ещё не
/// устарел. Устаревший или вытесненный ключ означает повторную доставку.
#[derive(Debug)]
pub(crate) struct RecentKeys {
    keys: LruCache<String, Instant>,
    ttl: Duration,
}

impl RecentKeys {
    pub(crate) fn new(
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            keys: LruCache::new(capacity),
            ttl,
        }
    }

    pub(crate) fn remember(
        &mut self,
        key: String,
    ) {
        self.keys.put(key, Instant::now());
    }

    /// Забирает ключ. `true`, если ключ был и ещё свеж.
    pub(crate) fn take_fresh(
        &mut self,
        key: &str,
    ) -> bool {
        match self.keys.pop(key) {
            Some(seen_at) => seen_at.elapsed() <= self.ttl,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let fanout = LocalFanout::new(8);
        let mut rx = fanout.subscribe("t");
        let ev = Event::new("t", json!(1));

        assert_eq!(fanout.emit(&ev), 1);
        assert_eq!(rx.recv().await.unwrap(), ev);
    }

    /// Тест проверяет, что канал без получателей удаляется при публикации.
    #[test]
    fn test_empty_channel_is_removed() {
        let fanout = LocalFanout::new(8);
        drop(fanout.subscribe("t"));
        assert_eq!(fanout.channel_count(), 1);

        assert_eq!(fanout.emit(&Event::new("t", json!(1))), 0);
        assert_eq!(fanout.channel_count(), 0);
        assert_eq!(fanout.emit(&Event::new("other", json!(1))), 0);
    }

    #[test]
    fn test_recent_keys_fresh_and_taken_once() {
        let mut recent = RecentKeys::new(4, Duration::from_secs(60));
        recent.remember("a".into());
        assert!(recent.take_fresh("a"));
        assert!(!recent.take_fresh("a"));
        assert!(!recent.take_fresh("missing"));
    }

    #[test]
    fn test_recent_keys_expire() {
        let mut recent = RecentKeys::new(4, Duration::ZERO);
        recent.remember("a".into());
        std::thread::sleep(Duration::from_millis(2));
        assert!(!recent.take_fresh("a"));
    }

    #[test]
    fn test_recent_keys_evict_oldest() {
        let mut recent = RecentKeys::new(2, Duration::from_secs(60));
        recent.remember("a".into());
        recent.remember("b".into());
        recent.remember("c".into());
        assert!(!recent.take_fresh("a"));
        assert!(recent.take_fresh("c"));
    }
}
