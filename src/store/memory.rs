use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tidebus_error::TidebusResult;
use tokio::sync::mpsc;

use super::{Envelope, EventStore, StoredEntry, TopicWatch};

/// Журнал одного топика: записи по порядковому номеру, индекс ключей и
/// живые наблюдатели.
#[derive(Debug, Default)]
struct TopicLog {
    next_seq: u64,
    entries: BTreeMap<u64, StoredEntry>,
    keys: HashMap<String, u64>,
    watchers: Vec<mpsc::UnboundedSender<StoredEntry>>,
}

impl TopicLog {
    fn notify(
        &mut self,
        entry: &StoredEntry,
    ) {
        // Отписавшиеся наблюдатели отпадают при первой неудачной отправке.
        self.watchers.retain(|w| w.send(entry.clone()).is_ok());
    }
}

/// Хранилище в памяти на `DashMap`.
///
/// Клоны разделяют одно и то же состояние. Также служит индексом для
/// [`super::FileStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    topics: Arc<DashMap<Arc<str>, Arc<Mutex<TopicLog>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(
        &self,
        topic: &str,
    ) -> Arc<Mutex<TopicLog>> {
        if let Some(log) = self.topics.get(topic) {
            return log.clone();
        }
        self.topics.entry(Arc::from(topic)).or_default().clone()
    }

    fn existing(
        &self,
        topic: &str,
    ) -> Option<Arc<Mutex<TopicLog>>> {
        self.topics.get(topic).map(|log| log.clone())
    }

    /// Синхронная вставка. Повторный ключ заменяет содержимое записи на
    /// месте, не меняя её позицию и не уведомляя наблюдателей.
    pub(crate) fn append_entry(
        &self,
        topic: &str,
        key: &str,
        envelope: Envelope,
    ) -> StoredEntry {
        let log = self.log(topic);
        let mut log = log.lock();

        if let Some(seq) = log.keys.get(key).copied() {
            if let Some(existing) = log.entries.get_mut(&seq) {
                existing.envelope = envelope;
                return existing.clone();
            }
        }

        let seq = log.next_seq;
        log.next_seq += 1;
        let entry = StoredEntry {
            seq,
            key: key.to_string(),
            envelope,
        };
        log.keys.insert(entry.key.clone(), seq);
        log.entries.insert(seq, entry.clone());
        log.notify(&entry);
        entry
    }

    /// Восстанавливает запись с уже известным номером (воспроизведение
    /// журнала). Наблюдатели не уведомляются.
    pub(crate) fn restore_entry(
        &self,
        topic: &str,
        entry: StoredEntry,
    ) {
        let log = self.log(topic);
        let mut log = log.lock();
        if let Some(old) = log.keys.insert(entry.key.clone(), entry.seq) {
            log.entries.remove(&old);
        }
        log.next_seq = log.next_seq.max(entry.seq + 1);
        log.entries.insert(entry.seq, entry);
    }

    pub(crate) fn remove_entry(
        &self,
        topic: &str,
        key: &str,
    ) -> bool {
        let Some(log) = self.existing(topic) else {
            return false;
        };
        let mut log = log.lock();
        match log.keys.remove(key) {
            Some(seq) => log.entries.remove(&seq).is_some(),
            None => false,
        }
    }

    /// Номер, который получит запись с ключом `key`: существующий для
    /// повторного ключа, иначе следующий свободный.
    pub(crate) fn seq_for(
        &self,
        topic: &str,
        key: &str,
    ) -> u64 {
        let log = self.log(topic);
        let log = log.lock();
        log.keys.get(key).copied().unwrap_or(log.next_seq)
    }

    pub(crate) fn contains_key(
        &self,
        topic: &str,
        key: &str,
    ) -> bool {
        self.existing(topic)
            .map(|log| log.lock().keys.contains_key(key))
            .unwrap_or(false)
    }

    pub(crate) fn snapshot(
        &self,
        topic: &str,
    ) -> Vec<StoredEntry> {
        self.existing(topic)
            .map(|log| log.lock().entries.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }

    /// Количество записей в топике.
    pub fn len(
        &self,
        topic: &str,
    ) -> usize {
        self.existing(topic)
            .map(|log| log.lock().entries.len())
            .unwrap_or(0)
    }

    /// Количество живых наблюдателей топика.
    pub fn watcher_count(
        &self,
        topic: &str,
    ) -> usize {
        self.existing(topic)
            .map(|log| {
                let mut log = log.lock();
                log.watchers.retain(|w| !w.is_closed());
                log.watchers.len()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(
        &self,
        topic: &str,
        key: &str,
        envelope: Envelope,
    ) -> TidebusResult<StoredEntry> {
        Ok(self.append_entry(topic, key, envelope))
    }

    async fn entries(
        &self,
        topic: &str,
    ) -> TidebusResult<Vec<StoredEntry>> {
        Ok(self.snapshot(topic))
    }

    async fn range_until(
        &self,
        topic: &str,
        cutoff_ms: i64,
    ) -> TidebusResult<Vec<StoredEntry>> {
        let mut expired: Vec<StoredEntry> = self
            .snapshot(topic)
            .into_iter()
            .filter(|e| matches!(e.envelope.timestamp, Some(ts) if ts <= cutoff_ms))
            .collect();
        expired.sort_by_key(|e| (e.envelope.timestamp, e.seq));
        Ok(expired)
    }

    async fn remove(
        &self,
        topic: &str,
        key: &str,
    ) -> TidebusResult<bool> {
        Ok(self.remove_entry(topic, key))
    }

    async fn watch(
        &self,
        topic: &str,
    ) -> TidebusResult<TopicWatch> {
        let log = self.log(topic);
        let mut log = log.lock();
        // Снимок и регистрация под одной блокировкой: между ними не может
        // вклиниться вставка.
        let snapshot = log.entries.values().cloned().collect();
        let (tx, live) = mpsc::unbounded_channel();
        log.watchers.push(tx);
        Ok(TopicWatch { snapshot, live })
    }

    async fn topics(&self) -> TidebusResult<Vec<String>> {
        Ok(self.topic_names())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
