use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tidebus_error::{ResultExt, StackError, TidebusResult};
use tracing::{debug, info, warn};

use super::{
    codec::{self, LogRecord, MAGIC},
    Envelope, EventStore, MemoryStore, StoredEntry, TopicWatch,
};
use crate::topic::validate_topic;

const LOG_EXTENSION: &str = "log";

/// Политика синхронизации — как часто журнал сбрасывается на диск.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// fsync после каждой записи.
    Always,
    /// fsync не чаще раза в секунду.
    #[default]
    EverySec,
    /// Только сброс буфера в ОС.
    No,
}

impl FromStr for SyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "everysec" => Ok(Self::EverySec),
            "no" => Ok(Self::No),
            other => Err(format!("unknown sync policy '{other}'")),
        }
    }
}

/// Открытый на дозапись журнал одного топика.
struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    policy: SyncPolicy,
    last_sync: Instant,
}

impl LogWriter {
    fn open(
        path: PathBuf,
        policy: SyncPolicy,
    ) -> TidebusResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        if writer.get_ref().metadata()?.len() == 0 {
            writer.write_all(MAGIC)?;
            writer.flush()?;
        }
        Ok(Self {
            path,
            writer,
            policy,
            last_sync: Instant::now(),
        })
    }

    fn write_record(
        &mut self,
        record: &LogRecord,
    ) -> TidebusResult<()> {
        let bytes = codec::encode_record(record)?;
        self.writer
            .write_all(&bytes)
            .with_context(|| format!("write log {}", self.path.display()))?;
        self.writer.flush()?;

        let sync = match self.policy {
            SyncPolicy::Always => true,
            SyncPolicy::EverySec => self.last_sync.elapsed() >= Duration::from_secs(1),
            SyncPolicy::No => false,
        };
        if sync {
            self.writer.get_ref().sync_data()?;
            self.last_sync = Instant::now();
        }
        Ok(())
    }
}

/// Хранилище на файлах: `<data_dir>/<namespace>/<topic>.log`.
///
/// Все журналы воспроизводятся при открытии в индекс [`MemoryStore`],
/// чтение идёт из индекса. Запись сериализуется блокировкой журнала
/// топика, поэтому порядок в файле совпадает с порядком номеров.
///
/// Ввод-вывод синхронный и выполняется прямо в вызывающей задаче.
pub struct FileStore {
    root: PathBuf,
    index: MemoryStore,
    logs: DashMap<Arc<str>, Arc<Mutex<LogWriter>>>,
    policy: SyncPolicy,
}

impl FileStore {
    /// Открывает (или создаёт) каталог пространства имён и воспроизводит
    /// все найденные журналы.
    pub fn open(
        data_dir: impl AsRef<Path>,
        namespace: &str,
        policy: SyncPolicy,
    ) -> TidebusResult<Self> {
        validate_topic(namespace).context("invalid store namespace")?;
        let root = data_dir.as_ref().join(namespace);
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;

        let store = Self {
            root,
            index: MemoryStore::new(),
            logs: DashMap::new(),
            policy,
        };

        let mut replayed = 0usize;
        for dir_entry in fs::read_dir(&store.root)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let Some(topic) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_topic(topic).is_err() {
                warn!(path = %path.display(), "Skipping log with invalid topic name");
                continue;
            }
            replayed += store.replay(topic, &path)?;
        }

        info!(
            root = %store.root.display(),
            entries = replayed,
            "File store opened"
        );
        Ok(store)
    }

    /// Каталог пространства имён.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_path(
        &self,
        topic: &str,
    ) -> PathBuf {
        self.root.join(format!("{topic}.{LOG_EXTENSION}"))
    }

    fn replay(
        &self,
        topic: &str,
        path: &Path,
    ) -> TidebusResult<usize> {
        let bytes = fs::read(path).with_context(|| format!("read log {}", path.display()))?;
        let decoded = codec::decode_records(&path.display().to_string(), &bytes)?;

        if decoded.torn_tail {
            warn!(
                path = %path.display(),
                valid_len = decoded.valid_len,
                file_len = bytes.len(),
                "Truncating torn tail of log"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(decoded.valid_len)?;
            file.sync_all()?;
        }

        let count = decoded.records.len();
        for record in decoded.records {
            match record {
                LogRecord::Put {
                    seq,
                    key,
                    payload,
                    timestamp,
                } => self.index.restore_entry(
                    topic,
                    StoredEntry {
                        seq,
                        key,
                        envelope: Envelope::new(payload, timestamp),
                    },
                ),
                LogRecord::Del { key } => {
                    self.index.remove_entry(topic, &key);
                }
            }
        }
        debug!(topic, records = count, "Replayed topic log");
        Ok(count)
    }

    fn writer(
        &self,
        topic: &str,
    ) -> TidebusResult<Arc<Mutex<LogWriter>>> {
        validate_topic(topic)?;
        if let Some(w) = self.logs.get(topic) {
            return Ok(w.clone());
        }
        match self.logs.entry(Arc::from(topic)) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let w = Arc::new(Mutex::new(LogWriter::open(self.log_path(topic), self.policy)?));
                e.insert(w.clone());
                Ok(w)
            }
        }
    }

    /// Переписывает журнал топика, оставляя только живые записи.
    ///
    /// Новый журнал пишется во временный файл рядом и атомарно заменяет
    /// старый. Возвращает число записей в новом журнале.
    pub fn compact(
        &self,
        topic: &str,
    ) -> TidebusResult<usize> {
        let writer = self.writer(topic)?;
        let mut writer = writer.lock();

        let live = self.index.snapshot(topic);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            out.write_all(MAGIC)?;
            for entry in &live {
                let record = LogRecord::Put {
                    seq: entry.seq,
                    key: entry.key.clone(),
                    payload: entry.envelope.payload.clone(),
                    timestamp: entry.envelope.timestamp,
                };
                out.write_all(&codec::encode_record(&record)?)?;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;

        let path = self.log_path(topic);
        tmp.persist(&path)
            .map_err(|e| StackError::from(e.error))
            .with_context(|| format!("replace log {}", path.display()))?;
        *writer = LogWriter::open(path, self.policy)?;

        info!(topic, entries = live.len(), "Compacted topic log");
        Ok(live.len())
    }
}

#[async_trait]
impl EventStore for FileStore {
    async fn append(
        &self,
        topic: &str,
        key: &str,
        envelope: Envelope,
    ) -> TidebusResult<StoredEntry> {
        let writer = self.writer(topic)?;
        let mut writer = writer.lock();

        let record = LogRecord::Put {
            seq: self.index.seq_for(topic, key),
            key: key.to_string(),
            payload: envelope.payload.clone(),
            timestamp: envelope.timestamp,
        };
        writer.write_record(&record)?;
        Ok(self.index.append_entry(topic, key, envelope))
    }

    async fn entries(
        &self,
        topic: &str,
    ) -> TidebusResult<Vec<StoredEntry>> {
        self.index.entries(topic).await
    }

    async fn range_until(
        &self,
        topic: &str,
        cutoff_ms: i64,
    ) -> TidebusResult<Vec<StoredEntry>> {
        self.index.range_until(topic, cutoff_ms).await
    }

    async fn remove(
        &self,
        topic: &str,
        key: &str,
    ) -> TidebusResult<bool> {
        let writer = self.writer(topic)?;
        let mut writer = writer.lock();

        if !self.index.contains_key(topic, key) {
            return Ok(false);
        }
        writer.write_record(&LogRecord::Del {
            key: key.to_string(),
        })?;
        Ok(self.index.remove_entry(topic, key))
    }

    async fn watch(
        &self,
        topic: &str,
    ) -> TidebusResult<TopicWatch> {
        validate_topic(topic)?;
        self.index.watch(topic).await
    }

    async fn topics(&self) -> TidebusResult<Vec<String>> {
        self.index.topics().await
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .field("open_logs", &self.logs.len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
