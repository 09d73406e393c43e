//! Формат журнала топика.
//!
//! Файл начинается с 4-байтового заголовка [`MAGIC`], за которым следуют
//! записи вида `[u32 LE длина][JSON тело]`. Тело кодирует [`LogRecord`].

use serde::{Deserialize, Serialize};
use tidebus_error::StorageError;

/// 4-байтовый магический заголовок журнала (идентификатор версии).
pub const MAGIC: &[u8; 4] = b"TBL1";

/// Предельный размер тела одной записи.
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Операция журнала.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LogRecord {
    Put {
        seq: u64,
        key: String,
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Del {
        key: String,
    },
}

/// Результат разбора журнала.
#[derive(Debug, Default)]
pub struct Decoded {
    pub records: Vec<LogRecord>,
    /// Длина корректного префикса файла в байтах, включая заголовок.
    pub valid_len: u64,
    /// Файл заканчивается недописанной записью.
    pub torn_tail: bool,
}

/// Кодирует одну запись вместе с префиксом длины.
pub fn encode_record(record: &LogRecord) -> Result<Vec<u8>, StorageError> {
    let body = serde_json::to_vec(record).map_err(|e| StorageError::SerializationFailed {
        reason: e.to_string(),
    })?;
    if body.len() > MAX_RECORD_SIZE {
        return Err(StorageError::RecordTooLarge {
            size: body.len(),
            limit: MAX_RECORD_SIZE,
        });
    }

    let mut out = Vec::with_capacity(LEN_PREFIX + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Разбирает содержимое файла журнала.
///
/// Пустой вход считается новым журналом. Обрыв в конце (неполный
/// заголовок, префикс длины или тело) не ошибка: он отмечается в
/// [`Decoded::torn_tail`], а `valid_len` указывает, где обрезать файл.
/// Любое другое нарушение формата даёт [`StorageError::CorruptedLog`].
pub fn decode_records(
    label: &str,
    bytes: &[u8],
) -> Result<Decoded, StorageError> {
    let corrupted = |offset: usize, reason: String| StorageError::CorruptedLog {
        path: label.to_string(),
        offset: offset as u64,
        reason,
    };

    let mut decoded = Decoded::default();
    if bytes.is_empty() {
        return Ok(decoded);
    }
    if bytes.len() < MAGIC.len() {
        if MAGIC.starts_with(bytes) {
            decoded.torn_tail = true;
            return Ok(decoded);
        }
        return Err(corrupted(0, "bad magic header".to_string()));
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(corrupted(0, "bad magic header".to_string()));
    }

    let mut pos = MAGIC.len();
    decoded.valid_len = pos as u64;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < LEN_PREFIX {
            decoded.torn_tail = true;
            break;
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&rest[..LEN_PREFIX]);
        let len = u32::from_le_bytes(prefix) as usize;
        if len > MAX_RECORD_SIZE {
            return Err(corrupted(pos, format!("record length {len} exceeds limit")));
        }
        if rest.len() < LEN_PREFIX + len {
            decoded.torn_tail = true;
            break;
        }

        let body = &rest[LEN_PREFIX..LEN_PREFIX + len];
        let record: LogRecord =
            serde_json::from_slice(body).map_err(|e| corrupted(pos, e.to_string()))?;
        decoded.records.push(record);

        pos += LEN_PREFIX + len;
        decoded.valid_len = pos as u64;
    }

    Ok(decoded)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
