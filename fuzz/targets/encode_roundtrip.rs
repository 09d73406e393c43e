#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tidebus::store::codec::{decode_records, encode_record, LogRecord, MAGIC};

#[derive(Debug, Arbitrary)]
enum FuzzRecord {
    Put {
        seq: u64,
        key: String,
        payload: String,
        timestamp: Option<i64>,
    },
    Del {
        key: String,
    },
}

impl From<FuzzRecord> for LogRecord {
    fn from(r: FuzzRecord) -> Self {
        match r {
            FuzzRecord::Put {
                seq,
                key,
                payload,
                timestamp,
            } => LogRecord::Put {
                seq,
                key,
                payload: serde_json::Value::String(payload),
                timestamp,
            },
            FuzzRecord::Del { key } => LogRecord::Del { key },
        }
    }
}

fuzz_target!(|input: Vec<FuzzRecord>| {
    let records: Vec<LogRecord> = input.into_iter().map(LogRecord::from).collect();

    let mut bytes = MAGIC.to_vec();
    for record in &records {
        bytes.extend(encode_record(record).expect("encode"));
    }

    let decoded = decode_records("fuzz", &bytes).expect("decode");
    assert!(!decoded.torn_tail);
    assert_eq!(decoded.valid_len as usize, bytes.len());
    assert_eq!(decoded.records, records);
});
