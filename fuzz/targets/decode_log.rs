#![no_main]

use libfuzzer_sys::fuzz_target;
use tidebus::store::codec::decode_records;

// Разбор произвольных байтов не паникует, а корректный префикс
// разбирается повторно без обрыва и с теми же записями.
fuzz_target!(|data: &[u8]| {
    let Ok(decoded) = decode_records("fuzz", data) else {
        return;
    };

    let valid_len = decoded.valid_len as usize;
    assert!(valid_len <= data.len());
    if !decoded.torn_tail {
        assert_eq!(valid_len, data.len());
    }

    let again = decode_records("fuzz", &data[..valid_len]).expect("valid prefix must decode");
    assert!(!again.torn_tail);
    assert_eq!(again.records, decoded.records);
});
