//! Загрузка настроек: значения по умолчанию, файл `tidebus.toml`,
//! переменные окружения `TIDEBUS__*`.

pub mod settings;

pub use settings::*;
