//! Подсистема Publish–Subscribe (pub/sub).
//!
//! - `broker`: брокер поверх упорядоченного хранилища, по задаче доставки
//!   на каждую подписку.
//! - `engine`: контракт движка (`PubSubEngine`) и слушателя (`Listener`).
//! - `event`: событие, которое получает подписчик.
//! - `local` (приватный): внутрипроцессная раздача и кеш недавних ключей.
//!
//! Публичный API переэкспортирует:
//! - `broker::*`
//! - `engine::*`
//! - `event::*`

pub mod broker;
pub mod engine;
pub mod event;
mod local;

// Публичный экспорт из вложенных модулей, чтобы упростить доступ к ним из
// внешнего кода.
pub use broker::*;
pub use engine::*;
pub use event::*;
