//! Centralized error handling for tidebus.
//!
//! Every error raised by the bus implements [`ErrorExt`] and travels through
//! the public API as a [`StackError`]: a cheaply cloneable handle carrying a
//! [`StatusCode`] and an optional chain of context messages.

pub mod ext;
pub mod macros;
pub mod stack;
pub mod status_code;
pub mod types;

// Publicly re-export all error types and functions from the submodules to
// simplify access from external code.
pub use ext::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

pub type TidebusResult<T> = Result<T, StackError>;
