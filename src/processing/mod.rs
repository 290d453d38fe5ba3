//! Clean, validate and transform stages applied to a table of candles.
//!
//! Each stage takes an immutable slice and returns new records, logging its
//! counts inside its own span.

pub mod cleaner;
pub mod transformer;
pub mod validator;

pub use cleaner::Cleaner;
pub use transformer::Transformer;
pub use validator::Validator;
