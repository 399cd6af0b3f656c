#![doc = include_str!("../README.md")]

mod error;

pub mod config;
pub mod decoder;
pub mod diagnostic;
pub mod framing;
pub mod rollover;
pub mod session;
pub mod source;

pub use config::FormatConfig;
pub use decoder::{DecodedRecord, FormatId, RecordDecoder, Value};
pub use diagnostic::{CorruptionCause, CorruptionEvent, Diagnostic, Severity};
pub use error::{Error, Result};
pub use framing::{RawFrame, RecordKind};
pub use session::{Batch, OpaqueState, ParserSession, Phase, Publisher, Summary};
pub use source::{ReaderSource, Source};

pub(crate) mod prelude {
    pub use crate::error::{Error, Result};
}
