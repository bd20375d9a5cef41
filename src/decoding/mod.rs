//! Decoding of uploaded byte streams into shipment records.
//!
//! Split in two stages, mirroring how the bytes arrive: [`framing`] finds
//! record boundaries in arbitrarily chunked input while tracking quoting
//! state, and [`record`] turns one complete logical line into a typed
//! record or a structural error.

pub mod framing;
pub mod record;

pub use framing::{CsvFrameDecoder, FrameError, MAX_LINE};
pub use record::{parse_record, RecordError, COLUMNS, MIN_COLUMNS};
