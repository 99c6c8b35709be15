//! 5250 wire support: protocol constants and the data stream translation
//! adapter that turns host records into screen snapshots.

pub mod codes;
pub mod datastream;

pub use codes::*;
pub use datastream::{decode_record, parse_header, wrap_record, RecordHeader, ScreenRecordBuilder};
