//! Key-value records returned by optimization steps.
//!
//! ```rust
//! use lockstep_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("loss", 0.25);
//! record.insert("lr", RecordValue::Scalar(3e-4));
//! assert_eq!(record.get_scalar("loss").unwrap(), 0.25);
//! ```
mod base;

pub use base::{Record, RecordValue};
