//! Row models for the two kinds of records the gateway persists.
//!
//! An object is one `objects` row (length, creation time, content headers)
//! plus an ordered run of `chunks` rows holding its bytes.

pub mod chunk;
pub mod object;
