//! Data models for the flat file store.
//!
//! A stored object carries no metadata of its own beyond what the filesystem
//! reports, so these types are snapshots taken at the time of the call.

pub mod file_entry;
pub mod stored_object;
