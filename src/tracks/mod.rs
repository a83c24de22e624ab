//! Track buffer ownership

pub mod store;

pub use store::{MixView, TrackStore};
