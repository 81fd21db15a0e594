//! Retrieval scoring

mod confidence;

pub use confidence::confidence;
