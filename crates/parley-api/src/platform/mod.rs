//! Chat platform adapters.

pub mod stdio;

pub use stdio::StdioPlatform;
