//! Code generation: chunks, streams, linker

pub mod chunk;
pub mod linker;
pub mod stream;
