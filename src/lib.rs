pub mod codegen;
pub mod engine;
pub mod error;
pub mod mml;
pub mod pipeline;
pub mod warning;

pub use engine::Engine;
pub use error::{Error, Result};
pub use pipeline::Compiler;
