pub mod binding;
pub mod config;
pub mod convert;
pub mod error;
pub mod expr;
pub mod model;
pub mod preprocess;
pub mod render;
pub mod sql;
pub mod translate;

#[cfg(test)]
mod testing;

pub use error::{Result, TranslateError};
pub use translate::Translator;
