/// Inkcard core: card document codec, card store and the autosave engine.
pub mod codec;
pub mod config;
pub mod engine;
pub mod geometry;
pub mod metadata;
pub mod notice;
pub mod query;
pub mod storage;
pub mod store;
pub mod tokens;
pub mod types;
pub mod watcher;

pub use engine::{AutosaveEngine, EngineError, EngineOptions, FieldChange, NewCard, WriteOutcome};
pub use types::{Card, FloatingGeometry, ParsedCard};
