//! 翻訳キャッシュ
//!
//! 国ごとの翻訳データを永続化するバージョン付きキャッシュと、
//! その下で動作するストレージエンジンを提供します。

pub mod codec;
pub mod engine;
pub mod memory;
pub mod sqlite;
pub mod translation_store;

pub use engine::{
    DeleteOutcome,
    EngineError,
    KeySpace,
    StorageEngine,
    StoreConnection,
};
pub use memory::MemoryEngine;
pub use sqlite::SqliteEngine;
pub use translation_store::{
    CURRENT_VERSION,
    DELETE_RETRY_DELAY,
    TranslationStore,
};
