//! locations-zh
//!
//! 国 → 省 → 市の地名を中国語名に引く翻訳テーブルと、その永続キャッシュ

pub mod build;
pub mod config;
pub mod logging;
pub mod lookup;
pub mod source;
pub mod store;
pub mod types;

mod test_utils;

pub use lookup::{
    LookupCoordinator,
    LookupError,
    PreloadReport,
};
pub use store::TranslationStore;
