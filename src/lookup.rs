//! 国名から翻訳データを解決するコーディネーター
//!
//! キャッシュを優先し、同じ国の同時読み込みを一つにまとめ、
//! 読み込んだデータはバックグラウンドでキャッシュに書き戻します。

mod coordinator;
mod error;

pub use coordinator::{
    LookupCoordinator,
    PreloadReport,
};
pub use error::LookupError;
