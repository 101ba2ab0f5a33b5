//! ログ出力の初期化

use std::path::Path;

use anyhow::Context as _;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "locations_zh=info";
/// Filter used with `--verbose` when `RUST_LOG` is unset.
pub const VERBOSE_DIRECTIVE: &str = "locations_zh=debug";

/// tracing のサブスクライバーを初期化する
///
/// ログは標準エラー出力に書き出され、`log_file` が指定されていればファイルにも追記されます。
/// 返された guard はファイルへの書き込みが終わるまで保持する必要があります。
///
/// # Errors
/// - フィルタ指定のパースエラー
/// - ログファイル名が不正
/// - サブスクライバーが既に設定されている
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let directive = if verbose { VERBOSE_DIRECTIVE } else { DEFAULT_DIRECTIVE };
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .with(file_layer)
        .with(EnvFilter::builder().with_default_directive(directive.parse()?).from_env_lossy())
        .try_init()
        .context("failed to install the tracing subscriber")?;

    Ok(guard)
}

/// ローテーションなしでファイルに追記するアペンダー
fn file_appender(path: &Path) -> anyhow::Result<tracing_appender::rolling::RollingFileAppender> {
    let file_name = path
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", path.display()))?;
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    Ok(tracing_appender::rolling::never(dir, file_name))
}
