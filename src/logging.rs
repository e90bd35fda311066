//! ログ出力の初期化
//!
//! デフォルトは `info`。`RUST_LOG` で上書きできます（例: `RUST_LOG=durian_leaf_lib=debug`）。

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "info";

/// グローバルなサブスクライバーを登録
///
/// 既に登録済みの場合は何もしない（テストから複数回呼ばれても良い）。
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(env_filter)
        .try_init();
}
