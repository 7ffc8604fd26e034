//! ログ出力の初期化
//!
//! `tracing` のfmtサブスクライバーを使います。`RUST_LOG` が設定されていればそれを優先します。

use tracing_subscriber::EnvFilter;

/// 既定のフィルター（--verbose で debug）
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "species_id=debug,species_id_lib=debug,warn"
    } else {
        "species_id=info,species_id_lib=info,warn"
    }
}

/// ログを初期化（2回目以降の呼び出しは無視）
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(false);
        init_logging(true);
        tracing::info!("ログ初期化テスト");
    }

    #[test]
    fn test_default_filter_parses() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_filter(verbose)).is_ok());
        }
    }
}
