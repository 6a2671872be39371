//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info，可通过 RUST_LOG 覆盖；重复初始化（如测试中）静默忽略。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认过滤级别
pub const DEFAULT_FILTER: &str = "info";

pub fn init() {
    init_with(DEFAULT_FILTER);
}

/// 以给定默认指令初始化；RUST_LOG 存在时优先
pub fn init_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_with("debug");
        init();
        tracing::info!("observability initialised");
    }
}
