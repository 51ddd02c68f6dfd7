//! 配置管理
//!
//! 配置按 默认值 → TOML 文件 → 环境变量 的顺序叠加，
//! 加载后统一调用 [`AppConfig::validate`] 校验。

pub mod models;

pub use models::*;
