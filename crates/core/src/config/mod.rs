//! 注册中心配置
//!
//! 配置按以下顺序加载，后者覆盖前者：
//! 1. 内置默认值
//! 2. TOML 配置文件（显式路径，或 `config/registry.toml`、`registry.toml`、
//!    `/etc/service-registry/config.toml` 中第一个存在的文件）
//! 3. 以 `REGISTRY_` 为前缀的环境变量，嵌套字段用 `__` 分隔，
//!    例如 `REGISTRY_DISPATCHER__INTERVAL_MS=500`

pub mod models;

pub use models::*;

#[cfg(test)]
mod tests;
