//! 配置管理
//!
//! 默认值可以被环境变量（`TESTBUS_*`）或 YAML 片段覆盖

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, Result};

/// Harness 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// 交给 Agent 回调的 `peer` 值，代表路由器
    pub router_peer: String,
    /// 消息头缺少 `sender` 时使用的发送者
    pub unknown_sender: String,
    /// 只给 payload 的便捷发布使用的 bus
    pub default_bus: String,
    /// `verify_scheduled` 的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// `verify_scheduled` 的默认超时（毫秒）
    pub verify_timeout_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            router_peer: "pubsub".to_string(),
            unknown_sender: "unknown".to_string(),
            default_bus: String::new(),
            poll_interval_ms: 100,
            verify_timeout_ms: 5000,
        }
    }
}

impl HarnessConfig {
    /// 从环境变量读取，未设置的项使用默认值
    ///
    /// # 环境变量
    /// - `TESTBUS_ROUTER_PEER`
    /// - `TESTBUS_UNKNOWN_SENDER`
    /// - `TESTBUS_DEFAULT_BUS`
    /// - `TESTBUS_POLL_INTERVAL_MS`
    /// - `TESTBUS_VERIFY_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("TESTBUS_ROUTER_PEER") {
            config.router_peer = v;
        }
        if let Some(v) = lookup("TESTBUS_UNKNOWN_SENDER") {
            config.unknown_sender = v;
        }
        if let Some(v) = lookup("TESTBUS_DEFAULT_BUS") {
            config.default_bus = v;
        }
        if let Some(v) = lookup("TESTBUS_POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_millis("TESTBUS_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("TESTBUS_VERIFY_TIMEOUT_MS") {
            config.verify_timeout_ms = parse_millis("TESTBUS_VERIFY_TIMEOUT_MS", &v)?;
        }

        Ok(config)
    }

    /// 从 YAML 文本解析，缺省字段取默认值
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| HarnessError::Config(format!("{} must be milliseconds, got {:?}: {}", key, value, e)))
}
