//! 日志模块
//!
//! 提供 tracing 初始化，以及把 Agent 日志重定向到 Harness 历史的捕获能力

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::domain::{LogLevel, LogRecord};

/// 初始化日志系统
///
/// `RUST_LOG` 控制过滤级别，默认 `info`
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 测试用初始化，可重复调用
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// 日志捕获槽，按到达顺序追加
#[derive(Clone, Default)]
pub struct LogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: LogRecord) {
        self.records.lock().push(record);
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

/// Agent 使用的日志器
///
/// 未绑定时转发到 tracing；绑定 `LogSink` 后只写入捕获历史。
/// 克隆共享同一绑定状态。
#[derive(Clone)]
pub struct AgentLogger {
    name: Arc<str>,
    sink: Arc<RwLock<Option<LogSink>>>,
}

impl AgentLogger {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            sink: Arc::new(RwLock::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 重定向到捕获槽
    pub fn bind(&self, sink: LogSink) {
        *self.sink.write() = Some(sink);
    }

    /// 恢复转发到 tracing
    pub fn unbind(&self) {
        *self.sink.write() = None;
    }

    pub fn is_captured(&self) -> bool {
        self.sink.read().is_some()
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, Vec::new(), Map::new());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, Vec::new(), Map::new());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message, Vec::new(), Map::new());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, Vec::new(), Map::new());
    }

    /// 带参数的日志
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) {
        let record = LogRecord {
            level,
            message: message.into(),
            args,
            kwargs,
        };

        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => sink.push(record),
            None => forward(&self.name, &record),
        }
    }
}

impl std::fmt::Debug for AgentLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLogger")
            .field("name", &self.name)
            .field("captured", &self.is_captured())
            .finish()
    }
}

fn forward(agent: &str, record: &LogRecord) {
    match record.level {
        LogLevel::Debug => tracing::debug!(agent, args = ?record.args, "{}", record.message),
        LogLevel::Info => tracing::info!(agent, args = ?record.args, "{}", record.message),
        LogLevel::Warning => tracing::warn!(agent, args = ?record.args, "{}", record.message),
        LogLevel::Error => tracing::error!(agent, args = ?record.args, "{}", record.message),
    }
}
