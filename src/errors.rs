//! 标准化错误处理
//!
//! 定义测试总线专用的错误类型

use std::any::Any;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::LifecycleHook;

/// 测试总线主要错误类型
#[derive(Error, Debug)]
pub enum HarnessError {
    /// 同一 Harness 中重复注册身份
    #[error("Agent {0} is already connected to this harness")]
    DuplicateIdentity(String),

    /// Agent 没有设置身份
    #[error("Agent identity must be set to use this harness")]
    MissingIdentity,

    /// 未知身份（未 connect 或已 disconnect）
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// Agent 尚未接入任何 Harness
    #[error("Agent {0} is not connected to a harness")]
    NotConnected(String),

    /// 触发了 Agent 未声明的生命周期钩子
    #[error("{hook} lifecycle method is not found in agent {identity}")]
    LifecycleNotFound {
        identity: String,
        hook: LifecycleHook,
    },

    /// 生命周期钩子执行失败
    #[error("{hook} lifecycle method of agent {identity} failed: {source}")]
    LifecycleCallback {
        identity: String,
        hook: LifecycleHook,
        #[source]
        source: anyhow::Error,
    },

    /// 触发已取消的调度事件
    #[error("Cannot trigger cancelled event {0}")]
    CancelledEvent(Uuid),

    /// 调度回调执行失败（计数已更新）
    #[error("Scheduled callback of event {event_id} failed: {source}")]
    ScheduledCallback {
        event_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    /// 订阅者回调失败
    ///
    /// 仅由路由器构造并记录，不会从 `publish` 返回
    #[error("Subscriber {subscription} failed on topic {topic}: {reason}")]
    SubscriberCallback {
        subscription: Uuid,
        topic: String,
        reason: String,
    },

    /// 订阅模式不是合法的正则表达式
    #[error("Invalid subscription pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(String),

    /// 协作任务错误
    #[error("Task error: {0}")]
    Task(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        HarnessError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for HarnessError {
    fn from(err: tokio::task::JoinError) -> Self {
        HarnessError::Task(err.to_string())
    }
}

/// 从 panic 载荷中取出可读消息
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// 项目结果类型别名
pub type Result<T> = std::result::Result<T, HarnessError>;
