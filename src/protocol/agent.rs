//! Agent 接口
//!
//! Harness 从 Agent 消费的全部内容：身份、生命周期钩子、声明式订阅，
//! 以及可替换的发布/订阅入口、日志器和调度入口。

use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::scheduler::ScheduleHandle;
use crate::domain::{LifecycleHooks, SubscriptionDecl};
use crate::errors::{HarnessError, Result};
use crate::infrastructure::logger::AgentLogger;
use crate::protocol::transport::{PubSubPort, Transport};

/// Agent 的运行时核心
pub struct AgentCore {
    identity: String,
    pubsub: PubSubPort,
    logger: AgentLogger,
    schedule: RwLock<Option<ScheduleHandle>>,
}

impl AgentCore {
    /// 未接入总线的核心
    pub fn new(identity: impl Into<String>) -> Self {
        Self::with_port(identity, PubSubPort::offline())
    }

    /// 使用指定传输的核心
    pub fn with_transport(identity: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_port(identity, PubSubPort::new(transport))
    }

    fn with_port(identity: impl Into<String>, pubsub: PubSubPort) -> Self {
        let identity = identity.into();
        Self {
            logger: AgentLogger::new(&identity),
            identity,
            pubsub,
            schedule: RwLock::new(None),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn pubsub(&self) -> &PubSubPort {
        &self.pubsub
    }

    pub fn logger(&self) -> &AgentLogger {
        &self.logger
    }

    /// 调度入口，未接入 Harness 时返回 `NotConnected`
    pub fn schedule(&self) -> Result<ScheduleHandle> {
        self.schedule
            .read()
            .clone()
            .ok_or_else(|| HarnessError::NotConnected(self.identity.clone()))
    }

    pub(crate) fn bind_schedule(&self, handle: ScheduleHandle) {
        *self.schedule.write() = Some(handle);
    }

    pub(crate) fn unbind_schedule(&self) {
        *self.schedule.write() = None;
    }
}

impl std::fmt::Debug for AgentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCore")
            .field("identity", &self.identity)
            .field("pubsub", &self.pubsub)
            .field("scheduled", &self.schedule.read().is_some())
            .finish()
    }
}

/// 可被 Harness 接入的 Agent
///
/// 钩子和订阅以数据形式显式声明，Harness 只在 connect 时读取一次
pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;

    fn identity(&self) -> &str {
        self.core().identity()
    }

    /// 声明的生命周期钩子
    fn lifecycle_hooks(&self) -> LifecycleHooks {
        LifecycleHooks::default()
    }

    /// 声明的订阅
    fn subscriptions(&self) -> Vec<SubscriptionDecl> {
        Vec::new()
    }
}
