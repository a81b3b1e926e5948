//! 传输抽象
//!
//! Agent 通过 `PubSubPort` 发布和订阅；端口背后的 `Transport` 可以被替换，
//! 测试中换成路由器实现，生产中是真实传输。

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::messaging::SubscriptionId;
use crate::domain::{AgentCallback, Headers};
use crate::errors::{HarnessError, Result};

/// 发布/订阅能力
pub trait Transport: Send + Sync {
    /// 发布一条消息
    fn publish(&self, topic: &str, headers: Headers, payload: Value, bus: &str) -> Result<()>;

    /// 订阅匹配 `pattern` 的主题，回调使用 Agent 侧签名
    fn subscribe(&self, pattern: &str, callback: AgentCallback) -> Result<SubscriptionId>;

    /// 用于日志的名称
    fn name(&self) -> &str {
        "transport"
    }
}

/// 未接入任何消息总线时的传输，所有调用都失败
#[derive(Debug, Default)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn publish(&self, topic: &str, _headers: Headers, _payload: Value, _bus: &str) -> Result<()> {
        warn!("Dropped publish on {}: no message bus attached", topic);
        Err(HarnessError::Transport(format!(
            "Cannot publish on {}: no message bus attached",
            topic
        )))
    }

    fn subscribe(&self, pattern: &str, _callback: AgentCallback) -> Result<SubscriptionId> {
        Err(HarnessError::Transport(format!(
            "Cannot subscribe to {:?}: no message bus attached",
            pattern
        )))
    }

    fn name(&self) -> &str {
        "offline"
    }
}

/// Agent 对外的发布/订阅入口
///
/// 被拦截时保存原传输，恢复后换回
pub struct PubSubPort {
    current: RwLock<Arc<dyn Transport>>,
    saved: Mutex<Option<Arc<dyn Transport>>>,
}

impl PubSubPort {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            current: RwLock::new(transport),
            saved: Mutex::new(None),
        }
    }

    /// 使用 `OfflineTransport` 的端口
    pub fn offline() -> Self {
        Self::new(Arc::new(OfflineTransport))
    }

    pub fn publish(&self, topic: &str, headers: Headers, payload: Value, bus: &str) -> Result<()> {
        // 调用前释放读锁，传输内的回调可以再次使用端口
        let transport = self.transport();
        transport.publish(topic, headers, payload, bus)
    }

    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&str, &str, &str, &str, &Headers, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_with(pattern, Arc::new(callback))
    }

    pub fn subscribe_with(&self, pattern: &str, callback: AgentCallback) -> Result<SubscriptionId> {
        let transport = self.transport();
        transport.subscribe(pattern, callback)
    }

    /// 当前生效的传输
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.current.read().clone()
    }

    pub fn is_intercepted(&self) -> bool {
        self.saved.lock().is_some()
    }

    /// 换上替代传输；重复拦截时保留最初的原传输
    pub(crate) fn intercept(&self, replacement: Arc<dyn Transport>) {
        let mut saved = self.saved.lock();
        let mut current = self.current.write();
        let previous = std::mem::replace(&mut *current, replacement);
        if saved.is_none() {
            *saved = Some(previous);
        }
        debug!("Intercepted pubsub port with {}", current.name());
    }

    /// 换回原传输，没有可恢复的内容时返回 false
    pub(crate) fn release(&self) -> bool {
        let mut saved = self.saved.lock();
        match saved.take() {
            Some(original) => {
                debug!("Restored pubsub port to {}", original.name());
                *self.current.write() = original;
                true
            }
            None => false,
        }
    }
}

impl Default for PubSubPort {
    fn default() -> Self {
        Self::offline()
    }
}

impl std::fmt::Debug for PubSubPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubPort")
            .field("transport", &self.transport().name())
            .field("intercepted", &self.is_intercepted())
            .finish()
    }
}
