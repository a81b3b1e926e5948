//! 发布/订阅拦截适配器
//!
//! 把 Agent 的 `PubSubPort` 转接到共享的 `TopicRouter`，
//! 并在路由器回调签名和 Agent 回调签名之间转换。

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::config::HarnessConfig;
use crate::core::messaging::{SubscriptionId, TopicRouter};
use crate::domain::{sender_of, AgentCallback, Headers};
use crate::errors::Result;
use crate::protocol::agent::Agent;
use crate::protocol::transport::Transport;

/// 拦截适配器
pub struct InterceptionAdapter {
    identity: String,
    router: Arc<TopicRouter>,
    peer: String,
    unknown_sender: String,
    /// 经本适配器创建的订阅
    owned: Mutex<Vec<SubscriptionId>>,
}

impl InterceptionAdapter {
    pub fn new(identity: impl Into<String>, router: Arc<TopicRouter>, config: &HarnessConfig) -> Self {
        Self {
            identity: identity.into(),
            router,
            peer: config.router_peer.clone(),
            unknown_sender: config.unknown_sender.clone(),
            owned: Mutex::new(Vec::new()),
        }
    }

    /// 把 Agent 的发布/订阅入口换成路由器转发
    ///
    /// 不需要修改 Agent 本身，只替换它已经暴露的端口
    pub fn install(agent: &dyn Agent, router: Arc<TopicRouter>, config: &HarnessConfig) -> Arc<Self> {
        let adapter = Arc::new(Self::new(agent.identity(), router, config));
        agent.core().pubsub().intercept(adapter.clone());
        info!("Installed pubsub interception for {}", agent.identity());
        adapter
    }

    /// 恢复 Agent 原来的入口，可重复调用
    pub fn restore(agent: &dyn Agent) -> bool {
        let restored = agent.core().pubsub().release();
        if restored {
            info!("Restored original pubsub for {}", agent.identity());
        }
        restored
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// 经本适配器创建、仍由它记录的订阅
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.owned.lock().clone()
    }

    /// 从路由器移除本适配器创建的全部订阅
    pub fn detach(&self) -> usize {
        let owned = std::mem::take(&mut *self.owned.lock());
        owned
            .into_iter()
            .filter(|id| self.router.unsubscribe(*id))
            .count()
    }
}

impl Transport for InterceptionAdapter {
    fn publish(&self, topic: &str, headers: Headers, payload: Value, bus: &str) -> Result<()> {
        let message = self.router.publish(topic, headers, payload, bus);
        debug!("{} published #{} on {}", self.identity, message.sequence, topic);
        Ok(())
    }

    fn subscribe(&self, pattern: &str, callback: AgentCallback) -> Result<SubscriptionId> {
        let peer = self.peer.clone();
        let unknown_sender = self.unknown_sender.clone();

        let subscription = self.router.subscribe(pattern, move |topic, headers, payload, bus| {
            let sender = sender_of(headers).unwrap_or(unknown_sender.as_str());
            callback(peer.as_str(), sender, bus, topic, headers, payload)
        })?;

        self.owned.lock().push(subscription.id());
        debug!("{} subscribed to {:?}", self.identity, pattern);
        Ok(subscription.id())
    }

    fn name(&self) -> &str {
        "topic-router"
    }
}

impl std::fmt::Debug for InterceptionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionAdapter")
            .field("identity", &self.identity)
            .field("peer", &self.peer)
            .field("subscriptions", &self.owned.lock().len())
            .finish()
    }
}
