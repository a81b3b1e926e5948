//! 测试 Harness
//!
//! 测试持有的唯一入口：一个共享路由器、一个日志历史，以及按身份划分的
//! 生命周期钩子、拦截适配器和调度作用域。所有接入的 Agent 共用同一个
//! 路由器，模拟一条共享总线。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::core::config::HarnessConfig;
use crate::core::lifecycle::LifecycleRegistry;
use crate::core::messaging::{DeliveryFailure, Subscription, SubscriptionId, TopicRouter};
use crate::core::scheduler::{EventScheduler, EventTask, ScheduleHandle};
use crate::domain::{
    EventFilter, EventRef, Headers, LifecycleHook, LogRecord, PublishedMessage, Response, ScheduledEvent,
};
use crate::errors::{HarnessError, Result};
use crate::infrastructure::logger::{AgentLogger, LogSink};
use crate::protocol::agent::Agent;
use crate::protocol::interceptor::InterceptionAdapter;

/// 已接入 Agent 的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub identity: String,
    /// 声明的生命周期钩子
    pub lifecycle_hooks: Vec<LifecycleHook>,
    /// 经该 Agent 的适配器创建的订阅
    pub subscriptions: Vec<SubscriptionId>,
}

struct ConnectedAgent {
    agent: Arc<dyn Agent>,
    adapter: Arc<InterceptionAdapter>,
    /// 被重定向到 Harness 日志的日志器
    loggers: Vec<AgentLogger>,
}

/// 测试 Harness
pub struct Harness {
    config: HarnessConfig,
    router: Arc<TopicRouter>,
    lifecycle: LifecycleRegistry,
    scheduler: Arc<EventScheduler>,
    log: LogSink,
    agents: DashMap<String, ConnectedAgent>,
}

impl Harness {
    /// 使用默认配置创建
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        Self {
            config,
            router: Arc::new(TopicRouter::new()),
            lifecycle: LifecycleRegistry::new(),
            scheduler: Arc::new(EventScheduler::new()),
            log: LogSink::new(),
            agents: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    pub fn scheduler(&self) -> &Arc<EventScheduler> {
        &self.scheduler
    }

    pub fn lifecycle(&self) -> &LifecycleRegistry {
        &self.lifecycle
    }

    // ==================== 接入 ====================

    /// 接入 Agent
    ///
    /// 登记生命周期钩子、安装拦截适配器、分配调度作用域、捕获日志，
    /// 然后注册 Agent 声明的订阅
    pub fn connect<A: Agent + 'static>(&self, agent: Arc<A>) -> Result<AgentRecord> {
        self.connect_agent(agent, None)
    }

    /// 接入 Agent，并额外重定向给定的日志器
    pub fn connect_with_logger<A: Agent + 'static>(
        &self,
        agent: Arc<A>,
        logger: &AgentLogger,
    ) -> Result<AgentRecord> {
        self.connect_agent(agent, Some(logger))
    }

    fn connect_agent(&self, agent: Arc<dyn Agent>, logger: Option<&AgentLogger>) -> Result<AgentRecord> {
        let identity = agent.identity().to_string();
        if identity.is_empty() {
            return Err(HarnessError::MissingIdentity);
        }
        if self.agents.contains_key(&identity) {
            return Err(HarnessError::DuplicateIdentity(identity));
        }

        self.lifecycle.register(&identity, agent.lifecycle_hooks());

        let adapter = InterceptionAdapter::install(agent.as_ref(), Arc::clone(&self.router), &self.config);

        self.scheduler.register_owner(&identity);
        agent
            .core()
            .bind_schedule(ScheduleHandle::new(&identity, Arc::clone(&self.scheduler)));

        let mut loggers = vec![agent.core().logger().clone()];
        if let Some(extra) = logger {
            loggers.push(extra.clone());
        }
        for logger in &loggers {
            logger.bind(self.log.clone());
        }

        let entry = ConnectedAgent {
            agent,
            adapter,
            loggers,
        };

        for decl in entry.agent.subscriptions() {
            if let Err(e) = entry.agent.core().pubsub().subscribe_with(&decl.pattern, decl.callback) {
                self.teardown(&identity, &entry);
                return Err(e);
            }
        }

        let record = self.record_of(&identity, &entry);
        self.agents.insert(identity.clone(), entry);
        info!("Connected agent {} to harness", identity);
        Ok(record)
    }

    /// 断开 Agent：恢复入口、移除订阅、取消调度、停止日志捕获
    ///
    /// 之后同一身份可以再次接入
    pub fn disconnect(&self, identity: &str) -> Result<AgentRecord> {
        let (identity, entry) = self
            .agents
            .remove(identity)
            .ok_or_else(|| HarnessError::UnknownIdentity(identity.to_string()))?;

        let record = self.record_of(&identity, &entry);
        self.teardown(&identity, &entry);
        info!("Disconnected agent {} from harness", identity);
        Ok(record)
    }

    fn teardown(&self, identity: &str, entry: &ConnectedAgent) {
        InterceptionAdapter::restore(entry.agent.as_ref());
        entry.adapter.detach();
        self.scheduler.remove_owner(identity);
        entry.agent.core().unbind_schedule();
        self.lifecycle.unregister(identity);
        for logger in &entry.loggers {
            logger.unbind();
        }
    }

    fn record_of(&self, identity: &str, entry: &ConnectedAgent) -> AgentRecord {
        AgentRecord {
            identity: identity.to_string(),
            lifecycle_hooks: self.lifecycle.declared(identity),
            subscriptions: entry.adapter.subscriptions(),
        }
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        self.agents.contains_key(identity)
    }

    pub fn agent_record(&self, identity: &str) -> Option<AgentRecord> {
        self.agents
            .get(identity)
            .map(|entry| self.record_of(identity, &entry))
    }

    /// 已接入的身份，按字母序
    pub fn connected_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        identities.sort();
        identities
    }

    // ==================== 生命周期 ====================

    pub fn trigger_setup(&self, identity: &str, sender: &str, kwargs: &Map<String, Value>) -> Result<Response> {
        self.lifecycle.trigger_setup(identity, sender, kwargs)
    }

    pub fn trigger_start(&self, identity: &str, sender: &str, kwargs: &Map<String, Value>) -> Result<Response> {
        self.lifecycle.trigger_start(identity, sender, kwargs)
    }

    pub fn trigger_stop(&self, identity: &str, sender: &str, kwargs: &Map<String, Value>) -> Result<Response> {
        self.lifecycle.trigger_stop(identity, sender, kwargs)
    }

    // ==================== 发布/订阅 ====================

    /// 以外部发布者身份发布
    pub fn publish(&self, topic: &str, headers: Headers, payload: Value, bus: &str) -> PublishedMessage {
        self.router.publish(topic, headers, payload, bus)
    }

    /// 只带 payload 的发布，使用默认 bus
    pub fn publish_payload(&self, topic: &str, payload: Value) -> PublishedMessage {
        self.router
            .publish(topic, Headers::new(), payload, &self.config.default_bus)
    }

    /// 以外部订阅者身份订阅
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&str, &Headers, &Value, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.router.subscribe(pattern, callback)
    }

    /// 只记录消息的订阅
    pub fn watch(&self, pattern: &str) -> Result<Subscription> {
        self.router.watch(pattern)
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.router.published_messages()
    }

    pub fn delivery_failures(&self) -> Vec<DeliveryFailure> {
        self.router.delivery_failures()
    }

    // ==================== 日志 ====================

    pub fn log_records(&self) -> Vec<LogRecord> {
        self.log.records()
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    // ==================== 调度 ====================

    pub fn scheduled_events(&self, identity: &str) -> Vec<EventRef> {
        self.scheduler.events_for(identity)
    }

    pub fn periodic_events(&self, identity: &str) -> Vec<EventRef> {
        self.scheduler.periodic_events_for(identity)
    }

    pub fn cron_events(&self, identity: &str) -> Vec<EventRef> {
        self.scheduler.cron_events_for(identity)
    }

    pub fn time_events(&self, identity: &str) -> Vec<EventRef> {
        self.scheduler.time_events_for(identity)
    }

    /// 手动触发调度事件，返回回调的返回值
    pub fn trigger_scheduled_event(&self, event: &ScheduledEvent) -> Result<Value> {
        self.scheduler.trigger(event)
    }

    /// 在协作任务中延迟触发
    pub fn run_scheduled_event_with_delay(&self, event: &EventRef, delay: Duration) -> Result<EventTask> {
        self.scheduler.run_with_delay(event, delay)
    }

    /// 使用配置中的默认超时验证事件已被调度
    pub async fn verify_event_scheduled(&self, identity: &str, filter: &EventFilter) -> bool {
        self.verify_event_scheduled_within(identity, filter, self.config.verify_timeout())
            .await
    }

    pub async fn verify_event_scheduled_within(
        &self,
        identity: &str,
        filter: &EventFilter,
        timeout: Duration,
    ) -> bool {
        self.scheduler
            .verify_scheduled(identity, filter, timeout, self.config.poll_interval())
            .await
    }

    pub fn cancel_scheduled_events(&self, identity: &str) -> usize {
        self.scheduler.cancel_all(identity)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LifecycleHooks, SubscriptionDecl};
    use crate::protocol::agent::AgentCore;
    use serde_json::json;

    struct Minimal {
        core: AgentCore,
        pattern: &'static str,
    }

    impl Agent for Minimal {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        fn lifecycle_hooks(&self) -> LifecycleHooks {
            LifecycleHooks::new().on_setup(|_, _| Ok(json!("ready")))
        }

        fn subscriptions(&self) -> Vec<SubscriptionDecl> {
            vec![SubscriptionDecl::new(self.pattern, |_, _, _, _, _, _| Ok(()))]
        }
    }

    #[test]
    fn test_connect_rejects_empty_identity() {
        let harness = Harness::new();
        let agent = Arc::new(Minimal { core: AgentCore::new(""), pattern: "t" });

        assert!(matches!(harness.connect(agent), Err(HarnessError::MissingIdentity)));
        assert!(harness.connected_identities().is_empty());
    }

    #[test]
    fn test_failed_declared_subscription_rolls_back() {
        let harness = Harness::new();
        let agent = Arc::new(Minimal { core: AgentCore::new("broken"), pattern: "(" });

        let err = harness.connect(agent.clone()).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPattern { .. }));
        assert!(!harness.is_connected("broken"));
        assert!(!agent.core().pubsub().is_intercepted());
        assert!(!harness.scheduler().has_owner("broken"));
        assert!(!harness.lifecycle().is_registered("broken"));
        assert!(!agent.core().logger().is_captured());
    }

    #[test]
    fn test_record_tracks_declared_state() {
        let harness = Harness::new();
        let agent = Arc::new(Minimal { core: AgentCore::new("ok"), pattern: "t" });

        let record = harness.connect(agent).unwrap();
        assert_eq!(record.identity, "ok");
        assert_eq!(record.lifecycle_hooks, vec![LifecycleHook::Setup]);
        assert_eq!(record.subscriptions.len(), 1);
        assert_eq!(harness.agent_record("ok"), Some(record));
    }
}
