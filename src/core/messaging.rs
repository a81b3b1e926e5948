//! 消息通信层
//!
//! 同步、确定性的主题路由器：按订阅模式匹配主题，按注册顺序逐个投递。
//!
//! # 匹配规则
//!
//! 订阅模式是正则表达式，只锚定主题开头（编译为 `^(?:pattern)`）：
//! - `devices/[^/]+/all` 匹配 `devices/campus1/all`，不匹配 `devices/campus1/sub/all`
//! - 普通字面量按前缀匹配：`bnnel` 同时匹配 `bnnel` 和 `bnnel/foobar`
//! - 空模式匹配所有主题
//!
//! 不解释 `+` / `#` 层级通配符，需要时写成 `[^/]+` 和 `.*`。

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Headers, PublishedMessage};
use crate::errors::{panic_message, HarnessError, Result};

/// 订阅 ID
pub type SubscriptionId = Uuid;

/// 路由器侧的订阅回调：`(topic, headers, payload, bus)`
pub type SubscriberCallback =
    Arc<dyn Fn(&str, &Headers, &Value, &str) -> anyhow::Result<()> + Send + Sync>;

struct SubscriptionInner {
    id: SubscriptionId,
    pattern: String,
    matcher: Regex,
    callback: Option<SubscriberCallback>,
    created_order: u64,
    received: Mutex<Vec<PublishedMessage>>,
}

/// 单个订阅
///
/// 克隆得到的是同一订阅的句柄，共享收到的消息视图
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    fn new(pattern: &str, callback: Option<SubscriberCallback>, created_order: u64) -> Result<Self> {
        let matcher = compile_pattern(pattern)?;
        Ok(Self {
            inner: Arc::new(SubscriptionInner {
                id: Uuid::new_v4(),
                pattern: pattern.to_string(),
                matcher,
                callback,
                created_order,
                received: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    pub fn pattern(&self) -> &str {
        &self.inner.pattern
    }

    /// 注册顺序，决定投递顺序
    pub fn created_order(&self) -> u64 {
        self.inner.created_order
    }

    /// 是否带回调（`watch` 创建的订阅只记录消息）
    pub fn has_callback(&self) -> bool {
        self.inner.callback.is_some()
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.inner.matcher.is_match(topic)
    }

    /// 该订阅收到的消息，按投递顺序
    pub fn received_messages(&self) -> Vec<PublishedMessage> {
        self.inner.received.lock().clone()
    }

    pub fn received_count(&self) -> usize {
        self.inner.received.lock().len()
    }

    /// 清空该订阅的消息视图，不影响全局历史
    pub fn reset_received_messages(&self) {
        self.inner.received.lock().clear();
    }

    fn deliver(&self, message: &PublishedMessage) -> std::result::Result<(), String> {
        self.inner.received.lock().push(message.clone());

        let Some(callback) = &self.inner.callback else {
            return Ok(());
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            callback(
                message.topic.as_str(),
                &message.headers,
                &message.payload,
                message.bus.as_str(),
            )
        }));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(panic) => Err(format!("callback panicked: {}", panic_message(&*panic))),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("pattern", &self.inner.pattern)
            .field("created_order", &self.inner.created_order)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// 被隔离的投递失败
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub subscription: SubscriptionId,
    pub pattern: String,
    pub topic: String,
    pub sequence: u64,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn to_error(&self) -> HarnessError {
        HarnessError::SubscriberCallback {
            subscription: self.subscription,
            topic: self.topic.clone(),
            reason: self.reason.clone(),
        }
    }
}

struct RouterState {
    next_sequence: u64,
    next_order: u64,
    history: Vec<PublishedMessage>,
    /// 按 created_order 升序
    subscriptions: Vec<Subscription>,
    failures: Vec<DeliveryFailure>,
}

/// 主题路由器
///
/// 负责消息的匹配和分发，纯内存、同步实现。投递时不持有内部锁，
/// 回调中可以再次 publish / subscribe。
pub struct TopicRouter {
    state: Mutex<RouterState>,
}

impl TopicRouter {
    /// 创建新的路由器
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RouterState {
                next_sequence: 1,
                next_order: 0,
                history: Vec::new(),
                subscriptions: Vec::new(),
                failures: Vec::new(),
            }),
        }
    }

    /// 订阅匹配 `pattern` 的主题
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&str, &Headers, &Value, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(pattern, Some(Arc::new(callback)))
    }

    /// 用已包装好的回调订阅
    pub fn subscribe_with(&self, pattern: &str, callback: SubscriberCallback) -> Result<Subscription> {
        self.register(pattern, Some(callback))
    }

    /// 只记录消息、不带回调的订阅
    pub fn watch(&self, pattern: &str) -> Result<Subscription> {
        self.register(pattern, None)
    }

    fn register(&self, pattern: &str, callback: Option<SubscriberCallback>) -> Result<Subscription> {
        let mut state = self.state.lock();
        let subscription = Subscription::new(pattern, callback, state.next_order)?;
        state.next_order += 1;
        state.subscriptions.push(subscription.clone());

        info!(
            "Subscribed {} to pattern {:?}",
            subscription.id(),
            subscription.pattern()
        );
        Ok(subscription)
    }

    /// 发布消息
    ///
    /// 无论是否有订阅者都写入历史；所有匹配的回调执行完才返回。
    /// 单个回调失败只记录，不影响其他订阅者，也不返回给调用方。
    pub fn publish(&self, topic: &str, headers: Headers, payload: Value, bus: &str) -> PublishedMessage {
        let (message, targets) = {
            let mut state = self.state.lock();
            let message = PublishedMessage::new(state.next_sequence, topic, headers, payload, bus);
            state.next_sequence += 1;
            state.history.push(message.clone());

            let targets: Vec<Subscription> = state
                .subscriptions
                .iter()
                .filter(|s| s.matches(topic))
                .cloned()
                .collect();
            (message, targets)
        };

        debug!(
            "Published #{} on {} to {} subscriber(s)",
            message.sequence,
            topic,
            targets.len()
        );

        for subscription in &targets {
            if let Err(reason) = subscription.deliver(&message) {
                let failure = DeliveryFailure {
                    subscription: subscription.id(),
                    pattern: subscription.pattern().to_string(),
                    topic: message.topic.clone(),
                    sequence: message.sequence,
                    reason,
                };
                warn!(
                    "{} (pattern {:?}, message #{})",
                    failure.to_error(),
                    failure.pattern,
                    failure.sequence
                );
                self.state.lock().failures.push(failure);
            }
        }

        message
    }

    /// 取消订阅，已分发的投递不受影响
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id() != id);
        let removed = state.subscriptions.len() != before;
        if removed {
            info!("Unsubscribed {}", id);
        }
        removed
    }

    /// 移除所有订阅
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        let count = state.subscriptions.len();
        state.subscriptions.clear();
        info!("Cleared {} subscription(s)", count);
    }

    /// 清空消息历史，序号继续递增
    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<Subscription> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    /// 当前所有订阅，按注册顺序
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().subscriptions.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// 指定订阅收到的消息
    pub fn subscriber_view(&self, id: SubscriptionId) -> Option<Vec<PublishedMessage>> {
        self.subscription(id).map(|s| s.received_messages())
    }

    /// 重置指定订阅的消息视图
    pub fn reset_subscriber_view(&self, id: SubscriptionId) -> bool {
        match self.subscription(id) {
            Some(s) => {
                s.reset_received_messages();
                true
            }
            None => false,
        }
    }

    /// 全部已发布消息，按序号升序
    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.state.lock().history.clone()
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().history.len()
    }

    /// 被隔离的订阅者失败
    pub fn delivery_failures(&self) -> Vec<DeliveryFailure> {
        self.state.lock().failures.clone()
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|source| HarnessError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pattern_is_anchored_at_start_only() {
        let router = TopicRouter::new();
        let sub = router.watch("campus").unwrap();

        assert!(sub.matches("campus"));
        assert!(sub.matches("campus/building1"));
        assert!(!sub.matches("devices/campus"));
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let router = TopicRouter::new();
        let sub = router.watch("").unwrap();

        router.publish("a", Headers::new(), json!(1), "");
        router.publish("b/c", Headers::new(), json!(2), "");

        assert_eq!(sub.received_count(), 2);
    }

    #[test]
    fn test_invalid_pattern() {
        let router = TopicRouter::new();
        let err = router.watch("devices/(unclosed").unwrap_err();

        assert!(matches!(err, HarnessError::InvalidPattern { ref pattern, .. } if pattern == "devices/(unclosed"));
        assert_eq!(router.subscription_count(), 0);
    }

    #[test]
    fn test_sequence_survives_history_clear() {
        let router = TopicRouter::new();
        let first = router.publish("t", Headers::new(), Value::Null, "");
        router.clear_history();
        let second = router.publish("t", Headers::new(), Value::Null, "");

        assert_eq!(router.message_count(), 1);
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let router = TopicRouter::new();
        router
            .subscribe("t", |_, _, _, _| -> anyhow::Result<()> { panic!("boom") })
            .unwrap();
        let healthy = router.watch("t").unwrap();

        router.publish("t", Headers::new(), json!("x"), "");

        assert_eq!(healthy.received_count(), 1);
        let failures = router.delivery_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.contains("boom"));
    }

    #[test]
    fn test_reentrant_publish_from_callback() {
        let router = Arc::new(TopicRouter::new());
        let inner = Arc::clone(&router);
        router
            .subscribe("ping", move |_, _, _, _| {
                inner.publish("pong", Headers::new(), Value::Null, "");
                Ok(())
            })
            .unwrap();
        let pong = router.watch("pong").unwrap();

        router.publish("ping", Headers::new(), Value::Null, "");

        assert_eq!(pong.received_count(), 1);
        let topics: Vec<String> = router.published_messages().into_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["ping", "pong"]);
    }
}
