//! 测试通用工具
//!
//! 提供日志初始化、可脚本化的测试 Agent 和消息记录器
#![allow(dead_code)]

use std::sync::{Arc, Once};

use agent_testbus::{logger, Agent, AgentCore, Headers, LifecycleHooks, SubscriptionDecl};
use parking_lot::Mutex;
use serde_json::{json, Value};

static INIT: Once = Once::new();

/// 初始化测试环境
pub fn setup() {
    INIT.call_once(logger::init_for_tests);
}

/// Agent 回调收到的一条消息
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub peer: String,
    pub sender: String,
    pub bus: String,
    pub topic: String,
    pub headers: Headers,
    pub payload: Value,
}

pub type Recorder = Arc<Mutex<Vec<Received>>>;

pub fn recorder() -> Recorder {
    Arc::new(Mutex::new(Vec::new()))
}

/// Agent 侧签名的记录回调
pub fn recording_callback(
    recorder: &Recorder,
) -> impl Fn(&str, &str, &str, &str, &Headers, &Value) -> anyhow::Result<()> + Send + Sync + 'static {
    let recorder = Arc::clone(recorder);
    move |peer, sender, bus, topic, headers, payload| {
        recorder.lock().push(Received {
            peer: peer.to_string(),
            sender: sender.to_string(),
            bus: bus.to_string(),
            topic: topic.to_string(),
            headers: headers.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// 测试用 Agent
///
/// 默认声明全部三个生命周期钩子，每次调用记录为 `"<hook>:<sender>"`
pub struct TestAgent {
    core: AgentCore,
    prefixes: Vec<String>,
    with_hooks: bool,
    received: Recorder,
    lifecycle_calls: Arc<Mutex<Vec<String>>>,
}

impl TestAgent {
    pub fn new(identity: &str) -> Self {
        Self {
            core: AgentCore::new(identity),
            prefixes: Vec::new(),
            with_hooks: true,
            received: recorder(),
            lifecycle_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 声明一个订阅，收到的消息写入 `received()`
    pub fn subscribed_to(mut self, pattern: &str) -> Self {
        self.prefixes.push(pattern.to_string());
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.with_hooks = false;
        self
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    pub fn lifecycle_calls(&self) -> Vec<String> {
        self.lifecycle_calls.lock().clone()
    }
}

impl Agent for TestAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn lifecycle_hooks(&self) -> LifecycleHooks {
        if !self.with_hooks {
            return LifecycleHooks::new();
        }

        let identity = self.core.identity().to_string();
        let setup_calls = Arc::clone(&self.lifecycle_calls);
        let start_calls = Arc::clone(&self.lifecycle_calls);
        let stop_calls = Arc::clone(&self.lifecycle_calls);

        LifecycleHooks::new()
            .on_setup(move |sender, _kwargs| {
                setup_calls.lock().push(format!("onsetup:{}", sender));
                Ok(json!({ "identity": identity }))
            })
            .on_start(move |sender, kwargs| {
                start_calls.lock().push(format!("onstart:{}", sender));
                Ok(kwargs.get("mode").cloned().unwrap_or(json!("started")))
            })
            .on_stop(move |sender, _kwargs| {
                stop_calls.lock().push(format!("onstop:{}", sender));
                Ok(Value::Null)
            })
    }

    fn subscriptions(&self) -> Vec<SubscriptionDecl> {
        self.prefixes
            .iter()
            .map(|pattern| SubscriptionDecl::new(pattern.as_str(), recording_callback(&self.received)))
            .collect()
    }
}
