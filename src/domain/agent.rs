//! Agent 领域实体
//!
//! 生命周期钩子、声明式订阅以及生命周期触发的响应

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::Headers;

/// 生命周期处理函数：`(sender, kwargs) -> 返回值`
pub type LifecycleHandler =
    Arc<dyn Fn(&str, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync>;

/// Agent 侧的订阅回调：`(peer, sender, bus, topic, headers, payload)`
pub type AgentCallback =
    Arc<dyn Fn(&str, &str, &str, &str, &Headers, &Value) -> anyhow::Result<()> + Send + Sync>;

/// 生命周期钩子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleHook {
    Setup,
    Start,
    Stop,
}

impl LifecycleHook {
    pub const ALL: [LifecycleHook; 3] = [LifecycleHook::Setup, LifecycleHook::Start, LifecycleHook::Stop];

    /// 钩子名称（与平台侧 receiver 名一致）
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleHook::Setup => "onsetup",
            LifecycleHook::Start => "onstart",
            LifecycleHook::Stop => "onstop",
        }
    }
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Agent 声明的生命周期钩子集合，缺省的钩子是合法的
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    setup: Option<LifecycleHandler>,
    start: Option<LifecycleHandler>,
    stop: Option<LifecycleHandler>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_setup<F>(self, f: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.with(LifecycleHook::Setup, Arc::new(f))
    }

    pub fn on_start<F>(self, f: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.with(LifecycleHook::Start, Arc::new(f))
    }

    pub fn on_stop<F>(self, f: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.with(LifecycleHook::Stop, Arc::new(f))
    }

    /// 设置指定钩子
    pub fn with(mut self, hook: LifecycleHook, handler: LifecycleHandler) -> Self {
        match hook {
            LifecycleHook::Setup => self.setup = Some(handler),
            LifecycleHook::Start => self.start = Some(handler),
            LifecycleHook::Stop => self.stop = Some(handler),
        }
        self
    }

    pub fn get(&self, hook: LifecycleHook) -> Option<&LifecycleHandler> {
        match hook {
            LifecycleHook::Setup => self.setup.as_ref(),
            LifecycleHook::Start => self.start.as_ref(),
            LifecycleHook::Stop => self.stop.as_ref(),
        }
    }

    /// 已声明的钩子
    pub fn declared(&self) -> Vec<LifecycleHook> {
        LifecycleHook::ALL
            .into_iter()
            .filter(|hook| self.get(*hook).is_some())
            .collect()
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("declared", &self.declared())
            .finish()
    }
}

/// 声明式订阅，在 connect 时经拦截适配器注册
#[derive(Clone)]
pub struct SubscriptionDecl {
    pub pattern: String,
    pub callback: AgentCallback,
}

impl SubscriptionDecl {
    pub fn new<F>(pattern: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str, &str, &str, &str, &Headers, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            pattern: pattern.into(),
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for SubscriptionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionDecl")
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// 生命周期触发结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub identity: String,
    pub hook: LifecycleHook,
    pub return_value: Value,
}

impl Response {
    pub fn hook_name(&self) -> &'static str {
        self.hook.name()
    }
}
