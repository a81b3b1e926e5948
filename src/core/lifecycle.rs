//! 生命周期注册表
//!
//! 在注册时记录 Agent 的 setup / start / stop 处理函数，之后按需直接调用

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{LifecycleHook, LifecycleHooks, Response};
use crate::errors::{HarnessError, Result};

/// 生命周期注册表
pub struct LifecycleRegistry {
    hooks: DashMap<String, LifecycleHooks>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self {
            hooks: DashMap::new(),
        }
    }

    /// 登记身份声明的钩子，覆盖之前的登记
    pub fn register(&self, identity: &str, hooks: LifecycleHooks) {
        info!("Registered lifecycle hooks {:?} for {}", hooks.declared(), identity);
        self.hooks.insert(identity.to_string(), hooks);
    }

    pub fn unregister(&self, identity: &str) -> bool {
        self.hooks.remove(identity).is_some()
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.hooks.contains_key(identity)
    }

    /// 身份已声明的钩子
    pub fn declared(&self, identity: &str) -> Vec<LifecycleHook> {
        self.hooks
            .get(identity)
            .map(|h| h.declared())
            .unwrap_or_default()
    }

    pub fn trigger_setup(&self, identity: &str, sender: &str, kwargs: &Map<String, Value>) -> Result<Response> {
        self.trigger(identity, LifecycleHook::Setup, sender, kwargs)
    }

    pub fn trigger_start(&self, identity: &str, sender: &str, kwargs: &Map<String, Value>) -> Result<Response> {
        self.trigger(identity, LifecycleHook::Start, sender, kwargs)
    }

    pub fn trigger_stop(&self, identity: &str, sender: &str, kwargs: &Map<String, Value>) -> Result<Response> {
        self.trigger(identity, LifecycleHook::Stop, sender, kwargs)
    }

    /// 直接调用一次钩子，无重试、无排队
    pub fn trigger(
        &self,
        identity: &str,
        hook: LifecycleHook,
        sender: &str,
        kwargs: &Map<String, Value>,
    ) -> Result<Response> {
        // 先取出处理函数再释放 guard，钩子内可以回调注册表
        let handler = {
            let hooks = self
                .hooks
                .get(identity)
                .ok_or_else(|| HarnessError::UnknownIdentity(identity.to_string()))?;
            hooks
                .get(hook)
                .cloned()
                .ok_or_else(|| HarnessError::LifecycleNotFound {
                    identity: identity.to_string(),
                    hook,
                })?
        };

        debug!("Triggering {} for {} (sender {:?})", hook, identity, sender);
        let return_value = handler(sender, kwargs).map_err(|source| HarnessError::LifecycleCallback {
            identity: identity.to_string(),
            hook,
            source,
        })?;

        Ok(Response {
            identity: identity.to_string(),
            hook,
            return_value,
        })
    }
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_wraps_return_value() {
        let registry = LifecycleRegistry::new();
        registry.register(
            "agent",
            LifecycleHooks::new().on_start(|sender, kwargs| {
                Ok(json!({ "sender": sender, "kwargs": kwargs.len() }))
            }),
        );

        let mut kwargs = Map::new();
        kwargs.insert("reason".to_string(), json!("test"));
        let response = registry.trigger_start("agent", "platform", &kwargs).unwrap();

        assert_eq!(response.identity, "agent");
        assert_eq!(response.hook_name(), "onstart");
        assert_eq!(response.return_value, json!({ "sender": "platform", "kwargs": 1 }));
    }

    #[test]
    fn test_missing_hook() {
        let registry = LifecycleRegistry::new();
        registry.register("agent", LifecycleHooks::new());

        let err = registry.trigger_stop("agent", "", &Map::new()).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::LifecycleNotFound { hook: LifecycleHook::Stop, .. }
        ));
    }

    #[test]
    fn test_unknown_identity() {
        let registry = LifecycleRegistry::new();
        let err = registry.trigger_setup("nobody", "", &Map::new()).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownIdentity(_)));
    }
}
