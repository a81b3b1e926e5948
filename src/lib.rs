//! Agent 测试总线
//!
//! 为消息驱动的 Agent 提供确定性的进程内测试替身：
//! - 主题路由（按前缀正则匹配，同步投递，完整发布历史）
//! - 事件调度（记录调度意图，由测试手动或延迟触发）
//! - 生命周期钩子（setup / start / stop）
//! - 发布/订阅拦截（无需修改 Agent 代码即可接入共享路由器）
//! - 日志捕获
//!
//! # 架构分层
//!
//! - `domain`: 领域层，消息、事件、钩子和日志记录
//! - `core`: 核心层，路由器、调度器、生命周期注册表和配置
//! - `protocol`: 协议层，Agent 接口、传输抽象和拦截适配器
//! - `application`: 应用层，测试 Harness
//! - `infrastructure`: 基础设施层，tracing 初始化和日志捕获
//!
//! # 示例
//!
//! ```no_run
//! use agent_testbus::Harness;
//! use serde_json::json;
//!
//! let harness = Harness::new();
//! let watcher = harness.watch("devices/").unwrap();
//! harness.publish_payload("devices/meter", json!({"kw": 3.2}));
//! assert_eq!(watcher.received_count(), 1);
//! ```

// 领域层
pub mod domain;

// 核心层
pub mod core;

// 协议层
pub mod protocol;

// 应用层
pub mod application;

// 基础设施层
pub mod infrastructure;

pub mod errors;

pub use application::harness::{AgentRecord, Harness};
pub use core::config::HarnessConfig;
pub use core::lifecycle::LifecycleRegistry;
pub use core::messaging::{DeliveryFailure, Subscription, SubscriptionId, TopicRouter};
pub use core::scheduler::{EventScheduler, EventTask, ScheduleHandle};
pub use domain::{
    headers, sender_of, AgentCallback, EventFilter, EventKind, EventRef, Headers, LifecycleHook,
    LifecycleHooks, LogLevel, LogRecord, PublishedMessage, Response, ScheduleArgs, ScheduleKind,
    ScheduledEvent, SubscriptionDecl,
};
pub use errors::{HarnessError, Result};
pub use infrastructure::logger;
pub use infrastructure::logger::{AgentLogger, LogSink};
pub use protocol::agent::{Agent, AgentCore};
pub use protocol::interceptor::InterceptionAdapter;
pub use protocol::transport::{OfflineTransport, PubSubPort, Transport};

/// 版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
