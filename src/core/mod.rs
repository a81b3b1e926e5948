//! 核心层：路由、调度和生命周期
//!
//! 包含主题路由器、事件调度器、生命周期注册表和配置

pub mod config;
pub mod lifecycle;
pub mod messaging;
pub mod scheduler;
