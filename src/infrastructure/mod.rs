//! 基础设施层：日志
//!
//! 提供 tracing 初始化和 Agent 日志捕获

pub mod logger;
