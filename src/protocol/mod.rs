//! 协议层：Agent 与消息总线之间的接口
//!
//! - `agent`: Agent 接口和运行时核心
//! - `transport`: 可替换的发布/订阅传输
//! - `interceptor`: 把传输转接到内存路由器的适配器

pub mod agent;
pub mod interceptor;
pub mod transport;
