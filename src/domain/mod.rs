//! Domain Layer
//!
//! 消息、调度事件、生命周期和日志等实体定义

pub mod agent;
pub mod event;
pub mod log;
pub mod message;

pub use agent::*;
pub use event::*;
pub use log::*;
pub use message::*;
