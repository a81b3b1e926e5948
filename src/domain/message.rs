//! 消息领域实体
//!
//! 路由器历史中记录的已发布消息

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 主题，`/` 分隔的路径式字符串
pub type Topic = String;

/// 消息头（保持插入顺序）
pub type Headers = Map<String, Value>;

/// 已发布消息
///
/// 记录后不可变，由路由器历史持有
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedMessage {
    /// 单调递增序号，不会复用
    pub sequence: u64,
    pub topic: Topic,
    pub headers: Headers,
    pub payload: Value,
    pub bus: String,
    pub timestamp: DateTime<Utc>,
}

impl PublishedMessage {
    /// 创建新消息，时间戳取当前时间
    pub fn new(
        sequence: u64,
        topic: impl Into<Topic>,
        headers: Headers,
        payload: Value,
        bus: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            topic: topic.into(),
            headers,
            payload,
            bus: bus.into(),
            timestamp: Utc::now(),
        }
    }

    /// 读取 `sender` 头，缺失时返回 None
    pub fn sender(&self) -> Option<&str> {
        sender_of(&self.headers)
    }
}

/// 从消息头中取出发送者
pub fn sender_of(headers: &Headers) -> Option<&str> {
    headers.get("sender").and_then(Value::as_str)
}

/// 用键值对构造消息头
pub fn headers<K, I>(pairs: I) -> Headers
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
