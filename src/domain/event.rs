//! 调度事件领域实体
//!
//! 记录 periodic / cron / 定时回调的调度意图，只在显式触发时执行

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::errors::{panic_message, HarnessError, Result};

/// 调度回调：接收保存的位置参数和关键字参数
pub type ScheduledCallback =
    Arc<dyn Fn(&[Value], &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync>;

/// 事件共享引用
pub type EventRef = Arc<ScheduledEvent>;

/// 事件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Periodic,
    Cron,
    Time,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Periodic => write!(f, "periodic"),
            EventKind::Cron => write!(f, "cron"),
            EventKind::Time => write!(f, "time"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "periodic" => Ok(EventKind::Periodic),
            "cron" => Ok(EventKind::Cron),
            "time" => Ok(EventKind::Time),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}

/// 调度方式及其参数
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleKind {
    /// 固定周期
    Periodic { period: Duration },
    /// cron 表达式（原样保存，不解析）
    Cron { expression: String },
    /// 指定时间点
    Time { fire_at: DateTime<Utc> },
}

impl ScheduleKind {
    pub fn kind(&self) -> EventKind {
        match self {
            ScheduleKind::Periodic { .. } => EventKind::Periodic,
            ScheduleKind::Cron { .. } => EventKind::Cron,
            ScheduleKind::Time { .. } => EventKind::Time,
        }
    }
}

/// 回调参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl ScheduleArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加位置参数
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// 设置关键字参数
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
struct RunState {
    last_run: Option<DateTime<Utc>>,
    run_count: u64,
}

/// 调度事件
///
/// `run_count` 与 `last_run` 只由触发操作一起更新；取消是单向的
pub struct ScheduledEvent {
    id: Uuid,
    owner: String,
    schedule: ScheduleKind,
    callback: ScheduledCallback,
    args: ScheduleArgs,
    created_at: DateTime<Utc>,
    run_state: Mutex<RunState>,
    cancelled: AtomicBool,
    /// 尚未结束的延迟任务
    in_flight: Mutex<Vec<AbortHandle>>,
}

impl ScheduledEvent {
    /// 创建新的调度事件
    pub fn new(
        owner: impl Into<String>,
        schedule: ScheduleKind,
        callback: ScheduledCallback,
        args: ScheduleArgs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            schedule,
            callback,
            args,
            created_at: Utc::now(),
            run_state: Mutex::new(RunState::default()),
            cancelled: AtomicBool::new(false),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 所属 Agent 身份
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn kind(&self) -> EventKind {
        self.schedule.kind()
    }

    pub fn schedule(&self) -> &ScheduleKind {
        &self.schedule
    }

    pub fn period(&self) -> Option<Duration> {
        match &self.schedule {
            ScheduleKind::Periodic { period } => Some(*period),
            _ => None,
        }
    }

    pub fn cron_expression(&self) -> Option<&str> {
        match &self.schedule {
            ScheduleKind::Cron { expression } => Some(expression),
            _ => None,
        }
    }

    pub fn fire_at(&self) -> Option<DateTime<Utc>> {
        match &self.schedule {
            ScheduleKind::Time { fire_at } => Some(*fire_at),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Value] {
        &self.args.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.args.kwargs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.run_state.lock().last_run
    }

    pub fn run_count(&self) -> u64 {
        self.run_state.lock().run_count
    }

    /// `(run_count, last_run)` 的一致快照
    pub fn run_snapshot(&self) -> (u64, Option<DateTime<Utc>>) {
        let state = self.run_state.lock();
        (state.run_count, state.last_run)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// 取消事件并终止关联的延迟任务
    ///
    /// 已在执行中的回调不受影响
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        for handle in self.in_flight.lock().drain(..) {
            handle.abort();
        }
    }

    /// 同步执行回调
    ///
    /// 回调失败或 panic 时，计数和时间先更新，再把错误返回给调用方
    pub fn fire(&self) -> Result<Value> {
        if self.is_cancelled() {
            return Err(HarnessError::CancelledEvent(self.id));
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (self.callback)(&self.args.args, &self.args.kwargs)
        }))
        .unwrap_or_else(|panic| {
            Err(anyhow::anyhow!(
                "callback panicked: {}",
                panic_message(&*panic)
            ))
        });

        {
            let mut state = self.run_state.lock();
            let now = Utc::now();
            state.last_run = Some(match state.last_run {
                Some(prev) if prev > now => prev,
                _ => now,
            });
            state.run_count += 1;
        }

        outcome.map_err(|source| HarnessError::ScheduledCallback {
            event_id: self.id,
            source,
        })
    }

    /// 登记延迟任务；同一事件的多个任务互不影响，取消时一并终止
    pub(crate) fn attach_task(&self, handle: AbortHandle) {
        if self.is_cancelled() {
            handle.abort();
            return;
        }
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    #[cfg(test)]
    pub(crate) fn pending_tasks(&self) -> usize {
        self.in_flight
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduledEvent {}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (run_count, last_run) = self.run_snapshot();
        f.debug_struct("ScheduledEvent")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("schedule", &self.schedule)
            .field("args", &self.args)
            .field("created_at", &self.created_at)
            .field("last_run", &last_run)
            .field("run_count", &run_count)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 事件查询过滤条件
///
/// 所有条件同时满足才算匹配；已取消的事件永远不匹配
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub period: Option<Duration>,
    pub cron_expression: Option<String>,
}

impl EventFilter {
    /// 匹配任意未取消事件
    pub fn any() -> Self {
        Self::default()
    }

    /// 指定周期的 periodic 事件
    pub fn periodic(period: Duration) -> Self {
        Self {
            kind: Some(EventKind::Periodic),
            period: Some(period),
            cron_expression: None,
        }
    }

    /// 指定表达式的 cron 事件
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            kind: Some(EventKind::Cron),
            period: None,
            cron_expression: Some(expression.into()),
        }
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, event: &ScheduledEvent) -> bool {
        if event.is_cancelled() {
            return false;
        }
        if self.kind.is_some_and(|k| k != event.kind()) {
            return false;
        }
        if self.period.is_some() && self.period != event.period() {
            return false;
        }
        if let Some(expr) = &self.cron_expression {
            if event.cron_expression() != Some(expr.as_str()) {
                return false;
            }
        }
        true
    }
}
