//! 事件调度器
//!
//! 只记录回调的调度意图，不启动真实定时器；由测试决定何时触发。
//! 每个身份拥有独立的事件作用域。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    EventFilter, EventKind, EventRef, ScheduleArgs, ScheduleKind, ScheduledCallback, ScheduledEvent,
};
use crate::errors::{HarnessError, Result};

/// 事件调度器
pub struct EventScheduler {
    /// 身份 -> 按创建顺序排列的事件
    owners: DashMap<String, Vec<EventRef>>,
}

impl EventScheduler {
    /// 创建新的调度器
    pub fn new() -> Self {
        Self {
            owners: DashMap::new(),
        }
    }

    /// 为身份分配事件作用域，已存在时返回 false
    pub fn register_owner(&self, owner: &str) -> bool {
        if self.owners.contains_key(owner) {
            return false;
        }
        self.owners.insert(owner.to_string(), Vec::new());
        info!("Allocated schedule scope for {}", owner);
        true
    }

    /// 取消并移除身份的全部事件
    pub fn remove_owner(&self, owner: &str) -> Vec<EventRef> {
        self.cancel_all(owner);
        self.owners
            .remove(owner)
            .map(|(_, events)| events)
            .unwrap_or_default()
    }

    pub fn has_owner(&self, owner: &str) -> bool {
        self.owners.contains_key(owner)
    }

    /// 周期事件
    pub fn schedule_periodic<F>(
        &self,
        owner: &str,
        callback: F,
        period: Duration,
        args: ScheduleArgs,
    ) -> Result<EventRef>
    where
        F: Fn(&[Value], &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.schedule(owner, ScheduleKind::Periodic { period }, Arc::new(callback), args)
    }

    /// cron 事件
    pub fn schedule_cron<F>(
        &self,
        owner: &str,
        callback: F,
        cron_expression: impl Into<String>,
        args: ScheduleArgs,
    ) -> Result<EventRef>
    where
        F: Fn(&[Value], &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let expression = cron_expression.into();
        self.schedule(owner, ScheduleKind::Cron { expression }, Arc::new(callback), args)
    }

    /// 定时事件
    pub fn schedule_at<F>(
        &self,
        owner: &str,
        callback: F,
        fire_at: DateTime<Utc>,
        args: ScheduleArgs,
    ) -> Result<EventRef>
    where
        F: Fn(&[Value], &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.schedule(owner, ScheduleKind::Time { fire_at }, Arc::new(callback), args)
    }

    /// 登记调度意图，不执行回调
    pub fn schedule(
        &self,
        owner: &str,
        schedule: ScheduleKind,
        callback: ScheduledCallback,
        args: ScheduleArgs,
    ) -> Result<EventRef> {
        let mut events = self
            .owners
            .get_mut(owner)
            .ok_or_else(|| HarnessError::UnknownIdentity(owner.to_string()))?;

        let event = Arc::new(ScheduledEvent::new(owner, schedule, callback, args));
        events.push(Arc::clone(&event));

        debug!("Scheduled {} event {} for {}", event.kind(), event.id(), owner);
        Ok(event)
    }

    /// 同步触发事件
    ///
    /// 已取消的事件返回 `CancelledEvent`；回调失败在计数更新后返回
    pub fn trigger(&self, event: &ScheduledEvent) -> Result<Value> {
        let result = event.fire();
        match &result {
            Ok(_) => debug!("Triggered event {} (run #{})", event.id(), event.run_count()),
            Err(HarnessError::CancelledEvent(id)) => warn!("Refused to trigger cancelled event {}", id),
            Err(e) => error!("Error executing scheduled callback: {}", e),
        }
        result
    }

    /// 在协作任务中延迟触发事件
    ///
    /// 需要在 tokio 运行时中调用
    pub fn run_with_delay(&self, event: &EventRef, delay: Duration) -> Result<EventTask> {
        if event.is_cancelled() {
            return Err(HarnessError::CancelledEvent(event.id()));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HarnessError::Task(format!("No tokio runtime available: {}", e)))?;

        let task_event = Arc::clone(event);
        let handle = runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = task_event.fire();
            if let Err(e) = &result {
                error!("Delayed trigger of event {} failed: {}", task_event.id(), e);
            }
            result
        });

        event.attach_task(handle.abort_handle());
        debug!("Spawned delayed trigger for event {} after {:?}", event.id(), delay);

        Ok(EventTask {
            event_id: event.id(),
            handle,
        })
    }

    /// 身份的全部事件（包括已取消的），按创建顺序
    pub fn events_for(&self, owner: &str) -> Vec<EventRef> {
        self.owners
            .get(owner)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// 满足过滤条件的未取消事件
    pub fn find(&self, owner: &str, filter: &EventFilter) -> Vec<EventRef> {
        self.events_for(owner)
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect()
    }

    pub fn active_events_for(&self, owner: &str) -> Vec<EventRef> {
        self.find(owner, &EventFilter::any())
    }

    pub fn periodic_events_for(&self, owner: &str) -> Vec<EventRef> {
        self.find(owner, &EventFilter::any().with_kind(EventKind::Periodic))
    }

    pub fn cron_events_for(&self, owner: &str) -> Vec<EventRef> {
        self.find(owner, &EventFilter::any().with_kind(EventKind::Cron))
    }

    pub fn time_events_for(&self, owner: &str) -> Vec<EventRef> {
        self.find(owner, &EventFilter::any().with_kind(EventKind::Time))
    }

    /// 轮询直到出现匹配事件或超时
    ///
    /// 已有匹配时立即返回 true；两次轮询之间让出执行权
    pub async fn verify_scheduled(
        &self,
        owner: &str,
        filter: &EventFilter,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let started = Instant::now();
        // 超出 Instant 表示范围的超时视为一年后
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + Duration::from_secs(365 * 24 * 60 * 60));
        let poll_interval = poll_interval.max(Duration::from_millis(1));

        loop {
            if self.events_for(owner).iter().any(|e| filter.matches(e)) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("No event matching {:?} for {} within {:?}", filter, owner, timeout);
                return false;
            }

            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// 取消身份的全部事件并终止延迟任务，返回本次新取消的数量
    pub fn cancel_all(&self, owner: &str) -> usize {
        let events = self.events_for(owner);
        let mut cancelled = 0;
        for event in &events {
            if !event.is_cancelled() {
                cancelled += 1;
            }
            event.cancel();
        }
        if cancelled > 0 {
            info!("Cancelled {} scheduled event(s) for {}", cancelled, owner);
        }
        cancelled
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// 延迟触发任务句柄
pub struct EventTask {
    event_id: Uuid,
    handle: JoinHandle<Result<Value>>,
}

impl EventTask {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 终止任务；已开始执行的回调无法撤回
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// 等待任务完成，最多等待 `timeout`
    ///
    /// 超时后任务继续运行，可以再次 join
    pub async fn join(&mut self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Err(_) => Err(HarnessError::Task(format!(
                "Event {} did not finish within {:?}",
                self.event_id, timeout
            ))),
            Ok(Err(e)) if e.is_cancelled() => Err(HarnessError::Task(format!(
                "Event {} task was cancelled",
                self.event_id
            ))),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(result)) => result,
        }
    }
}

/// Agent 侧的调度入口，绑定到单个身份
#[derive(Clone)]
pub struct ScheduleHandle {
    identity: String,
    scheduler: Arc<EventScheduler>,
}

impl ScheduleHandle {
    pub fn new(identity: impl Into<String>, scheduler: Arc<EventScheduler>) -> Self {
        Self {
            identity: identity.into(),
            scheduler,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn periodic<F>(&self, callback: F, period: Duration, args: ScheduleArgs) -> Result<EventRef>
    where
        F: Fn(&[Value], &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.scheduler
            .schedule_periodic(&self.identity, callback, period, args)
    }

    pub fn cron<F>(&self, callback: F, cron_expression: &str, args: ScheduleArgs) -> Result<EventRef>
    where
        F: Fn(&[Value], &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.scheduler
            .schedule_cron(&self.identity, callback, cron_expression, args)
    }

    pub fn schedule_at<F>(&self, callback: F, fire_at: DateTime<Utc>, args: ScheduleArgs) -> Result<EventRef>
    where
        F: Fn(&[Value], &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.scheduler
            .schedule_at(&self.identity, callback, fire_at, args)
    }

    /// 本身份的全部事件
    pub fn events(&self) -> Vec<EventRef> {
        self.scheduler.events_for(&self.identity)
    }

    pub fn cancel_all(&self) -> usize {
        self.scheduler.cancel_all(&self.identity)
    }
}

impl std::fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("identity", &self.identity)
            .finish()
    }
}
