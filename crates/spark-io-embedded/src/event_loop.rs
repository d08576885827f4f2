//! 由调用方驱动的事件循环。
//!
//! # 设计背景（Why）
//! - 测试需要确定性：任务不在后台线程上运行，而是在调用方显式 `run_pending_tasks` 时于当前线程执行。
//! - 定时任务使用可拨动的虚拟时钟，连接超时之类的场景无需真实等待。
//!
//! # 契约（What）
//! - 任何线程都被视为“循环线程”，因此流水线的分发总是就地执行，提交的任务则排队等待驱动。
//! - 关闭后 `execute` 返回 `runtime.rejected`；`shutdown_gracefully` 立即执行剩余任务并终止。

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::ThreadId,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use spark_io::{
    error::{CoreError, Result, codes},
    runtime::{
        EventExecutor, ExecutorState, PeriodicTask, Promise, ScheduledHandle, ScheduledQueue,
        ScheduledTask, Task, run_task,
    },
};
use tracing::debug;

/// 调用方驱动的单线程执行器。
pub struct EmbeddedEventLoop {
    name: String,
    tasks: Mutex<VecDeque<Task>>,
    scheduled: Arc<ScheduledQueue>,
    state: AtomicU8,
    origin: Instant,
    elapsed: Mutex<Duration>,
    termination: Promise<()>,
}

impl EmbeddedEventLoop {
    /// 创建名为 `embedded` 的循环。
    pub fn new() -> Self {
        Self::with_name("embedded")
    }

    /// 创建指定名称的循环。
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Mutex::new(VecDeque::new()),
            scheduled: ScheduledQueue::new(),
            state: AtomicU8::new(ExecutorState::Started as u8),
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            termination: Promise::new(),
        }
    }

    /// 虚拟时钟的当前时刻。
    pub fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    /// 拨快虚拟时钟，不执行任务。
    pub fn advance_time_by(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// 排队中的一次性任务数。
    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// 尚未到期或尚未取消的定时任务数。
    pub fn scheduled_tasks(&self) -> usize {
        self.scheduled.len()
    }

    /// 距下一个定时任务到期的时长；没有定时任务时为 `None`。
    pub fn next_scheduled_task_delay(&self) -> Option<Duration> {
        let now = self.now();
        self.scheduled
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// 反复执行排队任务与已到期的定时任务，直到两者都为空，返回执行的任务数。
    pub fn run_pending_tasks(&self) -> usize {
        let mut executed = 0;
        loop {
            loop {
                // 出队后立即放锁，任务内部可以继续提交。
                let next = self.tasks.lock().pop_front();
                let Some(task) = next else {
                    break;
                };
                run_task(&self.name, task);
                executed += 1;
            }
            let expired = self.run_scheduled_tasks();
            executed += expired;
            if expired == 0 && self.tasks.lock().is_empty() {
                return executed;
            }
        }
    }

    /// 只执行按虚拟时钟已到期的定时任务，返回执行的任务数。
    pub fn run_scheduled_tasks(&self) -> usize {
        let now = self.now();
        let mut executed = 0;
        while let Some(expired) = self.scheduled.poll_expired(now) {
            self.scheduled.run_expired(&self.name, expired, true);
            executed += 1;
        }
        executed
    }

    fn schedule_task(&self, task: Arc<ScheduledTask>, delay: Duration) -> Result<ScheduledHandle> {
        self.ensure_accepting()?;
        Ok(self.scheduled.push(task, self.now() + delay))
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(CoreError::new(
                codes::RUNTIME_REJECTED,
                format!("executor `{}` no longer accepts tasks", self.name),
            ));
        }
        Ok(())
    }
}

impl Default for EmbeddedEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventExecutor for EmbeddedEventLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn in_event_loop_of(&self, _thread: ThreadId) -> bool {
        true
    }

    fn execute(&self, task: Task) -> Result<()> {
        self.ensure_accepting()?;
        self.tasks.lock().push_back(task);
        Ok(())
    }

    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledHandle> {
        self.schedule_task(ScheduledTask::once(task), delay)
    }

    fn schedule_at_fixed_rate(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle> {
        self.schedule_task(ScheduledTask::fixed_rate(task, period)?, initial_delay)
    }

    fn schedule_with_fixed_delay(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle> {
        self.schedule_task(ScheduledTask::fixed_delay(task, delay)?, initial_delay)
    }

    fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn shutdown_gracefully(&self, _quiet_period: Duration, _timeout: Duration) -> Promise<()> {
        if self.is_shutting_down() {
            return self.termination.clone();
        }
        self.state
            .store(ExecutorState::ShuttingDown as u8, Ordering::Release);
        self.run_pending_tasks();
        self.state.store(ExecutorState::Shutdown as u8, Ordering::Release);
        let cancelled = self.scheduled.cancel_all();
        self.state
            .store(ExecutorState::Terminated as u8, Ordering::Release);
        debug!(executor = %self.name, cancelled, "embedded event loop terminated");
        self.termination.try_success(());
        self.termination.clone()
    }

    fn termination(&self) -> Promise<()> {
        self.termination.clone()
    }
}

impl fmt::Debug for EmbeddedEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedEventLoop")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pending_tasks", &self.pending_tasks())
            .field("scheduled_tasks", &self.scheduled_tasks())
            .finish()
    }
}
