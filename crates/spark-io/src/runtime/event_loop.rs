//! 单线程事件循环。
//!
//! # 设计背景（Why）
//! - 每个循环独占一个工作线程：通道亲和到循环后，其处理器回调、出站队列变更全部串行执行。
//! - 工作线程惰性启动：第一次提交任务（或在未启动时发起关闭）才真正创建线程。
//!
//! # 执行逻辑（How）
//! 1. 即时任务进入 FIFO 队列，定时任务进入 [`ScheduledQueue`]；到期的定时任务被并入即时队列，
//!    与普通任务按同一顺序执行。
//! 2. 每执行 `breakout_interval` 个任务检查一次时间预算，避免长队列饿死定时任务与关闭检查。
//! 3. 优雅关闭：进入 `ShuttingDown` 后继续接受任务；直到静默期内没有新任务（或到达硬超时）
//!    才进入 `Shutdown` 拒绝新任务，清空剩余任务后 `Terminated`。

use std::{
    collections::VecDeque,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::{
    EventExecutor, EventLoopConfig, ExecutorState, PeriodicTask, Promise, ScheduledHandle,
    ScheduledQueue, ScheduledTask, Task, executor::run_task,
};
use crate::error::{CoreError, Result, codes};

/// 关闭阶段空闲时单次休眠的上限。
const SHUTDOWN_PARK: Duration = Duration::from_millis(100);

struct ShutdownWindow {
    quiet_period: Duration,
    timeout: Duration,
    started_at: Option<Instant>,
}

struct LoopInner {
    name: String,
    config: EventLoopConfig,
    state: AtomicU8,
    queue: Mutex<VecDeque<Task>>,
    wakeup: Condvar,
    scheduled: Arc<ScheduledQueue>,
    thread_id: OnceLock<ThreadId>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<ShutdownWindow>,
    last_execution: Mutex<Instant>,
    termination: Promise<()>,
}

/// 单线程事件循环。
pub struct SingleThreadEventLoop {
    inner: Arc<LoopInner>,
}

impl SingleThreadEventLoop {
    /// 以默认配置创建，`name` 同时作为线程名。
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, EventLoopConfig::default())
    }

    /// 以指定配置创建。
    pub fn with_config(name: impl Into<String>, config: EventLoopConfig) -> Self {
        let shutdown = ShutdownWindow {
            quiet_period: config.quiet_period,
            timeout: config.shutdown_timeout,
            started_at: None,
        };
        Self {
            inner: Arc::new(LoopInner {
                name: name.into(),
                config,
                state: AtomicU8::new(ExecutorState::NotStarted as u8),
                queue: Mutex::new(VecDeque::new()),
                wakeup: Condvar::new(),
                scheduled: ScheduledQueue::new(),
                thread_id: OnceLock::new(),
                worker: Mutex::new(None),
                shutdown: Mutex::new(shutdown),
                last_execution: Mutex::new(Instant::now()),
                termination: Promise::new(),
            }),
        }
    }

    /// 队列中尚未执行的即时任务数。
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// 使用配置中的默认静默期与超时发起优雅关闭。
    pub fn shutdown(&self) -> Promise<()> {
        let config = &self.inner.config;
        self.shutdown_gracefully(config.quiet_period, config.shutdown_timeout)
    }

    /// 等待工作线程退出；必须在终止后调用，否则会一直阻塞。
    pub fn join(&self) {
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle
            && !self.in_event_loop()
            && handle.join().is_err()
        {
            warn!(executor = %self.inner.name, "event loop thread ended with a panic");
        }
    }

    fn schedule_task(&self, task: Arc<ScheduledTask>, delay: Duration) -> Result<ScheduledHandle> {
        if self.inner.state() >= ExecutorState::Shutdown {
            return Err(CoreError::rejected(&self.inner.name));
        }
        let handle = self.inner.scheduled.push(task, Instant::now() + delay);
        self.inner.wake();
        self.inner.ensure_started()?;
        Ok(handle)
    }
}

impl LoopInner {
    fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_shutting_down(&self) -> bool {
        self.state() >= ExecutorState::ShuttingDown
    }

    fn is_shutdown(&self) -> bool {
        self.state() >= ExecutorState::Shutdown
    }

    /// 单调推进状态，返回推进前的状态。
    fn advance_to(&self, target: ExecutorState) -> ExecutorState {
        ExecutorState::from_u8(self.state.fetch_max(target as u8, Ordering::AcqRel))
    }

    fn wake(&self) {
        let _queue = self.queue.lock();
        self.wakeup.notify_one();
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        let mut queue = self.queue.lock();
        // 状态在队列锁内检查，`Shutdown` 也在队列锁内设置，因此关闭之后不会再有任务溜进队列。
        if self.is_shutdown() {
            drop(queue);
            warn!(executor = %self.name, "task rejected: event loop is shut down");
            return Err(CoreError::rejected(&self.name));
        }
        queue.push_back(task);
        self.wakeup.notify_one();
        Ok(())
    }

    fn ensure_started(self: &Arc<Self>) -> Result<()> {
        let started = self
            .state
            .compare_exchange(
                ExecutorState::NotStarted as u8,
                ExecutorState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if started {
            self.spawn_worker()?;
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || inner.run());
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(error) => {
                self.advance_to(ExecutorState::Terminated);
                self.termination.try_success(());
                Err(CoreError::new(
                    codes::RUNTIME_REJECTED,
                    format!("failed to spawn event loop thread `{}`", self.name),
                )
                .with_cause(error))
            }
        }
    }

    fn run(self: Arc<Self>) {
        let _ = self.thread_id.set(thread::current().id());
        *self.last_execution.lock() = Instant::now();
        debug!(executor = %self.name, "event loop started");

        loop {
            self.wait_for_work();
            self.run_all_tasks(Some(self.config.max_task_burst));
            if self.is_shutting_down() && self.confirm_shutdown() {
                break;
            }
        }

        {
            let _queue = self.queue.lock();
            self.advance_to(ExecutorState::Shutdown);
        }
        debug!(executor = %self.name, "event loop stopped accepting tasks");
        self.confirm_shutdown();

        let remaining = self.queue.lock().len();
        let cancelled = self.scheduled.cancel_all();
        self.advance_to(ExecutorState::Terminated);
        if remaining > 0 {
            warn!(
                executor = %self.name,
                remaining,
                "event loop terminated with a non-empty task queue"
            );
        }
        debug!(executor = %self.name, cancelled, "event loop terminated");
        self.termination.try_success(());
    }

    fn wait_for_work(&self) {
        let mut queue = self.queue.lock();
        if !queue.is_empty() || self.is_shutting_down() {
            return;
        }
        match self.scheduled.next_deadline() {
            Some(deadline) => {
                if deadline > Instant::now() {
                    self.wakeup.wait_until(&mut queue, deadline);
                }
            }
            None => self.wakeup.wait(&mut queue),
        }
    }

    fn fetch_expired_scheduled(&self, now: Instant) {
        let mut expired = Vec::new();
        while let Some(task) = self.scheduled.poll_expired(now) {
            expired.push(task);
        }
        if expired.is_empty() {
            return;
        }
        let mut queue = self.queue.lock();
        for task in expired {
            let scheduled = Arc::clone(&self.scheduled);
            let name = self.name.clone();
            queue.push_back(Box::new(move || scheduled.run_expired(&name, task, true)));
        }
    }

    /// 排空即时队列；`budget` 为 `None` 时不设时间上限。返回是否执行过任务。
    fn run_all_tasks(&self, budget: Option<Duration>) -> bool {
        let started = Instant::now();
        self.fetch_expired_scheduled(started);
        let deadline = budget.map(|budget| started + budget);
        let interval = self.config.breakout_interval.max(1);
        let mut ran = 0_usize;
        loop {
            let task = self.queue.lock().pop_front();
            let Some(task) = task else {
                break;
            };
            run_task(&self.name, task);
            ran += 1;
            if ran % interval == 0
                && let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                break;
            }
        }
        if ran > 0 {
            *self.last_execution.lock() = Instant::now();
        }
        ran > 0
    }

    fn confirm_shutdown(&self) -> bool {
        if !self.is_shutting_down() {
            return false;
        }
        self.scheduled.cancel_all();

        let now = Instant::now();
        let (quiet_period, timeout, started_at) = {
            let mut window = self.shutdown.lock();
            let started_at = *window.started_at.get_or_insert(now);
            (window.quiet_period, window.timeout, started_at)
        };

        if self.run_all_tasks(None) {
            return self.is_shutdown() || quiet_period.is_zero();
        }

        if self.is_shutdown() || now.duration_since(started_at) > timeout {
            return true;
        }

        let last_execution = *self.last_execution.lock();
        if now.duration_since(last_execution) <= quiet_period {
            self.park(SHUTDOWN_PARK.min(quiet_period));
            return false;
        }
        true
    }

    fn park(&self, max: Duration) {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.wakeup.wait_for(&mut queue, max);
        }
    }
}

impl EventExecutor for SingleThreadEventLoop {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn in_event_loop_of(&self, thread: ThreadId) -> bool {
        self.inner.thread_id.get() == Some(&thread)
    }

    fn execute(&self, task: Task) -> Result<()> {
        self.inner.enqueue(task)?;
        self.inner.ensure_started()
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
        self.inner.state()
    }

    fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Promise<()> {
        {
            let mut window = self.inner.shutdown.lock();
            if !self.inner.is_shutting_down() {
                window.quiet_period = quiet_period;
                window.timeout = timeout.max(quiet_period);
            }
        }
        let previous = self.inner.advance_to(ExecutorState::ShuttingDown);
        if previous < ExecutorState::ShuttingDown {
            debug!(
                executor = %self.inner.name,
                ?quiet_period,
                ?timeout,
                "graceful shutdown requested"
            );
            if previous == ExecutorState::NotStarted {
                if let Err(error) = self.inner.spawn_worker() {
                    warn!(executor = %self.inner.name, %error, "event loop terminated without a worker");
                }
            } else {
                self.inner.wake();
            }
        }
        self.inner.termination.clone()
    }

    fn termination(&self) -> Promise<()> {
        self.inner.termination.clone()
    }
}

impl std::fmt::Debug for SingleThreadEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadEventLoop")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state())
            .finish()
    }
}
