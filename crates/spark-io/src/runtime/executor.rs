use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    thread::{self, ThreadId},
    time::Duration,
};

use tracing::warn;

use super::{Promise, ScheduledHandle};
use crate::error::{CoreError, Result, codes, panic_message};

/// 一次性任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 周期任务。
pub type PeriodicTask = Box<dyn FnMut() + Send + 'static>;

/// 执行器生命周期，只能单调前进。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutorState {
    /// 尚未启动工作线程。
    NotStarted = 1,
    /// 工作线程运行中。
    Started = 2,
    /// 优雅关闭中：仍接受任务，等待静默期。
    ShuttingDown = 3,
    /// 不再接受任务，正在清空队列。
    Shutdown = 4,
    /// 已终止。
    Terminated = 5,
}

impl ExecutorState {
    /// 从原子存储的数值还原。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::NotStarted,
            2 => Self::Started,
            3 => Self::ShuttingDown,
            4 => Self::Shutdown,
            _ => Self::Terminated,
        }
    }
}

/// 单线程执行器契约。
///
/// # 设计背景（Why）
/// - 通道及其处理器全部亲和到一个执行器：同一通道的事件天然串行，处理器无需加锁。
/// - 执行器以 trait 对象 `Arc<dyn EventExecutor>` 在通道、上下文与定时器之间共享，
///   因此核心方法保持对象安全，泛型便利方法以 `where Self: Sized` 或 `impl dyn EventExecutor`
///   的形式提供。
///
/// # 契约（What）
/// - `execute` 保证 FIFO；进入 [`ExecutorState::Shutdown`] 后返回 `runtime.rejected`。
/// - `schedule*` 返回可取消的 [`ScheduledHandle`]；截止时间到达后任务与普通任务一同排队执行。
/// - 任务 panic 被捕获并记录日志，不会终止工作线程。
pub trait EventExecutor: Send + Sync + 'static {
    /// 执行器名称，用于日志与线程命名。
    fn name(&self) -> &str;

    /// 给定线程是否为本执行器的工作线程。
    fn in_event_loop_of(&self, thread: ThreadId) -> bool;

    /// 当前线程是否为本执行器的工作线程。
    fn in_event_loop(&self) -> bool {
        self.in_event_loop_of(thread::current().id())
    }

    /// 提交一次性任务。
    fn execute(&self, task: Task) -> Result<()>;

    /// 延迟 `delay` 后执行。
    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledHandle>;

    /// 以固定频率执行：第 n 次的截止时间为 `initial_delay + n * period`。
    fn schedule_at_fixed_rate(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle>;

    /// 以固定间隔执行：上一次结束后再等待 `delay`。
    fn schedule_with_fixed_delay(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle>;

    /// 当前生命周期状态。
    fn state(&self) -> ExecutorState;

    /// 发起优雅关闭：静默期内无新任务才会真正关闭，`timeout` 为硬上限。
    fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Promise<()>;

    /// 终止时完成的承诺。
    fn termination(&self) -> Promise<()>;

    /// 是否已进入关闭流程。
    fn is_shutting_down(&self) -> bool {
        self.state() >= ExecutorState::ShuttingDown
    }

    /// 是否已拒绝新任务。
    fn is_shutdown(&self) -> bool {
        self.state() >= ExecutorState::Shutdown
    }

    /// 是否已终止。
    fn is_terminated(&self) -> bool {
        self.state() == ExecutorState::Terminated
    }

    /// 最多等待 `timeout` 直到终止。
    fn await_termination(&self, timeout: Duration) -> bool {
        self.termination().wait_timeout(timeout).is_some()
    }

    /// 提交闭包并以承诺取回返回值。
    fn submit<F, T>(&self, task: F) -> Promise<T>
    where
        Self: Sized,
        F: FnOnce() -> T + Send + 'static,
        T: Clone + Send + 'static,
    {
        submit_to(self, task)
    }
}

impl dyn EventExecutor {
    /// trait 对象上的 [`EventExecutor::submit`]。
    pub fn submit<F, T>(&self, task: F) -> Promise<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Clone + Send + 'static,
    {
        submit_to(self, task)
    }
}

pub(crate) fn submit_to<E, F, T>(executor: &E, task: F) -> Promise<T>
where
    E: EventExecutor + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Clone + Send + 'static,
{
    let promise = Promise::new();
    let completion = promise.clone();
    let wrapped: Task = Box::new(move || {
        if !completion.set_uncancellable() {
            return;
        }
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(value) => {
                completion.try_success(value);
            }
            Err(payload) => {
                completion.try_failure(CoreError::new(
                    codes::RUNTIME_TASK_PANICKED,
                    panic_message(payload.as_ref()),
                ));
            }
        }
    });
    if let Err(error) = executor.execute(wrapped) {
        promise.try_failure(error);
    }
    promise
}

/// 在当前线程运行任务并吞掉 panic，供执行器实现共享。
///
/// 返回任务是否正常结束。
pub fn run_task(executor: &str, task: Task) -> bool {
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                executor,
                panic = %panic_message(payload.as_ref()),
                "a task raised a panic; the event loop keeps running"
            );
            false
        }
    }
}
