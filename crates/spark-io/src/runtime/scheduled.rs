//! 定时任务队列。
//!
//! # 执行逻辑（How）
//! - 以截止时间为键的小根堆，截止时间相同按提交序号先后。
//! - 周期任务每次执行后以同一个 [`ScheduledTask`] 重新入堆，因此句柄取消对所有后续执行生效。
//! - 取消尚未执行的任务会立即把它移出堆；已开始的一次性任务不可取消。

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::warn;

use super::{PeriodicTask, Promise, Task};
use crate::error::{CoreError, Result, codes, panic_message};

enum TaskKind {
    Once(Mutex<Option<Task>>),
    FixedRate {
        task: Mutex<PeriodicTask>,
        period: Duration,
    },
    FixedDelay {
        task: Mutex<PeriodicTask>,
        delay: Duration,
    },
}

/// 堆中的任务体。
pub struct ScheduledTask {
    kind: TaskKind,
    promise: Promise<()>,
}

impl ScheduledTask {
    /// 一次性任务。
    pub fn once(task: Task) -> Arc<Self> {
        Arc::new(Self {
            kind: TaskKind::Once(Mutex::new(Some(task))),
            promise: Promise::new(),
        })
    }

    /// 固定频率任务。
    pub fn fixed_rate(task: PeriodicTask, period: Duration) -> Result<Arc<Self>> {
        ensure_positive(period)?;
        Ok(Arc::new(Self {
            kind: TaskKind::FixedRate {
                task: Mutex::new(task),
                period,
            },
            promise: Promise::new(),
        }))
    }

    /// 固定间隔任务。
    pub fn fixed_delay(task: PeriodicTask, delay: Duration) -> Result<Arc<Self>> {
        ensure_positive(delay)?;
        Ok(Arc::new(Self {
            kind: TaskKind::FixedDelay {
                task: Mutex::new(task),
                delay,
            },
            promise: Promise::new(),
        }))
    }

    fn is_periodic(&self) -> bool {
        !matches!(self.kind, TaskKind::Once(_))
    }
}

fn ensure_positive(period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(CoreError::invalid_argument("period must be greater than zero"));
    }
    Ok(())
}

struct HeapEntry {
    deadline: Instant,
    seq: u64,
    task: Arc<ScheduledTask>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap 是大根堆，反转后堆顶为最早截止的任务。
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 到期待执行的任务。
pub struct ExpiredTask {
    deadline: Instant,
    task: Arc<ScheduledTask>,
}

/// 定时任务小根堆。
#[derive(Default)]
pub struct ScheduledQueue {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    seq: AtomicU64,
}

impl ScheduledQueue {
    /// 创建空队列。
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 入堆并返回取消句柄。
    pub fn push(self: &Arc<Self>, task: Arc<ScheduledTask>, deadline: Instant) -> ScheduledHandle {
        self.push_entry(Arc::clone(&task), deadline);
        ScheduledHandle {
            task,
            queue: Arc::downgrade(self),
        }
    }

    fn push_entry(&self, task: Arc<ScheduledTask>, deadline: Instant) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(HeapEntry {
            deadline,
            seq,
            task,
        });
    }

    /// 堆顶截止时间。
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.lock().peek().map(|entry| entry.deadline)
    }

    /// 弹出一个截止时间不晚于 `now` 的任务。
    pub fn poll_expired(&self, now: Instant) -> Option<ExpiredTask> {
        let mut heap = self.heap.lock();
        match heap.peek() {
            Some(entry) if entry.deadline <= now => heap.pop().map(|entry| ExpiredTask {
                deadline: entry.deadline,
                task: entry.task,
            }),
            _ => None,
        }
    }

    fn remove(&self, task: &Arc<ScheduledTask>) {
        self.heap
            .lock()
            .retain(|entry| !Arc::ptr_eq(&entry.task, task));
    }

    /// 取消并清空全部任务，返回清除的数量。
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<HeapEntry> = self.heap.lock().drain().collect();
        let count = drained.len();
        for entry in drained {
            entry.task.promise.cancel();
        }
        count
    }

    /// 堆内任务数。
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// 堆是否为空。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 在当前线程执行到期任务；周期任务在 `reschedule` 为真且未取消时重新入堆。
    pub fn run_expired(&self, executor: &str, expired: ExpiredTask, reschedule: bool) {
        let ExpiredTask { deadline, task } = expired;
        match &task.kind {
            TaskKind::Once(slot) => {
                if !task.promise.set_uncancellable() {
                    return;
                }
                let Some(body) = slot.lock().take() else {
                    return;
                };
                match catch_unwind(AssertUnwindSafe(body)) {
                    Ok(()) => {
                        task.promise.try_success(());
                    }
                    Err(payload) => fail_panicked(executor, &task, payload.as_ref()),
                }
            }
            TaskKind::FixedRate { task: body, period } => {
                if task.promise.is_done() {
                    return;
                }
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                    let mut body = body.lock();
                    (*body)()
                })) {
                    fail_panicked(executor, &task, payload.as_ref());
                    return;
                }
                if reschedule && !task.promise.is_done() {
                    self.push_entry(Arc::clone(&task), deadline + *period);
                }
            }
            TaskKind::FixedDelay { task: body, delay } => {
                if task.promise.is_done() {
                    return;
                }
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                    let mut body = body.lock();
                    (*body)()
                })) {
                    fail_panicked(executor, &task, payload.as_ref());
                    return;
                }
                if reschedule && !task.promise.is_done() {
                    self.push_entry(Arc::clone(&task), Instant::now() + *delay);
                }
            }
        }
    }
}

fn fail_panicked(executor: &str, task: &ScheduledTask, payload: &(dyn std::any::Any + Send)) {
    let message = panic_message(payload);
    warn!(executor, panic = %message, periodic = task.is_periodic(), "a scheduled task raised a panic");
    task.promise
        .try_failure(CoreError::new(codes::RUNTIME_TASK_PANICKED, message));
}

/// 定时任务句柄。
#[derive(Clone)]
pub struct ScheduledHandle {
    task: Arc<ScheduledTask>,
    queue: Weak<ScheduledQueue>,
}

impl std::fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledHandle").finish_non_exhaustive()
    }
}

impl ScheduledHandle {
    /// 以失败状态构造句柄，用于执行器拒绝任务时。
    pub fn rejected(error: CoreError) -> Self {
        let task = ScheduledTask::once(Box::new(|| {}));
        task.promise.try_failure(error);
        Self {
            task,
            queue: Weak::new(),
        }
    }

    /// 取消尚未开始的任务（周期任务则停止后续执行）；已开始或已完成时返回 `false`。
    pub fn cancel(&self) -> bool {
        if !self.task.promise.cancel() {
            return false;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.remove(&self.task);
        }
        true
    }

    /// 是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.task.promise.is_cancelled()
    }

    /// 是否已结束（完成、失败或取消）。
    pub fn is_done(&self) -> bool {
        self.task.promise.is_done()
    }

    /// 任务的完成承诺；周期任务只会以取消或失败结束。
    pub fn promise(&self) -> Promise<()> {
        self.task.promise.clone()
    }
}
