//! 缓冲的共享存储与引用计数。
//!
//! # 设计背景（Why）
//! - 根缓冲与其派生视图（切片、复制视图、字节序视图）必须共享同一块内存与同一个计数，
//!   任一视图 `release` 都作用于共享计数。
//! - 内存安全由 `Arc` 保证；显式的 `AtomicI32` 计数只负责协议语义：计数从 1 归零时
//!   归还存储且只归还一次，之后任何访问都报 `buffer.illegal_reference_count`。
//!
//! # 执行逻辑（How）
//! - `retain`/`release` 使用 CAS 重试循环，任何线程都可以无锁调用。
//! - 归零时取走底层 `BytesMut` 交给 [`BufferRecycler`]；存储在计数未归零时被丢弃视为泄漏，
//!   以 `spark_io::buffer::leak` 为 target 记录调试日志。

use std::{
    mem,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicI32, Ordering},
    },
};

use bytes::BytesMut;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::capacity::{CapacityPolicy, DefaultCapacityPolicy};
use crate::error::{CoreError, Result};

/// 分配器在存储生命周期结束时的回收入口。
///
/// # 契约（What）
/// - `on_allocate` 在存储创建时调用一次；`reclaim` 对每块存储恰好调用一次：要么在计数归零时（`leaked = false`），
///   要么在存储未释放就被丢弃时（`leaked = true`）。
/// - 实现必须线程安全且不得 panic，回收可能发生在任意线程的 `Drop` 路径上。
pub trait BufferRecycler: Send + Sync + 'static {
    /// 新存储创建完毕。
    fn on_allocate(&self, capacity: usize) {
        let _ = capacity;
    }

    /// 存储容量发生调整（扩容或收缩）。
    fn capacity_changed(&self, old_capacity: usize, new_capacity: usize) {
        let _ = (old_capacity, new_capacity);
    }

    /// 回收一块存储。
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 一次回收动作携带的上下文。
#[derive(Debug)]
pub struct ReclaimedBuffer {
    capacity: usize,
    buffer: Option<BytesMut>,
    leaked: bool,
}

impl ReclaimedBuffer {
    pub(crate) fn new(capacity: usize, buffer: Option<BytesMut>, leaked: bool) -> Self {
        Self {
            capacity,
            buffer,
            leaked,
        }
    }

    /// 回收时的容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 是否因未释放就被丢弃而回收。
    pub fn is_leaked(&self) -> bool {
        self.leaked
    }

    /// 取回底层内存块，供池化实现复用。
    pub fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

pub(crate) struct Storage {
    bytes: RwLock<BytesMut>,
    ref_cnt: AtomicI32,
    max_capacity: usize,
    policy: Arc<dyn CapacityPolicy>,
    recycler: Option<Arc<dyn BufferRecycler>>,
    shared_empty: bool,
}

impl Storage {
    /// `bytes.len()` 即初始容量，内容视为已清零。
    pub(crate) fn new(
        bytes: BytesMut,
        max_capacity: usize,
        policy: Arc<dyn CapacityPolicy>,
        recycler: Option<Arc<dyn BufferRecycler>>,
    ) -> Self {
        if let Some(recycler) = &recycler {
            recycler.on_allocate(bytes.len());
        }
        Self {
            bytes: RwLock::new(bytes),
            ref_cnt: AtomicI32::new(1),
            max_capacity,
            policy,
            recycler,
            shared_empty: false,
        }
    }

    /// 进程级空缓冲存储：容量为 0，`retain`/`release` 均为空操作。
    pub(crate) fn shared_empty() -> Arc<Storage> {
        static EMPTY: OnceLock<Arc<Storage>> = OnceLock::new();
        EMPTY
            .get_or_init(|| {
                Arc::new(Storage {
                    bytes: RwLock::new(BytesMut::new()),
                    ref_cnt: AtomicI32::new(1),
                    max_capacity: 0,
                    policy: Arc::new(DefaultCapacityPolicy),
                    recycler: None,
                    shared_empty: true,
                })
            })
            .clone()
    }

    pub(crate) fn is_shared_empty(&self) -> bool {
        self.shared_empty
    }

    pub(crate) fn capacity(&self) -> usize {
        self.bytes.read().len()
    }

    pub(crate) fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub(crate) fn policy(&self) -> &Arc<dyn CapacityPolicy> {
        &self.policy
    }

    pub(crate) fn recycler(&self) -> Option<&Arc<dyn BufferRecycler>> {
        self.recycler.as_ref()
    }

    pub(crate) fn ref_cnt(&self) -> i32 {
        if self.shared_empty {
            return 1;
        }
        self.ref_cnt.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_accessible(&self) -> Result<()> {
        if self.ref_cnt() == 0 {
            return Err(CoreError::illegal_reference_count(0, 0));
        }
        Ok(())
    }

    pub(crate) fn retain(&self, increment: i32) -> Result<()> {
        if increment <= 0 {
            return Err(CoreError::invalid_argument(format!(
                "increment: {increment} (expected: > 0)"
            )));
        }
        if self.shared_empty {
            return Ok(());
        }
        let mut current = self.ref_cnt.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return Err(CoreError::illegal_reference_count(current, increment));
            }
            let next = current
                .checked_add(increment)
                .ok_or_else(|| CoreError::illegal_reference_count(current, increment))?;
            match self.ref_cnt.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// 返回本次释放是否触发了存储归还。
    pub(crate) fn release(&self, decrement: i32) -> Result<bool> {
        if decrement <= 0 {
            return Err(CoreError::invalid_argument(format!(
                "decrement: {decrement} (expected: > 0)"
            )));
        }
        if self.shared_empty {
            return Ok(false);
        }
        let mut current = self.ref_cnt.load(Ordering::Acquire);
        loop {
            if current < decrement {
                return Err(CoreError::illegal_reference_count(current, -decrement));
            }
            let next = current - decrement;
            match self.ref_cnt.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if next == 0 => {
                    self.deallocate();
                    return Ok(true);
                }
                Ok(_) => return Ok(false),
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BytesMut> {
        self.bytes.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, BytesMut> {
        self.bytes.write()
    }

    /// 调整容量；新增部分清零，收缩时截断。
    pub(crate) fn resize(&self, new_capacity: usize) {
        let old_capacity = {
            let mut bytes = self.bytes.write();
            let old = bytes.len();
            bytes.resize(new_capacity, 0);
            old
        };
        if old_capacity != new_capacity
            && let Some(recycler) = &self.recycler
        {
            recycler.capacity_changed(old_capacity, new_capacity);
        }
    }

    fn deallocate(&self) {
        let buffer = mem::take(&mut *self.bytes.write());
        if let Some(recycler) = &self.recycler {
            recycler.reclaim(ReclaimedBuffer::new(buffer.len(), Some(buffer), false));
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if self.shared_empty {
            return;
        }
        let ref_cnt = *self.ref_cnt.get_mut();
        if ref_cnt > 0 {
            let capacity = self.bytes.get_mut().len();
            debug!(
                target: "spark_io::buffer::leak",
                ref_cnt,
                capacity,
                "buffer dropped before its reference count reached zero"
            );
            if let Some(recycler) = &self.recycler {
                let buffer = mem::take(self.bytes.get_mut());
                recycler.reclaim(ReclaimedBuffer::new(capacity, Some(buffer), true));
            }
        }
    }
}
