//! 分配器契约与非池化实现。
//!
//! # 设计背景（Why）
//! - 通道只认识 [`BufferAllocator`] 契约，任何分配器（池化、arena、测试用计数器）都可以替换进来。
//! - 默认的 [`UnpooledAllocator`] 每次都向系统申请新内存，并通过 [`BufferRecycler`]
//!   钩子统计存活缓冲与字节数，测试借此证明“计数归零时恰好释放一次”。

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use bytes::{Buf, BytesMut};

use super::{
    ByteBuf,
    capacity::{CapacityPolicy, DefaultCapacityPolicy},
    storage::{BufferRecycler, ReclaimedBuffer, Storage},
};
use crate::error::{CoreError, Result};

/// 未指定时的初始容量。
pub const DEFAULT_INITIAL_CAPACITY: usize = 256;
/// 未指定时的容量上限。
pub const DEFAULT_MAX_CAPACITY: usize = i32::MAX as usize;

/// 分配器契约。
///
/// # 契约（What）
/// - 返回的缓冲引用计数为 1，游标为 0，容量为 `initial_capacity`。
/// - `initial_capacity > max_capacity` 返回 `core.invalid_argument`。
/// - `(0, 0)` 返回共享空缓冲 [`ByteBuf::empty`]。
pub trait BufferAllocator: Send + Sync + 'static {
    /// 以指定初始容量与上限分配。
    fn buffer_with_max(&self, initial_capacity: usize, max_capacity: usize) -> Result<ByteBuf>;

    /// 以默认初始容量与上限分配。
    fn buffer(&self) -> Result<ByteBuf> {
        self.buffer_with_max(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY)
    }

    /// 以指定初始容量、默认上限分配。
    fn buffer_with_capacity(&self, initial_capacity: usize) -> Result<ByteBuf> {
        self.buffer_with_max(initial_capacity, DEFAULT_MAX_CAPACITY)
    }
}

pub(crate) fn validate(initial_capacity: usize, max_capacity: usize) -> Result<()> {
    if initial_capacity > max_capacity {
        return Err(CoreError::invalid_argument(format!(
            "initialCapacity: {initial_capacity} (expected: not greater than maxCapacity({max_capacity}))"
        )));
    }
    Ok(())
}

/// 分配统计快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStats {
    /// 尚未归还的缓冲数量。
    pub live_buffers: usize,
    /// 尚未归还的缓冲容量总和。
    pub live_bytes: usize,
    /// 累计分配次数。
    pub total_allocations: usize,
    /// 未释放就被丢弃的缓冲数量。
    pub leaked_buffers: usize,
}

#[derive(Default)]
struct AllocatorMetrics {
    live_buffers: AtomicUsize,
    live_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
    leaked_buffers: AtomicUsize,
}

impl AllocatorMetrics {
    fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            live_buffers: self.live_buffers.load(Ordering::Acquire),
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            total_allocations: self.total_allocations.load(Ordering::Acquire),
            leaked_buffers: self.leaked_buffers.load(Ordering::Acquire),
        }
    }
}

impl BufferRecycler for AllocatorMetrics {
    fn on_allocate(&self, capacity: usize) {
        self.total_allocations.fetch_add(1, Ordering::AcqRel);
        self.live_buffers.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_add(capacity, Ordering::AcqRel);
    }

    fn capacity_changed(&self, old_capacity: usize, new_capacity: usize) {
        if new_capacity >= old_capacity {
            self.live_bytes
                .fetch_add(new_capacity - old_capacity, Ordering::AcqRel);
        } else {
            saturating_sub(&self.live_bytes, old_capacity - new_capacity);
        }
    }

    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        saturating_sub(&self.live_buffers, 1);
        saturating_sub(&self.live_bytes, reclaimed.capacity());
        if reclaimed.is_leaked() {
            self.leaked_buffers.fetch_add(1, Ordering::AcqRel);
        }
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(value))
    });
}

/// 非池化分配器：每次分配全新的清零内存。
#[derive(Clone)]
pub struct UnpooledAllocator {
    metrics: Arc<AllocatorMetrics>,
    policy: Arc<dyn CapacityPolicy>,
}

impl UnpooledAllocator {
    /// 使用默认扩容策略。
    pub fn new() -> Self {
        Self::with_policy(Arc::new(DefaultCapacityPolicy))
    }

    /// 注入自定义扩容策略。
    pub fn with_policy(policy: Arc<dyn CapacityPolicy>) -> Self {
        Self {
            metrics: Arc::new(AllocatorMetrics::default()),
            policy,
        }
    }

    /// 进程级共享实例，通道未指定分配器时使用。
    pub fn shared() -> Arc<UnpooledAllocator> {
        static SHARED: OnceLock<Arc<UnpooledAllocator>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(UnpooledAllocator::new())).clone()
    }

    /// 当前统计。
    pub fn stats(&self) -> AllocatorStats {
        self.metrics.snapshot()
    }

    fn allocate(&self, bytes: BytesMut, max_capacity: usize, writer_index: usize) -> ByteBuf {
        let recycler: Arc<dyn BufferRecycler> = self.metrics.clone();
        let storage = Storage::new(bytes, max_capacity, Arc::clone(&self.policy), Some(recycler));
        ByteBuf::from_storage(Arc::new(storage), writer_index)
    }
}

impl Default for UnpooledAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferAllocator for UnpooledAllocator {
    fn buffer_with_max(&self, initial_capacity: usize, max_capacity: usize) -> Result<ByteBuf> {
        validate(initial_capacity, max_capacity)?;
        if initial_capacity == 0 && max_capacity == 0 {
            return Ok(ByteBuf::empty());
        }
        Ok(self.allocate(BytesMut::zeroed(initial_capacity), max_capacity, 0))
    }
}

/// 基于共享非池化分配器的便捷构造。
pub struct Unpooled;

impl Unpooled {
    /// 指定初始容量、默认上限的新缓冲。
    pub fn buffer(initial_capacity: usize) -> Result<ByteBuf> {
        UnpooledAllocator::shared().buffer_with_capacity(initial_capacity)
    }

    /// 以已有数据构造缓冲：容量与上限均为数据长度，内容全部可读。
    pub fn wrapped_buffer(data: Vec<u8>) -> ByteBuf {
        Self::copied_buffer(&data)
    }

    /// 复制切片内容构造缓冲。
    pub fn copied_buffer(data: &[u8]) -> ByteBuf {
        if data.is_empty() {
            return ByteBuf::empty();
        }
        UnpooledAllocator::shared().allocate(BytesMut::from(data), data.len(), data.len())
    }

    /// 把任意 `bytes::Buf` 的剩余内容复制进新缓冲。
    pub fn copied_from_buf(mut source: impl Buf) -> ByteBuf {
        let mut data = vec![0_u8; source.remaining()];
        source.copy_to_slice(&mut data);
        Self::copied_buffer(&data)
    }

    /// 共享空缓冲。
    pub fn empty_buffer() -> ByteBuf {
        ByteBuf::empty()
    }
}
