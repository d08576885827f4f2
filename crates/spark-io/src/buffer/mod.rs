//! 引用计数字节缓冲与分配器。
//!
//! # 模块架构（Why）
//! - [`ByteBuf`] 提供读写双游标与绝对/相对访问器；派生视图共享存储与计数。
//! - [`BufferAllocator`] 是通道消费的唯一分配契约，[`UnpooledAllocator`] 为默认实现。
//! - [`CapacityPolicy`] 把扩容数值策略从缓冲中剥离，可由分配器替换。
//! - [`PipelineMessage`] 是流水线上流动的消息体，字节与业务对象并存。

mod allocator;
mod byte_buf;
mod capacity;
mod message;
mod order;
mod refcount;
mod storage;

pub use allocator::{
    AllocatorStats, BufferAllocator, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY, Unpooled,
    UnpooledAllocator,
};
pub use byte_buf::ByteBuf;
pub use capacity::{CALCULATE_THRESHOLD, CapacityPolicy, DefaultCapacityPolicy};
pub use message::PipelineMessage;
pub use order::ByteOrder;
pub use refcount::{ReferenceCounted, safe_release};
pub use storage::{BufferRecycler, ReclaimedBuffer};
