//! 扩容策略。
//!
//! # 设计背景（Why）
//! - 小缓冲倍增能把重复扩容的摊还成本压到常数级；大缓冲继续倍增会造成成倍的内存浪费，
//!   因此超过阈值后改为按固定步长增长。
//! - 策略以 trait 暴露，分配器可注入自定义实现（例如面向固定帧长的精确分配）。

/// 默认策略的阈值与步长：4 MiB。
pub const CALCULATE_THRESHOLD: usize = 4 * 1024 * 1024;

/// 倍增起点。
const MIN_NEW_CAPACITY: usize = 64;

/// 扩容策略契约。
///
/// # 契约（What）
/// - `min_new_capacity ≤ max_capacity` 由调用方保证（超过上限时缓冲直接报
///   `buffer.capacity_exceeded`，不会询问策略）。
/// - 返回值必须落在 `[min_new_capacity, max_capacity]` 区间内。
pub trait CapacityPolicy: Send + Sync + 'static {
    /// 根据最小需求与上限计算新的容量。
    fn calculate_new_capacity(&self, min_new_capacity: usize, max_capacity: usize) -> usize;
}

/// 默认策略：阈值以下从 64 起倍增，阈值及以上按 4 MiB 步进，结果不超过上限。
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCapacityPolicy;

impl CapacityPolicy for DefaultCapacityPolicy {
    fn calculate_new_capacity(&self, min_new_capacity: usize, max_capacity: usize) -> usize {
        let threshold = CALCULATE_THRESHOLD;
        if min_new_capacity == threshold {
            return threshold.min(max_capacity);
        }

        if min_new_capacity > threshold {
            let new_capacity = min_new_capacity / threshold * threshold;
            return if new_capacity > max_capacity.saturating_sub(threshold) {
                max_capacity
            } else {
                new_capacity + threshold
            };
        }

        let mut new_capacity = MIN_NEW_CAPACITY;
        while new_capacity < min_new_capacity {
            new_capacity <<= 1;
        }
        new_capacity.min(max_capacity)
    }
}
