use tracing::warn;

use crate::error::Result;

/// 显式引用计数契约。
///
/// # 契约（What）
/// - 新对象计数为 1；`retain_n` 原子增加，`release_n` 原子减少。
/// - 计数恰好归零的那一次 `release_n` 返回 `Ok(true)` 并归还资源，之后任何访问均报
///   `buffer.illegal_reference_count`。
/// - 对计数为 0 的对象 `retain`、计数溢出、或释放量超过当前计数，均返回错误且不改变计数。
pub trait ReferenceCounted {
    /// 当前计数。
    fn ref_cnt(&self) -> i32;

    /// 增加 `increment`。
    fn retain_n(&self, increment: i32) -> Result<()>;

    /// 减少 `decrement`，返回是否触发了资源归还。
    fn release_n(&self, decrement: i32) -> Result<bool>;

    /// 增加 1。
    fn retain(&self) -> Result<()> {
        self.retain_n(1)
    }

    /// 减少 1。
    fn release(&self) -> Result<bool> {
        self.release_n(1)
    }
}

/// 释放一次引用，失败时只记录日志。
///
/// 用于尾哨兵、出站队列等“消息到达终点必须归还”的路径：此时调用方已无法向上报告错误。
pub fn safe_release<T: ReferenceCounted + ?Sized>(target: &T) {
    if let Err(error) = target.release() {
        warn!(error = %error, "failed to release reference counted object");
    }
}
