//! 出站写队列。
//!
//! # 设计背景（Why）
//! - 处理器的 `write` 只把消息挂入队列，`flush` 才把已挂入的条目交给传输层；传输层按 FIFO
//!   逐条消费，完成一条就完成一条对应的承诺。
//! - 待写字节数用于背压：生产者线程可以并发读取可写性，消费者（通道所属的事件循环）单线程修改队列。
//!
//! # 执行逻辑（How）
//! - 队列本体由互斥锁保护；承诺的完成、消息的释放与可写性回调一律在锁外执行，
//!   因此回调里再次写入或关闭通道是安全的。
//! - 待写字节与不可写标志是原子量，回调只在标志真正翻转的那一次触发。
//!
//! # 契约（What）
//! - 已冲刷条目总在未冲刷条目之前；`size()` 等于已冲刷条目数。
//! - `close` 只能在已冲刷条目为空时调用，之后的 `add_message` 一律失败。

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::warn;

use super::WaterMarks;
use crate::buffer::{PipelineMessage, safe_release};
use crate::error::{CoreError, Result, codes};
use crate::runtime::ChannelPromise;

/// 可写性变化回调。
pub trait WritabilityListener: Send + Sync + 'static {
    /// `writable` 为翻转后的状态。
    fn writability_changed(&self, writable: bool);
}

impl<F> WritabilityListener for F
where
    F: Fn(bool) + Send + Sync + 'static,
{
    fn writability_changed(&self, writable: bool) {
        self(writable)
    }
}

/// 待写字节计数与高低水位滞回。
#[derive(Debug)]
struct WritabilityState {
    total_pending: AtomicUsize,
    unwritable: AtomicBool,
    low: AtomicUsize,
    high: AtomicUsize,
}

impl WritabilityState {
    fn new(marks: WaterMarks) -> Self {
        Self {
            total_pending: AtomicUsize::new(0),
            unwritable: AtomicBool::new(false),
            low: AtomicUsize::new(marks.low()),
            high: AtomicUsize::new(marks.high()),
        }
    }

    /// 增加待写字节；发生 可写→不可写 翻转时返回 `Some(false)`。
    fn increment(&self, size: usize) -> Option<bool> {
        if size == 0 {
            return None;
        }
        let total = self.total_pending.fetch_add(size, Ordering::AcqRel) + size;
        if total >= self.high.load(Ordering::Acquire)
            && self
                .unwritable
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Some(false);
        }
        None
    }

    /// 减少待写字节；`notify` 为真且发生 不可写→可写 翻转时返回 `Some(true)`。
    fn decrement(&self, size: usize, notify: bool) -> Option<bool> {
        if size == 0 {
            return None;
        }
        let total = self.subtract(size);
        if notify
            && (total == 0 || total <= self.low.load(Ordering::Acquire))
            && self
                .unwritable
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Some(true);
        }
        None
    }

    fn subtract(&self, size: usize) -> usize {
        let previous = self
            .total_pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                Some(total.saturating_sub(size))
            })
            .unwrap_or_default();
        previous.saturating_sub(size)
    }
}

struct Entry {
    message: Option<PipelineMessage>,
    pending_size: usize,
    promise: ChannelPromise,
}

impl Entry {
    fn release(&mut self) {
        if let Some(message) = self.message.take() {
            safe_release(&message);
        }
    }
}

#[derive(Default)]
struct EntryList {
    entries: VecDeque<Entry>,
    flushed: usize,
    closed: bool,
}

impl EntryList {
    fn pop_flushed(&mut self) -> Option<Entry> {
        if self.flushed == 0 {
            return None;
        }
        self.flushed -= 1;
        self.entries.pop_front()
    }
}

/// 出站写队列。
pub struct OutboundBuffer {
    list: Mutex<EntryList>,
    state: WritabilityState,
    in_fail: AtomicBool,
    listener: Option<Arc<dyn WritabilityListener>>,
}

impl OutboundBuffer {
    /// 以给定水位创建，不挂接可写性回调。
    pub fn new(marks: WaterMarks) -> Self {
        Self {
            list: Mutex::new(EntryList::default()),
            state: WritabilityState::new(marks),
            in_fail: AtomicBool::new(false),
            listener: None,
        }
    }

    /// 以给定水位与可写性回调创建。
    pub fn with_listener(marks: WaterMarks, listener: Arc<dyn WritabilityListener>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new(marks)
        }
    }

    /// 追加一条未冲刷条目并计入待写字节；队列已关闭时释放消息并失败承诺。
    pub fn add_message(&self, message: PipelineMessage, size: usize, promise: ChannelPromise) {
        let rejected = {
            let mut list = self.list.lock();
            if list.closed {
                Some((message, promise))
            } else {
                list.entries.push_back(Entry {
                    message: Some(message),
                    pending_size: size,
                    promise,
                });
                None
            }
        };
        if let Some((message, promise)) = rejected {
            safe_release(&message);
            promise.try_failure(CoreError::channel_closed());
            return;
        }
        self.increment_pending_bytes(size);
    }

    /// 把全部未冲刷条目标记为已冲刷；承诺已被取消的条目直接丢弃并归还其字节。
    pub fn add_flush(&self) {
        let cancelled = {
            let mut list = self.list.lock();
            let flushed = list.flushed;
            let unflushed: Vec<Entry> = list.entries.drain(flushed..).collect();
            let mut cancelled = Vec::new();
            for entry in unflushed {
                if entry.promise.set_uncancellable() {
                    list.entries.push_back(entry);
                    list.flushed += 1;
                } else {
                    cancelled.push(entry);
                }
            }
            cancelled
        };
        for mut entry in cancelled {
            entry.release();
            self.decrement_pending(entry.pending_size, true);
        }
    }

    /// 对首个已冲刷条目的消息执行 `f`；没有已冲刷条目时返回 `None`。
    ///
    /// `f` 在队列锁内执行，不得回调本队列。
    pub fn with_current<R>(&self, f: impl FnOnce(&mut PipelineMessage) -> R) -> Option<R> {
        let mut list = self.list.lock();
        if list.flushed == 0 {
            return None;
        }
        list.entries
            .front_mut()
            .and_then(|entry| entry.message.as_mut())
            .map(f)
    }

    /// 移除首个已冲刷条目：释放消息、成功完成承诺。返回是否存在该条目。
    pub fn remove(&self) -> bool {
        let Some(mut entry) = self.list.lock().pop_flushed() else {
            return false;
        };
        entry.release();
        entry.promise.try_success(());
        self.decrement_pending(entry.pending_size, true);
        true
    }

    /// 移除首个已冲刷条目并以 `error` 失败其承诺。
    pub fn remove_with_error(&self, error: CoreError) -> bool {
        self.remove_failed(error, true)
    }

    /// 移除首个已冲刷条目并把消息所有权交给调用方，承诺成功完成。
    ///
    /// 用于不经字节拷贝直接转交消息对象的传输（例如内存传输）。
    pub fn remove_message(&self) -> Option<PipelineMessage> {
        let mut entry = self.list.lock().pop_flushed()?;
        let message = entry.message.take();
        entry.promise.try_success(());
        self.decrement_pending(entry.pending_size, true);
        message
    }

    /// 记录传输层写出了 `written` 字节：完整写出的缓冲条目被移除，部分写出的推进读索引。
    pub fn remove_bytes(&self, written: usize) {
        let mut remaining = written;
        loop {
            let completed = {
                let mut list = self.list.lock();
                if list.flushed == 0 {
                    return;
                }
                let Some(buf) = list
                    .entries
                    .front_mut()
                    .and_then(|entry| entry.message.as_mut())
                    .and_then(PipelineMessage::as_buffer_mut)
                else {
                    return;
                };
                let readable = buf.readable_bytes();
                if readable <= remaining {
                    remaining -= readable;
                    true
                } else {
                    if remaining > 0 {
                        let index = buf.reader_index() + remaining;
                        if let Err(error) = buf.set_reader_index(index) {
                            warn!(%error, "failed to advance a partially written buffer");
                        }
                    }
                    false
                }
            };
            if !completed {
                return;
            }
            self.remove();
        }
    }

    /// 以 `error` 失败全部已冲刷条目。回调中的重入调用直接返回。
    pub fn fail_flushed(&self, error: CoreError, notify: bool) {
        if self.in_fail.swap(true, Ordering::AcqRel) {
            return;
        }
        while self.remove_failed(error.clone(), notify) {}
        self.in_fail.store(false, Ordering::Release);
    }

    /// 关闭队列并失败全部未冲刷条目；仍有已冲刷条目时返回 `outbound.close_while_flushing`。
    ///
    /// 被丢弃条目的字节静默归还，不触发可写性回调。
    pub fn close(&self, error: CoreError) -> Result<()> {
        if self.in_fail.load(Ordering::Acquire) {
            return Err(CoreError::new(
                codes::OUTBOUND_CLOSE_WHILE_FLUSHING,
                "outbound buffer is failing flushed entries",
            ));
        }
        let dropped: Vec<Entry> = {
            let mut list = self.list.lock();
            if list.flushed > 0 {
                return Err(CoreError::new(
                    codes::OUTBOUND_CLOSE_WHILE_FLUSHING,
                    format!("{} flushed entries are still pending", list.flushed),
                ));
            }
            list.closed = true;
            list.entries.drain(..).collect()
        };
        for mut entry in dropped {
            entry.release();
            entry.promise.try_failure(error.clone());
            self.decrement_pending(entry.pending_size, false);
        }
        Ok(())
    }

    /// 依次访问已冲刷条目的消息，`f` 返回 `false` 时停止。
    ///
    /// `f` 在队列锁内执行，不得回调本队列。
    pub fn for_each_flushed_message(&self, mut f: impl FnMut(&PipelineMessage) -> bool) {
        let list = self.list.lock();
        for entry in list.entries.iter().take(list.flushed) {
            if let Some(message) = &entry.message
                && !f(message)
            {
                break;
            }
        }
    }

    /// 已冲刷条目数。
    pub fn size(&self) -> usize {
        self.list.lock().flushed
    }

    /// 是否没有已冲刷条目。
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.list.lock().closed
    }

    /// 全部条目（含未冲刷）的待写字节数。
    pub fn total_pending_size(&self) -> usize {
        self.state.total_pending.load(Ordering::Acquire)
    }

    /// 是否可写。
    pub fn is_writable(&self) -> bool {
        !self.state.unwritable.load(Ordering::Acquire)
    }

    /// 距离变为不可写还能写入的字节数；已不可写时为 0。
    pub fn bytes_before_unwritable(&self) -> usize {
        let bytes = self
            .state
            .high
            .load(Ordering::Acquire)
            .saturating_sub(self.total_pending_size());
        if bytes > 0 && self.is_writable() {
            bytes
        } else {
            0
        }
    }

    /// 距离恢复可写还需排空的字节数；可写时为 0。
    pub fn bytes_before_writable(&self) -> usize {
        let bytes = self
            .total_pending_size()
            .saturating_sub(self.state.low.load(Ordering::Acquire));
        if bytes > 0 && !self.is_writable() {
            bytes
        } else {
            0
        }
    }

    /// 当前水位。
    pub fn water_marks(&self) -> WaterMarks {
        let low = self.state.low.load(Ordering::Acquire);
        let high = self.state.high.load(Ordering::Acquire);
        WaterMarks::new(low, high).unwrap_or_default()
    }

    /// 更新水位，对之后的字节变化生效。
    pub fn set_water_marks(&self, marks: WaterMarks) {
        self.state.low.store(marks.low(), Ordering::Release);
        self.state.high.store(marks.high(), Ordering::Release);
    }

    /// 在条目之外计入待写字节，例如尚在投递途中的跨线程写。
    pub fn increment_pending_bytes(&self, size: usize) {
        if let Some(writable) = self.state.increment(size) {
            self.notify(writable);
        }
    }

    /// 归还 [`OutboundBuffer::increment_pending_bytes`] 计入的字节。
    pub fn decrement_pending_bytes(&self, size: usize) {
        self.decrement_pending(size, true);
    }

    fn decrement_pending(&self, size: usize, notify: bool) {
        if let Some(writable) = self.state.decrement(size, notify) {
            self.notify(writable);
        }
    }

    fn remove_failed(&self, error: CoreError, notify: bool) -> bool {
        let Some(mut entry) = self.list.lock().pop_flushed() else {
            return false;
        };
        entry.release();
        entry.promise.try_failure(error);
        self.decrement_pending(entry.pending_size, notify);
        true
    }

    fn notify(&self, writable: bool) {
        if let Some(listener) = &self.listener {
            listener.writability_changed(writable);
        }
    }
}

impl fmt::Debug for OutboundBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self.list.lock();
        f.debug_struct("OutboundBuffer")
            .field("entries", &list.entries.len())
            .field("flushed", &list.flushed)
            .field("closed", &list.closed)
            .field("total_pending", &self.total_pending_size())
            .field("writable", &self.is_writable())
            .finish()
    }
}
