//! 事件循环组。
//!
//! 固定数量的 [`SingleThreadEventLoop`] 以轮询方式分配给新通道；组的终止承诺在所有成员终止后完成。

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::debug;

use super::{EventExecutor, EventLoopConfig, Promise, SingleThreadEventLoop};
use crate::channel::Channel;
use crate::runtime::ChannelPromise;

/// 轮询分配的事件循环集合。
pub struct EventLoopGroup {
    loops: Vec<Arc<SingleThreadEventLoop>>,
    next: AtomicUsize,
    termination: Promise<()>,
}

impl EventLoopGroup {
    /// 创建 `threads` 个循环；`0` 表示可用并行度的两倍。
    pub fn new(threads: usize) -> Self {
        Self::with_config(threads, EventLoopConfig::default())
    }

    /// 以指定配置创建。
    pub fn with_config(threads: usize, config: EventLoopConfig) -> Self {
        let threads = if threads == 0 {
            default_threads()
        } else {
            threads
        };
        let loops: Vec<_> = (0..threads)
            .map(|index| {
                let name = format!("{}-{index}", config.thread_name_prefix);
                Arc::new(SingleThreadEventLoop::with_config(name, config.clone()))
            })
            .collect();

        let termination = Promise::new();
        let remaining = Arc::new(AtomicUsize::new(loops.len()));
        for event_loop in &loops {
            let remaining = Arc::clone(&remaining);
            let group_termination = termination.clone();
            event_loop.termination().add_listener(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    group_termination.try_success(());
                }
            });
        }
        debug!(threads, prefix = %config.thread_name_prefix, "event loop group created");

        Self {
            loops,
            next: AtomicUsize::new(0),
            termination,
        }
    }

    /// 下一个循环（轮询）。
    pub fn next(&self) -> Arc<SingleThreadEventLoop> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        Arc::clone(&self.loops[index])
    }

    /// 以 trait 对象形式返回下一个循环。
    pub fn next_executor(&self) -> Arc<dyn EventExecutor> {
        self.next()
    }

    /// 全部成员。
    pub fn loops(&self) -> &[Arc<SingleThreadEventLoop>] {
        &self.loops
    }

    /// 成员数量。
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// 是否没有成员；构造保证至少一个，恒为 `false`。
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// 把通道注册到下一个循环。
    pub fn register(&self, channel: &Channel) -> ChannelPromise {
        channel.register(self.next_executor())
    }

    /// 对所有成员发起优雅关闭，返回组的终止承诺。
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Promise<()> {
        for event_loop in &self.loops {
            event_loop.shutdown_gracefully(quiet_period, timeout);
        }
        self.termination.clone()
    }

    /// 所有成员终止后完成。
    pub fn termination(&self) -> Promise<()> {
        self.termination.clone()
    }

    /// 最多等待 `timeout` 直到全部终止。
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.termination.wait_timeout(timeout).is_some()
    }

    /// 是否所有成员都已进入关闭流程。
    pub fn is_shutting_down(&self) -> bool {
        self.loops.iter().all(|event_loop| event_loop.is_shutting_down())
    }

    /// 是否所有成员都已终止。
    pub fn is_terminated(&self) -> bool {
        self.loops.iter().all(|event_loop| event_loop.is_terminated())
    }
}

fn default_threads() -> usize {
    thread::available_parallelism()
        .map(|parallelism| parallelism.get() * 2)
        .unwrap_or(2)
}

impl std::fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("loops", &self.loops)
            .finish()
    }
}
