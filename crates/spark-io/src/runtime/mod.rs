//! 执行运行时：承诺、执行器契约、定时任务与单线程事件循环。
//!
//! # 模块划分
//! - [`promise`]：一次性完成信号，通道操作的结果载体；
//! - [`executor`]：对象安全的执行器契约与任务类型；
//! - [`scheduled`]：定时任务小根堆与取消句柄；
//! - [`event_loop`] / [`group`]：线程化实现与轮询分配。

pub mod config;
pub mod event_loop;
pub mod executor;
pub mod group;
pub mod promise;
pub mod scheduled;

pub use config::EventLoopConfig;
pub use event_loop::SingleThreadEventLoop;
pub use executor::{EventExecutor, ExecutorState, PeriodicTask, Task, run_task};
pub use group::EventLoopGroup;
pub use promise::{ChannelPromise, Promise};
pub use scheduled::{ExpiredTask, ScheduledHandle, ScheduledQueue, ScheduledTask};
