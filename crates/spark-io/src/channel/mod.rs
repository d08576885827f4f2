//! 通道与出站写队列。
//!
//! # 模块架构（Why）
//! - [`Channel`] 聚合传输层、流水线、事件循环归属与 [`OutboundBuffer`]。
//! - [`ChannelTransport`] 是核心唯一依赖的 I/O 契约，套接字或内存管道都可以实现它。
//! - [`ChannelConfig`] 承载可序列化的通道参数，[`MessageSizeEstimator`] 决定背压记账口径。

#[allow(clippy::module_inception)]
mod channel;
mod config;
mod estimator;
mod id;
mod outbound;
mod transport;

pub use channel::{Channel, ChannelBuilder, ChannelUnsafe};
pub use config::{
    ChannelConfig, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK, ReadBudget, WaterMarks,
};
pub use estimator::{DefaultMessageSizeEstimator, MessageSizeEstimator};
pub use id::ChannelId;
pub use outbound::{OutboundBuffer, WritabilityListener};
pub use transport::{ChannelTransport, ConnectOutcome};
