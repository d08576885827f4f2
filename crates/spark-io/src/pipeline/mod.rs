//! 处理器流水线。
//!
//! # 模块架构（Why）
//! - [`Pipeline`] 保存头尾哨兵之间的处理器链，支持运行期增删改。
//! - [`ChannelHandlerContext`] 是处理器与流水线交互的入口，负责事件寻址与跨线程分发。
//! - [`InboundHandler`] / [`OutboundHandler`] 定义回调，[`EventMask`] 声明可以越过的事件。

mod context;
mod handler;
mod head_tail;
mod mask;
#[allow(clippy::module_inception)]
mod pipeline;

pub use context::ChannelHandlerContext;
pub use handler::{
    ChannelHandler, Handler, InboundHandler, OutboundHandler, UserEvent, handler_from_duplex,
    handler_from_inbound, handler_from_outbound,
};
pub use head_tail::UnhandledInboundSink;
pub use mask::EventMask;
pub use pipeline::Pipeline;

pub(crate) use pipeline::PipelineCore;
