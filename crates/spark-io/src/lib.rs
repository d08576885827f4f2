#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "spark-io: 基于处理器流水线的异步网络 I/O 核心。"]
#![doc = ""]
#![doc = "== 子系统 =="]
#![doc = "1. [`buffer`]：引用计数字节缓冲、扩容策略与分配器契约。"]
#![doc = "2. [`runtime`]：承诺、单线程事件循环、定时任务与事件循环组。"]
#![doc = "3. [`channel`]：通道、传输层契约与带水位背压的出站写队列。"]
#![doc = "4. [`pipeline`]：处理器链、上下文与入站/出站事件分发。"]
#![doc = ""]
#![doc = "具体套接字传输、编解码处理器与日志订阅器的安装由使用方提供。"]

pub mod buffer;
pub mod channel;
pub mod error;
pub mod pipeline;
pub mod runtime;

pub use buffer::{
    BufferAllocator, ByteBuf, ByteOrder, PipelineMessage, ReferenceCounted, Unpooled,
    UnpooledAllocator,
};
pub use channel::{
    Channel, ChannelBuilder, ChannelConfig, ChannelId, ChannelTransport, ConnectOutcome,
    OutboundBuffer, WaterMarks,
};
pub use error::{CoreError, ErrorCause, Result};
pub use pipeline::{
    ChannelHandler, ChannelHandlerContext, EventMask, Handler, InboundHandler, OutboundHandler,
    Pipeline,
};
pub use runtime::{
    ChannelPromise, EventExecutor, EventLoopConfig, EventLoopGroup, Promise, ScheduledHandle,
    SingleThreadEventLoop,
};

/// 编写处理器与传输层时常用的导入集合。
pub mod prelude {
    pub use crate::buffer::{
        BufferAllocator, ByteBuf, PipelineMessage, ReferenceCounted, Unpooled, safe_release,
    };
    pub use crate::channel::{Channel, ChannelTransport, ConnectOutcome, OutboundBuffer};
    pub use crate::error::{CoreError, Result, codes};
    pub use crate::pipeline::{
        ChannelHandler, ChannelHandlerContext, EventMask, InboundHandler, OutboundHandler,
        UserEvent, handler_from_duplex, handler_from_inbound, handler_from_outbound,
    };
    pub use crate::runtime::{ChannelPromise, EventExecutor, Promise};
}
