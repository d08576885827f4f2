//! 处理器契约。
//!
//! # 设计背景（Why）
//! - 沿用 Netty `ChannelInboundHandler` / `ChannelOutboundHandler` 的分工：入站事件自传输层流向业务层，
//!   出站操作自业务层流向传输层；同时实现两者即为全双工处理器。
//! - 流水线只保存类型擦除后的 [`Handler`]，通过 `handler_from_*` 适配器把具体类型装箱，
//!   适配器同时记录类型信息，供按类型查找与默认命名使用。
//!
//! # 契约（What）
//! - 所有回调都在上下文绑定的执行器线程上调用，必须无阻塞。
//! - 默认实现把事件原样转发给下一个上下文；返回 `Err` 或 panic 会被调用点捕获：
//!   入站转入同一上下文的 `exception_caught`，出站失败该操作的承诺。
//! - 处理器通过 [`ChannelHandler::skipped_events`] 声明不关心的事件，流水线据此直接越过。

use std::{
    any::{Any, TypeId},
    fmt,
    net::SocketAddr,
    sync::Arc,
};

use super::{ChannelHandlerContext, EventMask};
use crate::buffer::PipelineMessage;
use crate::error::{CoreError, Result};
use crate::runtime::ChannelPromise;

/// 用户事件载荷。
pub type UserEvent = Box<dyn Any + Send>;

/// 生命周期回调与跳过声明，入站与出站处理器共享。
pub trait ChannelHandler: Send + Sync + 'static {
    /// 处理器被加入流水线且可以处理事件后调用一次。
    fn handler_added(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    /// 处理器被移出流水线后调用一次；仅当 `handler_added` 曾被调用。
    fn handler_removed(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    /// 本处理器不关心的事件，注册时计算一次。
    fn skipped_events(&self) -> EventMask {
        EventMask::NONE
    }
}

/// 入站事件处理器。
pub trait InboundHandler: ChannelHandler {
    /// 通道注册到事件循环。
    fn channel_registered(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_registered();
        Ok(())
    }

    /// 通道从事件循环注销。
    fn channel_unregistered(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_unregistered();
        Ok(())
    }

    /// 通道变为活跃。
    fn channel_active(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_active();
        Ok(())
    }

    /// 通道不再活跃。
    fn channel_inactive(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_inactive();
        Ok(())
    }

    /// 读到消息；不再向后传递时由本处理器负责 `release`。
    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        ctx.fire_channel_read(msg);
        Ok(())
    }

    /// 一批读取结束。
    fn channel_read_complete(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_read_complete();
        Ok(())
    }

    /// 可写性翻转。
    fn channel_writability_changed(&self, ctx: &ChannelHandlerContext, writable: bool) -> Result<()> {
        ctx.fire_channel_writability_changed(writable);
        Ok(())
    }

    /// 用户事件。
    fn user_event_triggered(&self, ctx: &ChannelHandlerContext, event: UserEvent) -> Result<()> {
        ctx.fire_user_event_triggered(event);
        Ok(())
    }

    /// 异常；此回调自身的失败只记录日志。
    fn exception_caught(&self, ctx: &ChannelHandlerContext, error: CoreError) -> Result<()> {
        ctx.fire_exception_caught(error);
        Ok(())
    }
}

/// 出站操作处理器。
pub trait OutboundHandler: ChannelHandler {
    /// 绑定本地地址。
    fn bind(
        &self,
        ctx: &ChannelHandlerContext,
        local: SocketAddr,
        promise: ChannelPromise,
    ) -> Result<()> {
        ctx.bind_with(local, promise);
        Ok(())
    }

    /// 连接对端。
    fn connect(
        &self,
        ctx: &ChannelHandlerContext,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> Result<()> {
        ctx.connect_with(remote, local, promise);
        Ok(())
    }

    /// 断开连接。
    fn disconnect(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> Result<()> {
        ctx.disconnect_with(promise);
        Ok(())
    }

    /// 关闭通道。
    fn close(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> Result<()> {
        ctx.close_with(promise);
        Ok(())
    }

    /// 从事件循环注销。
    fn deregister(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> Result<()> {
        ctx.deregister_with(promise);
        Ok(())
    }

    /// 请求读取。
    fn read(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.read();
        Ok(())
    }

    /// 写入消息；不再向前传递时由本处理器负责 `release` 并完成承诺。
    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> Result<()> {
        ctx.write_with(msg, promise);
        Ok(())
    }

    /// 冲刷。
    fn flush(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.flush();
        Ok(())
    }
}

/// 流水线保存的类型擦除处理器。
pub trait Handler: Send + Sync + 'static {
    /// 生命周期回调。
    fn lifecycle(&self) -> &dyn ChannelHandler;

    /// 入站视图。
    fn as_inbound(&self) -> Option<&dyn InboundHandler> {
        None
    }

    /// 出站视图。
    fn as_outbound(&self) -> Option<&dyn OutboundHandler> {
        None
    }

    /// 声明的跳过位与方向推导出的跳过位之并。
    fn skip_mask(&self) -> EventMask;

    /// 具体处理器类型的短名称，用于默认命名与日志。
    fn type_name(&self) -> &'static str;

    /// 具体处理器类型的 `TypeId`。
    fn handler_type_id(&self) -> TypeId;

    /// 以 `Any` 访问具体处理器。
    fn as_any(&self) -> &dyn Any;
}

impl dyn Handler {
    /// 借用具体处理器。
    pub fn downcast_ref<H: Any>(&self) -> Option<&H> {
        self.as_any().downcast_ref::<H>()
    }

    /// 具体类型是否为 `H`。
    pub fn is<H: Any>(&self) -> bool {
        self.handler_type_id() == TypeId::of::<H>()
    }
}

impl fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("type", &self.type_name())
            .field("skip", &self.skip_mask())
            .finish()
    }
}

/// 把入站处理器装箱为流水线可保存的形式。
pub fn handler_from_inbound<H: InboundHandler>(handler: H) -> Arc<dyn Handler> {
    Arc::new(InboundHandlerSlot(handler))
}

/// 把出站处理器装箱为流水线可保存的形式。
pub fn handler_from_outbound<H: OutboundHandler>(handler: H) -> Arc<dyn Handler> {
    Arc::new(OutboundHandlerSlot(handler))
}

/// 把全双工处理器装箱为流水线可保存的形式。
pub fn handler_from_duplex<H: InboundHandler + OutboundHandler>(handler: H) -> Arc<dyn Handler> {
    Arc::new(DuplexHandlerSlot(handler))
}

struct InboundHandlerSlot<H>(H);

impl<H: InboundHandler> Handler for InboundHandlerSlot<H> {
    fn lifecycle(&self) -> &dyn ChannelHandler {
        &self.0
    }

    fn as_inbound(&self) -> Option<&dyn InboundHandler> {
        Some(&self.0)
    }

    fn skip_mask(&self) -> EventMask {
        self.0.skipped_events() | EventMask::OUTBOUND
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<H>()
    }

    fn handler_type_id(&self) -> TypeId {
        TypeId::of::<H>()
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }
}

struct OutboundHandlerSlot<H>(H);

impl<H: OutboundHandler> Handler for OutboundHandlerSlot<H> {
    fn lifecycle(&self) -> &dyn ChannelHandler {
        &self.0
    }

    fn as_outbound(&self) -> Option<&dyn OutboundHandler> {
        Some(&self.0)
    }

    fn skip_mask(&self) -> EventMask {
        self.0.skipped_events() | EventMask::INBOUND
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<H>()
    }

    fn handler_type_id(&self) -> TypeId {
        TypeId::of::<H>()
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }
}

struct DuplexHandlerSlot<H>(H);

impl<H: InboundHandler + OutboundHandler> Handler for DuplexHandlerSlot<H> {
    fn lifecycle(&self) -> &dyn ChannelHandler {
        &self.0
    }

    fn as_inbound(&self) -> Option<&dyn InboundHandler> {
        Some(&self.0)
    }

    fn as_outbound(&self) -> Option<&dyn OutboundHandler> {
        Some(&self.0)
    }

    fn skip_mask(&self) -> EventMask {
        self.0.skipped_events()
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<H>()
    }

    fn handler_type_id(&self) -> TypeId {
        TypeId::of::<H>()
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }
}

/// `a::b::Codec<x::Y>` → `Codec`。
fn short_type_name<H>() -> &'static str {
    let full = std::any::type_name::<H>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
