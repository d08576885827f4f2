//! 头尾哨兵。
//!
//! 头哨兵是出站操作的终点，把操作交给通道的底层操作集；尾哨兵是入站事件的终点，
//! 负责兜底释放没有被任何处理器消费的消息。

use std::{net::SocketAddr, sync::Arc};

use tracing::{debug, warn};

use super::{ChannelHandler, ChannelHandlerContext, InboundHandler, OutboundHandler, UserEvent};
use crate::buffer::{PipelineMessage, safe_release};
use crate::channel::Channel;
use crate::error::{CoreError, Result};
use crate::runtime::ChannelPromise;

/// 接收抵达尾哨兵的入站消息与异常。
///
/// 未配置时消息被释放、异常以 `warn` 记录；测试夹具借此收集入站结果。
pub trait UnhandledInboundSink: Send + Sync + 'static {
    /// 没有处理器消费的消息，所有权转交给接收方。
    fn on_unhandled_message(&self, channel: &Channel, msg: PipelineMessage);

    /// 没有处理器处理的异常。
    fn on_unhandled_exception(&self, channel: &Channel, error: CoreError);
}

pub(crate) struct HeadHandler;

impl HeadHandler {
    fn read_if_auto_read(ctx: &ChannelHandlerContext) {
        let channel = ctx.channel();
        if channel.config().auto_read {
            channel.read();
        }
    }
}

impl ChannelHandler for HeadHandler {}

impl InboundHandler for HeadHandler {
    fn channel_unregistered(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_unregistered();
        if !ctx.channel().is_open() {
            ctx.pipeline().destroy();
        }
        Ok(())
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_active();
        Self::read_if_auto_read(ctx);
        Ok(())
    }

    fn channel_read_complete(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.fire_channel_read_complete();
        Self::read_if_auto_read(ctx);
        Ok(())
    }
}

impl OutboundHandler for HeadHandler {
    fn bind(
        &self,
        ctx: &ChannelHandlerContext,
        local: SocketAddr,
        promise: ChannelPromise,
    ) -> Result<()> {
        ctx.channel().channel_unsafe().bind(local, promise);
        Ok(())
    }

    fn connect(
        &self,
        ctx: &ChannelHandlerContext,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> Result<()> {
        ctx.channel().channel_unsafe().connect(remote, local, promise);
        Ok(())
    }

    fn disconnect(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> Result<()> {
        ctx.channel().channel_unsafe().disconnect(promise);
        Ok(())
    }

    fn close(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> Result<()> {
        ctx.channel().channel_unsafe().close(promise);
        Ok(())
    }

    fn deregister(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> Result<()> {
        ctx.channel().channel_unsafe().deregister(promise);
        Ok(())
    }

    fn read(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.channel().channel_unsafe().begin_read();
        Ok(())
    }

    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> Result<()> {
        ctx.channel().channel_unsafe().write(msg, promise);
        Ok(())
    }

    fn flush(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        ctx.channel().channel_unsafe().flush();
        Ok(())
    }
}

pub(crate) struct TailHandler {
    sink: Option<Arc<dyn UnhandledInboundSink>>,
}

impl TailHandler {
    pub(crate) fn new(sink: Option<Arc<dyn UnhandledInboundSink>>) -> Self {
        Self { sink }
    }
}

impl ChannelHandler for TailHandler {}

// 尾哨兵之后没有节点，所有入站事件在此终止。
impl InboundHandler for TailHandler {
    fn channel_registered(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_unregistered(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_active(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_inactive(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.on_unhandled_message(ctx.channel(), msg),
            None => {
                debug!(
                    channel.id = %ctx.channel().id(),
                    ?msg,
                    "discarded an inbound message that reached the tail of the pipeline"
                );
                safe_release(&msg);
            }
        }
        Ok(())
    }

    fn channel_read_complete(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Ok(())
    }

    fn channel_writability_changed(
        &self,
        _ctx: &ChannelHandlerContext,
        _writable: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn user_event_triggered(&self, ctx: &ChannelHandlerContext, _event: UserEvent) -> Result<()> {
        debug!(
            channel.id = %ctx.channel().id(),
            "discarded a user event that reached the tail of the pipeline"
        );
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, error: CoreError) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.on_unhandled_exception(ctx.channel(), error),
            None => warn!(
                channel.id = %ctx.channel().id(),
                %error,
                "an exception reached the tail of the pipeline; no handler dealt with it"
            ),
        }
        Ok(())
    }
}
