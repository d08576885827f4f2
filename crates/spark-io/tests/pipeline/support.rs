//! 流水线测试共用的记录型处理器。

use std::{sync::Arc, thread};

use parking_lot::Mutex;
use spark_io::{
    buffer::{PipelineMessage, Unpooled},
    error::{CoreError, Result},
    pipeline::{ChannelHandler, ChannelHandlerContext, InboundHandler, OutboundHandler, UserEvent},
    runtime::ChannelPromise,
};

/// 多个处理器共享的事件日志。
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// 只保留以 `:{kind}` 结尾的条目。
    pub fn of_kind(&self, kind: &str) -> Vec<String> {
        let suffix = format!(":{kind}");
        self.0
            .lock()
            .iter()
            .filter(|entry| entry.ends_with(&suffix))
            .cloned()
            .collect()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|logged| logged == entry)
    }
}

/// 记录经过自己的每个事件后原样转发的全双工处理器。
pub struct Tracer {
    label: &'static str,
    log: EventLog,
}

impl Tracer {
    pub fn new(label: &'static str, log: &EventLog) -> Self {
        Self {
            label,
            log: log.clone(),
        }
    }

    fn record(&self, event: &str) {
        self.log.push(format!("{}:{event}", self.label));
    }
}

impl ChannelHandler for Tracer {
    fn handler_added(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        self.record("added");
        Ok(())
    }

    fn handler_removed(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        self.record(&format!(
            "removed@{}",
            thread::current().name().unwrap_or("unnamed")
        ));
        self.record("removed");
        Ok(())
    }
}

impl InboundHandler for Tracer {
    fn channel_registered(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        self.record("registered");
        ctx.fire_channel_registered();
        Ok(())
    }

    fn channel_unregistered(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        self.record("unregistered");
        ctx.fire_channel_unregistered();
        Ok(())
    }

    fn channel_active(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        self.record("active");
        ctx.fire_channel_active();
        Ok(())
    }

    fn channel_inactive(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        self.record("inactive");
        ctx.fire_channel_inactive();
        Ok(())
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        self.record("read");
        ctx.fire_channel_read(msg);
        Ok(())
    }

    fn channel_writability_changed(&self, ctx: &ChannelHandlerContext, writable: bool) -> Result<()> {
        self.record(if writable { "writable" } else { "unwritable" });
        ctx.fire_channel_writability_changed(writable);
        Ok(())
    }

    fn user_event_triggered(&self, ctx: &ChannelHandlerContext, event: UserEvent) -> Result<()> {
        self.record("user");
        ctx.fire_user_event_triggered(event);
        Ok(())
    }

    fn exception_caught(&self, ctx: &ChannelHandlerContext, error: CoreError) -> Result<()> {
        self.record(&format!("{}:exception", error.code()));
        self.record("exception");
        ctx.fire_exception_caught(error);
        Ok(())
    }
}

impl OutboundHandler for Tracer {
    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> Result<()> {
        self.record("write");
        ctx.write_with(msg, promise);
        Ok(())
    }

    fn flush(&self, ctx: &ChannelHandlerContext) -> Result<()> {
        self.record("flush");
        ctx.flush();
        Ok(())
    }

    fn close(&self, ctx: &ChannelHandlerContext, promise: ChannelPromise) -> Result<()> {
        self.record("close");
        ctx.close_with(promise);
        Ok(())
    }
}

pub fn bytes(payload: &[u8]) -> PipelineMessage {
    PipelineMessage::from(Unpooled::copied_buffer(payload))
}

pub fn payload_of(msg: PipelineMessage) -> Vec<u8> {
    let buf = msg.into_buffer().ok().expect("buffer message");
    let bytes = buf.to_vec().expect("live buffer");
    buf.release().expect("release payload");
    bytes
}
