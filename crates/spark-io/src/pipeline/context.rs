//! 处理器上下文与事件分发。
//!
//! # 执行逻辑（How）
//! - 入站事件沿 `next` 方向、出站操作沿 `prev` 方向寻找下一个不跳过该事件的上下文；
//!   寻址只在读锁内遍历链接，回调始终在锁外执行。
//! - 目标上下文的执行器不是当前线程时，调用被打包成任务提交过去；否则就地执行。
//! - 回调以 `catch_unwind` 包裹：入站失败转入同一上下文的 `exception_caught`（该回调自身的失败只记日志），
//!   出站失败完成操作承诺，没有承诺的操作（`read`、`flush`）同样转入 `exception_caught`。
//! - 尚未完成 `handler_added` 或已移除的上下文对事件透明。

use std::{
    fmt,
    net::SocketAddr,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use tracing::{debug, warn};

use super::{
    EventMask, Handler, InboundHandler, OutboundHandler, Pipeline, UserEvent,
};
use crate::buffer::{BufferAllocator, PipelineMessage, safe_release};
use crate::channel::Channel;
use crate::error::{CoreError, Result, codes, panic_message};
use crate::runtime::{ChannelPromise, EventExecutor};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    Init = 0,
    AddPending = 1,
    Added = 2,
    Removed = 3,
}

impl HandlerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::AddPending,
            2 => Self::Added,
            _ => Self::Removed,
        }
    }
}

/// 链中的一个节点：名称、处理器、跳过位与可选的专属执行器。
pub(crate) struct ContextNode {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) skip: EventMask,
    pub(crate) executor: Option<Arc<dyn EventExecutor>>,
    state: AtomicU8,
}

impl ContextNode {
    pub(crate) fn new(
        index: usize,
        name: String,
        handler: Arc<dyn Handler>,
        executor: Option<Arc<dyn EventExecutor>>,
    ) -> Self {
        Self {
            index,
            name,
            skip: handler.skip_mask(),
            handler,
            executor,
            state: AtomicU8::new(HandlerState::Init as u8),
        }
    }

    /// 头尾哨兵：创建即处于已添加状态。
    pub(crate) fn sentinel(index: usize, name: &str, handler: Arc<dyn Handler>) -> Self {
        let node = Self::new(index, name.to_owned(), handler, None);
        node.state.store(HandlerState::Added as u8, Ordering::Release);
        node
    }

    fn state(&self) -> HandlerState {
        HandlerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_added(&self) -> bool {
        self.state() == HandlerState::Added
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.state() == HandlerState::Removed
    }

    pub(crate) fn set_add_pending(&self) {
        let _ = self.state.compare_exchange(
            HandlerState::Init as u8,
            HandlerState::AddPending as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// 切换到 `Added`；已移除时返回 `false`。
    fn mark_added(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match HandlerState::from_u8(state) {
                    HandlerState::Init | HandlerState::AddPending => {
                        Some(HandlerState::Added as u8)
                    }
                    HandlerState::Added | HandlerState::Removed => None,
                }
            })
            .is_ok()
    }

    /// 切换到 `Removed`，返回之前是否处于 `Added`。
    fn mark_removed(&self) -> bool {
        let previous = self
            .state
            .swap(HandlerState::Removed as u8, Ordering::AcqRel);
        HandlerState::from_u8(previous) == HandlerState::Added
    }
}

impl fmt::Debug for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextNode")
            .field("name", &self.name)
            .field("handler", &self.handler.type_name())
            .field("state", &self.state())
            .finish()
    }
}

/// 被丢弃时释放消息，保证投递失败的任务不会泄漏缓冲。
struct ReleaseOnDrop(Option<PipelineMessage>);

impl ReleaseOnDrop {
    fn into_message(mut self) -> Option<PipelineMessage> {
        self.0.take()
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if let Some(message) = self.0.take() {
            safe_release(&message);
        }
    }
}

/// 处理器访问通道、流水线与事件流的入口。
///
/// 上下文是轻量句柄，可以克隆并在回调之外保存，例如在定时任务里继续写出。
#[derive(Clone)]
pub struct ChannelHandlerContext {
    channel: Channel,
    node: Arc<ContextNode>,
}

impl ChannelHandlerContext {
    pub(crate) fn new(channel: Channel, node: Arc<ContextNode>) -> Self {
        Self { channel, node }
    }

    pub(crate) fn node(&self) -> &Arc<ContextNode> {
        &self.node
    }

    /// 上下文名称。
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// 所属通道。
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// 所属流水线。
    pub fn pipeline(&self) -> Pipeline {
        self.channel.pipeline()
    }

    /// 绑定的处理器。
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.node.handler
    }

    /// 执行回调的执行器：专属执行器优先，其次是通道的事件循环；通道未注册时为 `None`。
    pub fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.node
            .executor
            .clone()
            .or_else(|| self.channel.event_loop())
    }

    /// 通道的缓冲分配器。
    pub fn allocator(&self) -> Arc<dyn BufferAllocator> {
        self.channel.allocator()
    }

    /// 是否已从流水线移除。
    pub fn is_removed(&self) -> bool {
        self.node.is_removed()
    }

    /// 当前线程不是回调线程时返回需要投递的执行器。
    pub(crate) fn foreign_executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.executor().filter(|executor| !executor.in_event_loop())
    }

    fn next_inbound(&self, event: EventMask) -> Self {
        let node = self.channel.core().pipeline.next_inbound(self.node.index, event);
        Self::new(self.channel.clone(), node)
    }

    fn next_outbound(&self, event: EventMask) -> Self {
        let node = self
            .channel
            .core()
            .pipeline
            .next_outbound(self.node.index, event);
        Self::new(self.channel.clone(), node)
    }

    // ---- 入站传播 ----

    /// 向后传递 `channel_registered`。
    pub fn fire_channel_registered(&self) {
        self.next_inbound(EventMask::CHANNEL_REGISTERED)
            .invoke_channel_registered();
    }

    /// 向后传递 `channel_unregistered`。
    pub fn fire_channel_unregistered(&self) {
        self.next_inbound(EventMask::CHANNEL_UNREGISTERED)
            .invoke_channel_unregistered();
    }

    /// 向后传递 `channel_active`。
    pub fn fire_channel_active(&self) {
        self.next_inbound(EventMask::CHANNEL_ACTIVE)
            .invoke_channel_active();
    }

    /// 向后传递 `channel_inactive`。
    pub fn fire_channel_inactive(&self) {
        self.next_inbound(EventMask::CHANNEL_INACTIVE)
            .invoke_channel_inactive();
    }

    /// 向后传递读到的消息。
    pub fn fire_channel_read(&self, msg: PipelineMessage) {
        self.next_inbound(EventMask::CHANNEL_READ)
            .invoke_channel_read(msg);
    }

    /// 向后传递 `channel_read_complete`。
    pub fn fire_channel_read_complete(&self) {
        self.next_inbound(EventMask::CHANNEL_READ_COMPLETE)
            .invoke_channel_read_complete();
    }

    /// 向后传递可写性翻转。
    pub fn fire_channel_writability_changed(&self, writable: bool) {
        self.next_inbound(EventMask::WRITABILITY_CHANGED)
            .invoke_channel_writability_changed(writable);
    }

    /// 向后传递用户事件。
    pub fn fire_user_event_triggered(&self, event: UserEvent) {
        self.next_inbound(EventMask::USER_EVENT)
            .invoke_user_event_triggered(event);
    }

    /// 向后传递异常。
    pub fn fire_exception_caught(&self, error: CoreError) {
        self.next_inbound(EventMask::EXCEPTION_CAUGHT)
            .invoke_exception_caught(error);
    }

    pub(crate) fn invoke_channel_registered(self) {
        self.invoke_inbound(EventMask::CHANNEL_REGISTERED, |handler, ctx| {
            handler.channel_registered(ctx)
        });
    }

    pub(crate) fn invoke_channel_unregistered(self) {
        self.invoke_inbound(EventMask::CHANNEL_UNREGISTERED, |handler, ctx| {
            handler.channel_unregistered(ctx)
        });
    }

    pub(crate) fn invoke_channel_active(self) {
        self.invoke_inbound(EventMask::CHANNEL_ACTIVE, |handler, ctx| {
            handler.channel_active(ctx)
        });
    }

    pub(crate) fn invoke_channel_inactive(self) {
        self.invoke_inbound(EventMask::CHANNEL_INACTIVE, |handler, ctx| {
            handler.channel_inactive(ctx)
        });
    }

    pub(crate) fn invoke_channel_read(self, msg: PipelineMessage) {
        let guard = ReleaseOnDrop(Some(msg));
        self.invoke_inbound(EventMask::CHANNEL_READ, move |handler, ctx| {
            match guard.into_message() {
                Some(msg) => handler.channel_read(ctx, msg),
                None => Ok(()),
            }
        });
    }

    pub(crate) fn invoke_channel_read_complete(self) {
        self.invoke_inbound(EventMask::CHANNEL_READ_COMPLETE, |handler, ctx| {
            handler.channel_read_complete(ctx)
        });
    }

    pub(crate) fn invoke_channel_writability_changed(self, writable: bool) {
        self.invoke_inbound(EventMask::WRITABILITY_CHANGED, move |handler, ctx| {
            handler.channel_writability_changed(ctx, writable)
        });
    }

    pub(crate) fn invoke_user_event_triggered(self, event: UserEvent) {
        self.invoke_inbound(EventMask::USER_EVENT, move |handler, ctx| {
            handler.user_event_triggered(ctx, event)
        });
    }

    pub(crate) fn invoke_exception_caught(self, error: CoreError) {
        self.invoke_inbound(EventMask::EXCEPTION_CAUGHT, move |handler, ctx| {
            handler.exception_caught(ctx, error)
        });
    }

    fn invoke_inbound<F>(self, event: EventMask, call: F)
    where
        F: FnOnce(&dyn InboundHandler, &ChannelHandlerContext) -> Result<()> + Send + 'static,
    {
        if let Some(executor) = self.foreign_executor() {
            let channel_id = self.channel.id();
            let handler = self.node.name.clone();
            if let Err(error) = executor.execute(Box::new(move || self.invoke_inbound_now(event, call))) {
                warn!(
                    channel.id = %channel_id,
                    handler = %handler,
                    ?event,
                    %error,
                    "inbound event dropped: executor rejected the task"
                );
            }
            return;
        }
        self.invoke_inbound_now(event, call);
    }

    fn invoke_inbound_now<F>(self, event: EventMask, call: F)
    where
        F: FnOnce(&dyn InboundHandler, &ChannelHandlerContext) -> Result<()> + Send + 'static,
    {
        let handler = match self.node.handler.as_inbound() {
            Some(handler) if self.node.is_added() => handler,
            _ => return self.next_inbound(event).invoke_inbound(event, call),
        };
        let error = match catch_unwind(AssertUnwindSafe(|| call(handler, &self))) {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(payload) => handler_panicked(&self.node.name, payload.as_ref()),
        };
        if event == EventMask::EXCEPTION_CAUGHT {
            warn!(
                channel.id = %self.channel.id(),
                handler = %self.node.name,
                %error,
                "exception_caught failed; the error is only logged"
            );
        } else {
            self.notify_handler_exception(error);
        }
    }

    /// 把回调失败交给同一上下文的 `exception_caught`。
    fn notify_handler_exception(&self, error: CoreError) {
        debug!(
            channel.id = %self.channel.id(),
            handler = %self.node.name,
            %error,
            "handler failed; redirecting to exception_caught"
        );
        self.clone().invoke_exception_caught(error);
    }

    // ---- 出站传播 ----

    /// 绑定本地地址。
    pub fn bind(&self, local: SocketAddr) -> ChannelPromise {
        self.bind_with(local, ChannelPromise::new())
    }

    /// 以调用方提供的承诺绑定本地地址。
    pub fn bind_with(&self, local: SocketAddr, promise: ChannelPromise) -> ChannelPromise {
        let completion = promise.clone();
        self.next_outbound(EventMask::BIND).invoke_outbound(
            EventMask::BIND,
            Some(promise.clone()),
            0,
            move |handler, ctx| handler.bind(ctx, local, completion),
        );
        promise
    }

    /// 连接对端。
    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelPromise {
        self.connect_with(remote, local, ChannelPromise::new())
    }

    /// 以调用方提供的承诺连接对端。
    pub fn connect_with(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> ChannelPromise {
        let completion = promise.clone();
        self.next_outbound(EventMask::CONNECT).invoke_outbound(
            EventMask::CONNECT,
            Some(promise.clone()),
            0,
            move |handler, ctx| handler.connect(ctx, remote, local, completion),
        );
        promise
    }

    /// 断开连接。
    pub fn disconnect(&self) -> ChannelPromise {
        self.disconnect_with(ChannelPromise::new())
    }

    /// 以调用方提供的承诺断开连接。
    pub fn disconnect_with(&self, promise: ChannelPromise) -> ChannelPromise {
        let completion = promise.clone();
        self.next_outbound(EventMask::DISCONNECT).invoke_outbound(
            EventMask::DISCONNECT,
            Some(promise.clone()),
            0,
            move |handler, ctx| handler.disconnect(ctx, completion),
        );
        promise
    }

    /// 关闭通道。
    pub fn close(&self) -> ChannelPromise {
        self.close_with(ChannelPromise::new())
    }

    /// 以调用方提供的承诺关闭通道。
    pub fn close_with(&self, promise: ChannelPromise) -> ChannelPromise {
        let completion = promise.clone();
        self.next_outbound(EventMask::CLOSE).invoke_outbound(
            EventMask::CLOSE,
            Some(promise.clone()),
            0,
            move |handler, ctx| handler.close(ctx, completion),
        );
        promise
    }

    /// 从事件循环注销。
    pub fn deregister(&self) -> ChannelPromise {
        self.deregister_with(ChannelPromise::new())
    }

    /// 以调用方提供的承诺注销。
    pub fn deregister_with(&self, promise: ChannelPromise) -> ChannelPromise {
        let completion = promise.clone();
        self.next_outbound(EventMask::DEREGISTER).invoke_outbound(
            EventMask::DEREGISTER,
            Some(promise.clone()),
            0,
            move |handler, ctx| handler.deregister(ctx, completion),
        );
        promise
    }

    /// 请求读取。
    pub fn read(&self) {
        self.next_outbound(EventMask::READ).invoke_outbound(
            EventMask::READ,
            None,
            0,
            |handler, ctx| handler.read(ctx),
        );
    }

    /// 写入消息，不冲刷。
    pub fn write(&self, msg: PipelineMessage) -> ChannelPromise {
        self.write_with(msg, ChannelPromise::new())
    }

    /// 以调用方提供的承诺写入消息。承诺已完成（例如已取消）时直接释放消息。
    pub fn write_with(&self, msg: PipelineMessage, promise: ChannelPromise) -> ChannelPromise {
        if promise.is_done() {
            safe_release(&msg);
            return promise;
        }
        let size = self.channel.estimate_size(&msg);
        let guard = ReleaseOnDrop(Some(msg));
        let completion = promise.clone();
        self.next_outbound(EventMask::WRITE).invoke_outbound(
            EventMask::WRITE,
            Some(promise.clone()),
            size,
            move |handler, ctx| match guard.into_message() {
                Some(msg) => handler.write(ctx, msg, completion),
                None => Ok(()),
            },
        );
        promise
    }

    /// 冲刷。
    pub fn flush(&self) {
        self.next_outbound(EventMask::FLUSH).invoke_outbound(
            EventMask::FLUSH,
            None,
            0,
            |handler, ctx| handler.flush(ctx),
        );
    }

    /// 写入并冲刷。
    pub fn write_and_flush(&self, msg: PipelineMessage) -> ChannelPromise {
        self.write_and_flush_with(msg, ChannelPromise::new())
    }

    /// 以调用方提供的承诺写入并冲刷。
    pub fn write_and_flush_with(
        &self,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> ChannelPromise {
        let promise = self.write_with(msg, promise);
        self.flush();
        promise
    }

    /// 分发出站操作；跨线程写入在投递期间计入 `pending_bytes` 以参与背压。
    fn invoke_outbound<F>(
        self,
        event: EventMask,
        promise: Option<ChannelPromise>,
        pending_bytes: usize,
        call: F,
    ) where
        F: FnOnce(&dyn OutboundHandler, &ChannelHandlerContext) -> Result<()> + Send + 'static,
    {
        let Some(executor) = self.foreign_executor() else {
            return self.invoke_outbound_now(event, promise, call);
        };
        let outbound = if pending_bytes > 0 {
            self.channel.outbound_buffer()
        } else {
            None
        };
        if let Some(outbound) = &outbound {
            outbound.increment_pending_bytes(pending_bytes);
        }
        let in_flight = outbound.clone();
        let rejected = promise.clone();
        let task = Box::new(move || {
            if let Some(outbound) = in_flight {
                outbound.decrement_pending_bytes(pending_bytes);
            }
            self.invoke_outbound_now(event, promise, call);
        });
        if let Err(error) = executor.execute(task) {
            if let Some(outbound) = outbound {
                outbound.decrement_pending_bytes(pending_bytes);
            }
            match rejected {
                Some(promise) => {
                    promise.try_failure(error);
                }
                None => warn!(?event, %error, "outbound operation dropped: executor rejected the task"),
            }
        }
    }

    fn invoke_outbound_now<F>(self, event: EventMask, promise: Option<ChannelPromise>, call: F)
    where
        F: FnOnce(&dyn OutboundHandler, &ChannelHandlerContext) -> Result<()> + Send + 'static,
    {
        let handler = match self.node.handler.as_outbound() {
            Some(handler) if self.node.is_added() => handler,
            _ => {
                return self
                    .next_outbound(event)
                    .invoke_outbound(event, promise, 0, call);
            }
        };
        let error = match catch_unwind(AssertUnwindSafe(|| call(handler, &self))) {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(payload) => handler_panicked(&self.node.name, payload.as_ref()),
        };
        match promise {
            Some(promise) => {
                if !promise.try_failure(error.clone()) {
                    debug!(
                        channel.id = %self.channel.id(),
                        handler = %self.node.name,
                        %error,
                        "outbound handler failed after its promise completed"
                    );
                }
            }
            None => self.notify_handler_exception(error),
        }
    }

    // ---- 生命周期回调 ----

    /// 调用 `handler_added`；失败时移除该处理器并从头部传播异常。
    pub(crate) fn call_handler_added(&self) {
        if !self.node.mark_added() {
            return;
        }
        let lifecycle = self.node.handler.lifecycle();
        let failure = match catch_unwind(AssertUnwindSafe(|| lifecycle.handler_added(self))) {
            Ok(Ok(())) => {
                debug!(
                    channel.id = %self.channel.id(),
                    handler = %self.node.name,
                    "handler added"
                );
                return;
            }
            Ok(Err(error)) => error,
            Err(payload) => handler_panicked(&self.node.name, payload.as_ref()),
        };
        let pipeline = self.pipeline();
        if pipeline.unlink(&self.node) {
            self.call_handler_removed();
        }
        pipeline.fire_exception_caught(
            CoreError::new(
                codes::PIPELINE_HANDLER_FAILED,
                format!("handler_added of `{}` failed; the handler was removed", self.node.name),
            )
            .with_cause(failure),
        );
    }

    /// 调用 `handler_removed`（仅当 `handler_added` 曾被调用）。
    pub(crate) fn call_handler_removed(&self) {
        if !self.node.mark_removed() {
            return;
        }
        let lifecycle = self.node.handler.lifecycle();
        let failure = match catch_unwind(AssertUnwindSafe(|| lifecycle.handler_removed(self))) {
            Ok(Ok(())) => {
                debug!(
                    channel.id = %self.channel.id(),
                    handler = %self.node.name,
                    "handler removed"
                );
                return;
            }
            Ok(Err(error)) => error,
            Err(payload) => handler_panicked(&self.node.name, payload.as_ref()),
        };
        self.pipeline().fire_exception_caught(
            CoreError::new(
                codes::PIPELINE_HANDLER_FAILED,
                format!("handler_removed of `{}` failed", self.node.name),
            )
            .with_cause(failure),
        );
    }
}

fn handler_panicked(handler: &str, payload: &(dyn std::any::Any + Send)) -> CoreError {
    CoreError::new(
        codes::PIPELINE_HANDLER_PANICKED,
        format!("handler `{handler}` panicked: {}", panic_message(payload)),
    )
}

impl fmt::Debug for ChannelHandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlerContext")
            .field("channel", &self.channel.id())
            .field("name", &self.node.name)
            .field("handler", &self.node.handler.type_name())
            .finish()
    }
}
