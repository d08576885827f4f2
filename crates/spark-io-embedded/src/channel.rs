use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use spark_io::{
    buffer::{BufferAllocator, PipelineMessage, safe_release},
    channel::{Channel, ChannelConfig, ChannelTransport},
    error::{CoreError, Result},
    pipeline::{Handler, Pipeline, UnhandledInboundSink},
    runtime::{ChannelPromise, EventExecutor},
};
use tracing::warn;

use crate::{EmbeddedEventLoop, EmbeddedTransport};

/// 收集抵达尾哨兵的消息与异常。
#[derive(Default)]
struct InboundRecorder {
    messages: Mutex<VecDeque<PipelineMessage>>,
    exceptions: Mutex<VecDeque<CoreError>>,
}

impl UnhandledInboundSink for InboundRecorder {
    fn on_unhandled_message(&self, _channel: &Channel, msg: PipelineMessage) {
        self.messages.lock().push_back(msg);
    }

    fn on_unhandled_exception(&self, _channel: &Channel, error: CoreError) {
        self.exceptions.lock().push_back(error);
    }
}

/// [`EmbeddedChannel`] 的构造器。
pub struct EmbeddedChannelBuilder {
    config: ChannelConfig,
    transport: Arc<EmbeddedTransport>,
    allocator: Option<Arc<dyn BufferAllocator>>,
    handlers: Vec<Arc<dyn Handler>>,
    register: bool,
}

impl EmbeddedChannelBuilder {
    /// 通道配置。
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换默认的已活跃传输。
    pub fn transport(mut self, transport: Arc<EmbeddedTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// 替换默认的非池化分配器，便于断言缓冲泄漏。
    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// 追加处理器，名称自动生成。
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// 构造后是否立即注册；默认注册。
    pub fn register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    /// 构造通道并按需注册。
    pub fn build(self) -> Result<EmbeddedChannel> {
        let event_loop = Arc::new(EmbeddedEventLoop::new());
        let recorder = Arc::new(InboundRecorder::default());
        let transport: Arc<dyn ChannelTransport> = self.transport.clone();
        let mut builder = Channel::builder(transport)
            .config(self.config)
            .unhandled_sink(recorder.clone());
        if let Some(allocator) = self.allocator {
            builder = builder.allocator(allocator);
        }
        let channel = builder.build()?;
        let pipeline = channel.pipeline();
        for handler in self.handlers {
            pipeline.add_last_unnamed(handler)?;
        }
        let embedded = EmbeddedChannel {
            event_loop,
            transport: self.transport,
            channel,
            recorder,
        };
        if self.register {
            embedded.register()?;
        }
        Ok(embedded)
    }
}

/// 无套接字的通道夹具。
///
/// # 设计背景（Why）
/// - 处理器测试只关心事件如何流经流水线：入站消息从这里注入，流经处理器后被尾哨兵收集；
///   出站消息写出后被 [`EmbeddedTransport`] 收集，供断言读取。
///
/// # 契约（What）
/// - 所有回调在调用线程上同步执行；投递到事件循环的任务在每次 `write_*` 之后自动运行。
/// - 处理器未处理的异常被记录，由 [`EmbeddedChannel::check_exception`] 以 `Err` 形式交还。
pub struct EmbeddedChannel {
    event_loop: Arc<EmbeddedEventLoop>,
    transport: Arc<EmbeddedTransport>,
    channel: Channel,
    recorder: Arc<InboundRecorder>,
}

impl EmbeddedChannel {
    /// 以给定处理器构造并注册通道。
    pub fn new(handlers: impl IntoIterator<Item = Arc<dyn Handler>>) -> Result<Self> {
        handlers
            .into_iter()
            .fold(Self::builder(), EmbeddedChannelBuilder::handler)
            .build()
    }

    /// 开始构造。
    pub fn builder() -> EmbeddedChannelBuilder {
        EmbeddedChannelBuilder {
            config: ChannelConfig::default(),
            transport: Arc::new(EmbeddedTransport::new()),
            allocator: None,
            handlers: Vec::new(),
            register: true,
        }
    }

    /// 底层通道。
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// 流水线。
    pub fn pipeline(&self) -> Pipeline {
        self.channel.pipeline()
    }

    /// 驱动通道的事件循环。
    pub fn event_loop(&self) -> &Arc<EmbeddedEventLoop> {
        &self.event_loop
    }

    /// 内存传输。
    pub fn transport(&self) -> &Arc<EmbeddedTransport> {
        &self.transport
    }

    /// 注册到内置事件循环。
    pub fn register(&self) -> Result<()> {
        let executor: Arc<dyn EventExecutor> = self.event_loop.clone();
        let registered = self.channel.register(executor);
        self.run_pending_tasks();
        registered.wait()?;
        self.check_exception()
    }

    /// 从头部注入入站消息并触发一次 `channel_read_complete`。
    ///
    /// 返回尾哨兵处是否已有可读取的消息。
    pub fn write_inbound(
        &self,
        msgs: impl IntoIterator<Item = PipelineMessage>,
    ) -> Result<bool> {
        let pipeline = self.pipeline();
        for msg in msgs {
            pipeline.fire_channel_read(msg);
        }
        pipeline.fire_channel_read_complete();
        self.run_pending_tasks();
        self.check_exception()?;
        Ok(!self.recorder.messages.lock().is_empty())
    }

    /// 自尾部写出消息并冲刷。
    ///
    /// 返回传输层是否已收集到写出的消息；任一写入承诺失败时返回该错误。
    pub fn write_outbound(
        &self,
        msgs: impl IntoIterator<Item = PipelineMessage>,
    ) -> Result<bool> {
        let pipeline = self.pipeline();
        let promises: Vec<ChannelPromise> = msgs.into_iter().map(|msg| pipeline.write(msg)).collect();
        pipeline.flush();
        self.run_pending_tasks();
        self.check_exception()?;
        if let Some(error) = promises.iter().find_map(ChannelPromise::cause) {
            return Err(error);
        }
        Ok(self.transport.written_len() > 0)
    }

    /// 取出最早抵达尾哨兵的入站消息。
    pub fn read_inbound(&self) -> Option<PipelineMessage> {
        self.recorder.messages.lock().pop_front()
    }

    /// 取出最早写出的出站消息。
    pub fn read_outbound(&self) -> Option<PipelineMessage> {
        self.transport.take_written()
    }

    /// 尚未读取的入站消息数。
    pub fn inbound_len(&self) -> usize {
        self.recorder.messages.lock().len()
    }

    /// 尚未读取的出站消息数。
    pub fn outbound_len(&self) -> usize {
        self.transport.written_len()
    }

    /// 运行排队任务与已到期的定时任务。
    pub fn run_pending_tasks(&self) {
        self.event_loop.run_pending_tasks();
    }

    /// 拨快虚拟时钟并运行到期任务。
    pub fn advance_time_by(&self, duration: Duration) {
        self.event_loop.advance_time_by(duration);
        self.run_pending_tasks();
    }

    /// 交还记录到的第一个未处理异常；其余异常只记录日志。
    pub fn check_exception(&self) -> Result<()> {
        let mut exceptions = self.recorder.exceptions.lock();
        let Some(first) = exceptions.pop_front() else {
            return Ok(());
        };
        for suppressed in exceptions.drain(..) {
            warn!(
                channel.id = %self.channel.id(),
                error = %suppressed,
                "more than one exception was raised; only the first one is returned"
            );
        }
        Err(first)
    }

    /// 关闭通道并运行剩余任务。
    pub fn close(&self) -> ChannelPromise {
        let closed = self.channel.close();
        self.run_pending_tasks();
        closed
    }

    /// 关闭通道；返回是否仍有未读取的入站或出站消息。
    pub fn finish(&self) -> Result<bool> {
        self.close();
        self.check_exception()?;
        Ok(self.inbound_len() > 0 || self.outbound_len() > 0)
    }

    /// 关闭通道并释放所有未读取的消息；返回是否曾有未读取的消息。
    pub fn finish_and_release_all(&self) -> Result<bool> {
        let finished = self.finish();
        let mut released = self.transport.release_written() > 0;
        let inbound: Vec<PipelineMessage> = self.recorder.messages.lock().drain(..).collect();
        for msg in &inbound {
            safe_release(msg);
            released = true;
        }
        finished.map(|_| released)
    }
}

impl fmt::Debug for EmbeddedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedChannel")
            .field("channel", &self.channel)
            .field("inbound", &self.inbound_len())
            .field("outbound", &self.outbound_len())
            .finish()
    }
}
