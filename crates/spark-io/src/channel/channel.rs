//! 通道：流水线、事件循环归属与出站写队列的聚合体。
//!
//! # 设计背景（Why）
//! - 通道把不透明的 [`ChannelTransport`] 包装成带状态机、承诺与事件传播的对象：
//!   传输层只管 I/O，注册、激活、关闭顺序与写队列记账都在这里完成。
//! - 出站操作自流水线尾部出发，经头哨兵抵达 [`ChannelUnsafe`]；后者只在通道所属的事件循环上运行。
//!
//! # 执行逻辑（How）
//! - 注册：保存执行器，在其线程上调用 `do_register`，补发被推迟的 `handler_added`，
//!   随后传播 `channel_registered`，首次注册且已活跃时再传播 `channel_active`。
//! - 关闭：先摘下出站队列阻止新写入，再关闭传输层、失败全部待写条目，
//!   最后经事件循环依次传播 `channel_inactive`、注销与 `channel_unregistered`。
//! - 连接：传输层返回 [`ConnectOutcome::Pending`] 时在循环上挂一个超时任务，
//!   `finish_connect` 或超时二者先到者完成承诺。

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{
    ChannelConfig, ChannelId, ChannelTransport, ConnectOutcome, DefaultMessageSizeEstimator,
    MessageSizeEstimator, OutboundBuffer, ReadBudget, WritabilityListener,
};
use crate::buffer::{BufferAllocator, PipelineMessage, UnpooledAllocator, safe_release};
use crate::error::{CoreError, Result, codes};
use crate::pipeline::{Pipeline, PipelineCore, UnhandledInboundSink};
use crate::runtime::{ChannelPromise, EventExecutor, ScheduledHandle};

struct PendingConnect {
    promise: ChannelPromise,
    remote: SocketAddr,
    timeout: Option<ScheduledHandle>,
}

pub(crate) struct ChannelInner {
    id: ChannelId,
    config: RwLock<ChannelConfig>,
    allocator: Arc<dyn BufferAllocator>,
    estimator: Arc<dyn MessageSizeEstimator>,
    transport: Arc<dyn ChannelTransport>,
    event_loop: RwLock<Option<Arc<dyn EventExecutor>>>,
    pub(crate) pipeline: PipelineCore,
    outbound: Mutex<Option<Arc<OutboundBuffer>>>,
    registered: AtomicBool,
    never_registered: AtomicBool,
    in_flush: AtomicBool,
    close_initiated: AtomicBool,
    close_promise: ChannelPromise,
    pending_connect: Mutex<Option<PendingConnect>>,
}

/// 可写性翻转转发到流水线；不在事件循环上时投递过去。
struct WritabilityNotifier(Weak<ChannelInner>);

impl WritabilityListener for WritabilityNotifier {
    fn writability_changed(&self, writable: bool) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        let channel = Channel(inner);
        match channel.event_loop() {
            Some(executor) if !executor.in_event_loop() => {
                let target = channel.clone();
                let queued = executor.execute(Box::new(move || {
                    target.pipeline().fire_channel_writability_changed(writable);
                }));
                if let Err(error) = queued {
                    debug!(channel.id = %channel.id(), %error, "writability change dropped");
                }
            }
            _ => {
                channel.pipeline().fire_channel_writability_changed(writable);
            }
        }
    }
}

/// 通道句柄。克隆开销为一次引用计数，所有克隆指向同一通道。
#[derive(Clone)]
pub struct Channel(Arc<ChannelInner>);

/// [`Channel`] 的构造器。
pub struct ChannelBuilder {
    transport: Arc<dyn ChannelTransport>,
    config: ChannelConfig,
    allocator: Option<Arc<dyn BufferAllocator>>,
    estimator: Option<Arc<dyn MessageSizeEstimator>>,
    sink: Option<Arc<dyn UnhandledInboundSink>>,
}

impl ChannelBuilder {
    /// 通道配置，`build` 时校验。
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// 缓冲分配器；默认为进程共享的 [`UnpooledAllocator`]。
    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// 消息大小估算器；默认为 [`DefaultMessageSizeEstimator`]。
    pub fn estimator(mut self, estimator: Arc<dyn MessageSizeEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// 接收抵达尾哨兵的消息与异常。
    pub fn unhandled_sink(mut self, sink: Arc<dyn UnhandledInboundSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 构造通道。配置非法时返回 `channel.invalid_config`。
    pub fn build(self) -> Result<Channel> {
        self.config.validate()?;
        let marks = self.config.water_marks()?;
        let allocator: Arc<dyn BufferAllocator> = match self.allocator {
            Some(allocator) => allocator,
            None => UnpooledAllocator::shared(),
        };
        let estimator: Arc<dyn MessageSizeEstimator> = match self.estimator {
            Some(estimator) => estimator,
            None => Arc::new(DefaultMessageSizeEstimator::default()),
        };
        let inner = Arc::new_cyclic(|weak: &Weak<ChannelInner>| {
            let listener: Arc<dyn WritabilityListener> =
                Arc::new(WritabilityNotifier(weak.clone()));
            ChannelInner {
                id: ChannelId::next(),
                config: RwLock::new(self.config),
                allocator,
                estimator,
                transport: self.transport,
                event_loop: RwLock::new(None),
                pipeline: PipelineCore::new(self.sink),
                outbound: Mutex::new(Some(Arc::new(OutboundBuffer::with_listener(
                    marks, listener,
                )))),
                registered: AtomicBool::new(false),
                never_registered: AtomicBool::new(true),
                in_flush: AtomicBool::new(false),
                close_initiated: AtomicBool::new(false),
                close_promise: ChannelPromise::new(),
                pending_connect: Mutex::new(None),
            }
        });
        let channel = Channel(inner);
        debug!(channel.id = %channel.id(), "channel created");
        Ok(channel)
    }
}

impl Channel {
    /// 以传输层开始构造通道。
    pub fn builder(transport: Arc<dyn ChannelTransport>) -> ChannelBuilder {
        ChannelBuilder {
            transport,
            config: ChannelConfig::default(),
            allocator: None,
            estimator: None,
            sink: None,
        }
    }

    pub(crate) fn core(&self) -> &ChannelInner {
        &self.0
    }

    /// 进程内唯一标识。
    pub fn id(&self) -> ChannelId {
        self.0.id
    }

    /// 当前配置的快照。
    pub fn config(&self) -> ChannelConfig {
        self.0.config.read().clone()
    }

    /// 修改配置；修改后的配置校验失败时保持原样并返回错误。水位变化立即作用于出站队列。
    pub fn update_config(
        &self,
        update: impl FnOnce(&mut ChannelConfig) -> Result<()>,
    ) -> Result<()> {
        let marks = {
            let mut config = self.0.config.write();
            let mut next = config.clone();
            update(&mut next)?;
            next.validate()?;
            let marks = next.water_marks()?;
            *config = next;
            marks
        };
        if let Some(outbound) = self.outbound_buffer() {
            outbound.set_water_marks(marks);
        }
        Ok(())
    }

    /// 缓冲分配器。
    pub fn allocator(&self) -> Arc<dyn BufferAllocator> {
        Arc::clone(&self.0.allocator)
    }

    /// 传输层句柄。
    pub fn transport(&self) -> &Arc<dyn ChannelTransport> {
        &self.0.transport
    }

    /// 所属事件循环；注册前为 `None`。
    pub fn event_loop(&self) -> Option<Arc<dyn EventExecutor>> {
        self.0.event_loop.read().clone()
    }

    /// 按配置的估算器估算消息大小。
    pub fn estimate_size(&self, msg: &PipelineMessage) -> usize {
        self.0.estimator.size(msg)
    }

    /// 出站写队列；关闭后为 `None`。
    pub fn outbound_buffer(&self) -> Option<Arc<OutboundBuffer>> {
        self.0.outbound.lock().clone()
    }

    /// 处理器流水线。
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone())
    }

    /// 按配置的 `max_messages_per_read` 开始一次读循环记账。
    pub fn read_budget(&self) -> ReadBudget {
        ReadBudget::new(self.0.config.read().max_messages_per_read)
    }

    /// 底层操作集，供头哨兵与传输层实现使用；业务代码应通过流水线发起操作。
    pub fn channel_unsafe(&self) -> ChannelUnsafe<'_> {
        ChannelUnsafe { channel: self }
    }

    // ---- 状态 ----

    /// 注册到 `executor`。重复注册以 `channel.already_registered` 失败。
    pub fn register(&self, executor: Arc<dyn EventExecutor>) -> ChannelPromise {
        let promise = ChannelPromise::new();
        if self.is_registered() {
            promise.try_failure(CoreError::new(
                codes::CHANNEL_ALREADY_REGISTERED,
                format!("channel {} is already registered to an event loop", self.id()),
            ));
            return promise;
        }
        *self.0.event_loop.write() = Some(Arc::clone(&executor));
        if executor.in_event_loop() {
            self.channel_unsafe().register0(promise.clone());
            return promise;
        }
        let channel = self.clone();
        let completion = promise.clone();
        if let Err(error) = executor.execute(Box::new(move || {
            channel.channel_unsafe().register0(completion);
        })) {
            warn!(
                channel.id = %self.id(),
                executor = executor.name(),
                %error,
                "force-closing a channel whose registration was rejected"
            );
            self.channel_unsafe().close_forcibly();
            self.0.close_promise.try_success(());
            promise.try_failure(error);
        }
        promise
    }

    /// 底层资源是否仍然打开。
    pub fn is_open(&self) -> bool {
        self.0.transport.is_open()
    }

    /// 是否处于可收发状态。
    pub fn is_active(&self) -> bool {
        self.0.transport.is_active()
    }

    /// 是否已注册到事件循环。
    pub fn is_registered(&self) -> bool {
        self.0.registered.load(Ordering::Acquire)
    }

    /// 待写字节数低于高水位时可写；关闭后恒为 `false`。
    pub fn is_writable(&self) -> bool {
        self.outbound_buffer()
            .is_some_and(|outbound| outbound.is_writable())
    }

    /// 距离不可写还能写入的字节数。
    pub fn bytes_before_unwritable(&self) -> usize {
        self.outbound_buffer()
            .map_or(0, |outbound| outbound.bytes_before_unwritable())
    }

    /// 距离恢复可写还需排出的字节数。
    pub fn bytes_before_writable(&self) -> usize {
        self.outbound_buffer()
            .map_or(0, |outbound| outbound.bytes_before_writable())
    }

    /// 本地地址。
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.0.transport.local_address()
    }

    /// 对端地址。
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.0.transport.remote_address()
    }

    /// 通道关闭时完成的承诺。
    pub fn close_future(&self) -> ChannelPromise {
        self.0.close_promise.clone()
    }

    // ---- 出站操作：自流水线尾部出发 ----

    /// 绑定本地地址。
    pub fn bind(&self, local: SocketAddr) -> ChannelPromise {
        self.pipeline().bind(local)
    }

    /// 连接对端。
    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelPromise {
        self.pipeline().connect(remote, local)
    }

    /// 断开连接。
    pub fn disconnect(&self) -> ChannelPromise {
        self.pipeline().disconnect()
    }

    /// 关闭通道。
    pub fn close(&self) -> ChannelPromise {
        self.pipeline().close()
    }

    /// 从事件循环注销。
    pub fn deregister(&self) -> ChannelPromise {
        self.pipeline().deregister()
    }

    /// 请求读取。
    pub fn read(&self) -> &Self {
        self.pipeline().read();
        self
    }

    /// 写入，不冲刷。
    pub fn write(&self, msg: PipelineMessage) -> ChannelPromise {
        self.pipeline().write(msg)
    }

    /// 冲刷。
    pub fn flush(&self) -> &Self {
        self.pipeline().flush();
        self
    }

    /// 写入并冲刷。
    pub fn write_and_flush(&self, msg: PipelineMessage) -> ChannelPromise {
        self.pipeline().write_and_flush(msg)
    }

    // ---- 传输层回调 ----

    /// 交付读到的消息。
    pub fn fire_channel_read(&self, msg: PipelineMessage) {
        self.pipeline().fire_channel_read(msg);
    }

    /// 一批读取结束。
    pub fn fire_channel_read_complete(&self) {
        self.pipeline().fire_channel_read_complete();
    }

    /// 报告 [`ConnectOutcome::Pending`] 连接的结果；没有进行中的连接时忽略。
    pub fn finish_connect(&self, result: Result<()>) {
        if let Some(executor) = self.event_loop().filter(|executor| !executor.in_event_loop()) {
            let channel = self.clone();
            if let Err(error) = executor.execute(Box::new(move || {
                channel.channel_unsafe().finish_connect(result);
            })) {
                warn!(channel.id = %self.id(), %error, "connect completion dropped");
            }
            return;
        }
        self.channel_unsafe().finish_connect(result);
    }

    /// 传输层发现底层资源已关闭（例如对端关闭）。
    pub fn transport_closed(&self) {
        self.channel_unsafe().close(ChannelPromise::new());
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Channel {}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("registered", &self.is_registered())
            .field("open", &self.is_open())
            .field("active", &self.is_active())
            .finish()
    }
}

/// 通道的底层操作集。
///
/// # 契约（What）
/// - 只应在通道所属的事件循环上调用；头哨兵是唯一的常规调用方。
/// - 每个带承诺的操作先 `set_uncancellable`，已被取消的操作直接放弃。
pub struct ChannelUnsafe<'a> {
    channel: &'a Channel,
}

impl ChannelUnsafe<'_> {
    fn inner(&self) -> &ChannelInner {
        &self.channel.0
    }

    fn transport(&self) -> &dyn ChannelTransport {
        self.inner().transport.as_ref()
    }

    fn register0(&self, promise: ChannelPromise) {
        if !promise.set_uncancellable() || !self.ensure_open(&promise) {
            return;
        }
        let inner = self.inner();
        let first_registration = inner.never_registered.load(Ordering::Acquire);
        if let Err(error) = self.transport().do_register(self.channel) {
            self.close_forcibly();
            inner.close_promise.try_success(());
            promise.try_failure(error);
            return;
        }
        inner.never_registered.store(false, Ordering::Release);
        inner.registered.store(true, Ordering::Release);
        debug!(channel.id = %self.channel.id(), "channel registered");

        let pipeline = self.channel.pipeline();
        pipeline.invoke_deferred_callbacks();
        promise.try_success(());
        pipeline.fire_channel_registered();
        if self.channel.is_active() {
            if first_registration {
                pipeline.fire_channel_active();
            } else if self.channel.config().auto_read {
                self.begin_read();
            }
        }
    }

    /// 绑定本地地址；绑定使通道变为活跃时传播 `channel_active`。
    pub fn bind(&self, local: SocketAddr, promise: ChannelPromise) {
        if !promise.set_uncancellable() || !self.ensure_open(&promise) {
            return;
        }
        let was_active = self.channel.is_active();
        if let Err(error) = self.transport().do_bind(local) {
            promise.try_failure(error);
            self.close_if_closed();
            return;
        }
        if !was_active && self.channel.is_active() {
            let _ = self.invoke_later(|channel| {
                channel.pipeline().fire_channel_active();
            });
        }
        promise.try_success(());
    }

    /// 发起连接。已有进行中的连接时以 `channel.connection_pending` 失败。
    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, promise: ChannelPromise) {
        if !promise.set_uncancellable() || !self.ensure_open(&promise) {
            return;
        }
        if self.inner().pending_connect.lock().is_some() {
            promise.try_failure(CoreError::new(
                codes::CHANNEL_CONNECTION_PENDING,
                format!("a connection attempt to {remote} is already in progress"),
            ));
            return;
        }
        let was_active = self.channel.is_active();
        match self.transport().do_connect(remote, local) {
            Ok(ConnectOutcome::Connected) => self.fulfill_connect(&promise, was_active),
            Ok(ConnectOutcome::Pending) => self.await_connect(remote, promise),
            Err(error) => {
                promise.try_failure(error);
                self.close_if_closed();
            }
        }
    }

    fn await_connect(&self, remote: SocketAddr, promise: ChannelPromise) {
        let timeout = self.channel.config().connect_timeout;
        *self.inner().pending_connect.lock() = Some(PendingConnect {
            promise,
            remote,
            timeout: None,
        });
        if timeout.is_zero() {
            return;
        }
        let Some(executor) = self.channel.event_loop() else {
            return;
        };
        let channel = self.channel.clone();
        let scheduled = executor.schedule(
            Box::new(move || {
                let Some(pending) = channel.0.pending_connect.lock().take() else {
                    return;
                };
                let error = CoreError::new(
                    codes::CHANNEL_CONNECT_TIMEOUT,
                    format!("connection timed out: {}", pending.remote),
                );
                if pending.promise.try_failure(error) {
                    channel.channel_unsafe().close(ChannelPromise::new());
                }
            }),
            timeout,
        );
        match scheduled {
            Ok(handle) => {
                if let Some(pending) = self.inner().pending_connect.lock().as_mut() {
                    pending.timeout = Some(handle);
                }
            }
            Err(error) => warn!(
                channel.id = %self.channel.id(),
                %error,
                "cannot schedule the connect timeout"
            ),
        }
    }

    fn finish_connect(&self, result: Result<()>) {
        let Some(pending) = self.inner().pending_connect.lock().take() else {
            debug!(channel.id = %self.channel.id(), "no connection attempt in progress");
            return;
        };
        if let Some(timeout) = &pending.timeout {
            timeout.cancel();
        }
        match result {
            Ok(()) => self.fulfill_connect(&pending.promise, false),
            Err(error) => {
                pending.promise.try_failure(error);
                self.close_if_closed();
            }
        }
    }

    fn fulfill_connect(&self, promise: &ChannelPromise, was_active: bool) {
        let active = self.channel.is_active();
        let promise_set = promise.try_success(());
        if !was_active && active {
            self.channel.pipeline().fire_channel_active();
        }
        // 承诺已被超时抢先完成时关闭通道。
        if !promise_set {
            self.close(ChannelPromise::new());
        }
    }

    /// 断开连接；通道因此不再活跃时传播 `channel_inactive`。
    pub fn disconnect(&self, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        let was_active = self.channel.is_active();
        if let Err(error) = self.transport().do_disconnect() {
            promise.try_failure(error);
            self.close_if_closed();
            return;
        }
        if was_active && !self.channel.is_active() {
            let _ = self.invoke_later(|channel| {
                channel.pipeline().fire_channel_inactive();
            });
        }
        promise.try_success(());
        self.close_if_closed();
    }

    /// 关闭通道。重复关闭的承诺在首次关闭完成时完成。
    pub fn close(&self, promise: ChannelPromise) {
        if !promise.set_uncancellable() {
            return;
        }
        let inner = self.inner();
        if inner.close_initiated.swap(true, Ordering::AcqRel) {
            inner.close_promise.add_listener(move |_| {
                promise.try_success(());
            });
            return;
        }
        let was_active = self.channel.is_active();
        let outbound = inner.outbound.lock().take();
        let result = self.transport().do_close();
        let pending_connect = inner.pending_connect.lock().take();
        if let Some(pending) = pending_connect {
            if let Some(timeout) = &pending.timeout {
                timeout.cancel();
            }
            pending.promise.try_failure(CoreError::channel_closed());
        }
        inner.close_promise.try_success(());
        match result {
            Ok(()) => {
                promise.try_success(());
            }
            Err(error) => {
                promise.try_failure(error);
            }
        }
        debug!(channel.id = %self.channel.id(), "channel closed");

        if let Some(outbound) = outbound {
            if inner.in_flush.load(Ordering::Acquire) {
                let _ = self.invoke_later(move |_| drain_closed_outbound(&outbound));
            } else {
                drain_closed_outbound(&outbound);
            }
        }
        let fire_inactive = was_active && !self.channel.is_active();
        self.deregister_inner(ChannelPromise::new(), fire_inactive);
    }

    /// 关闭传输层，不传播事件。
    pub fn close_forcibly(&self) {
        if let Err(error) = self.transport().do_close() {
            warn!(channel.id = %self.channel.id(), %error, "failed to close a channel");
        }
    }

    /// 从事件循环注销。
    pub fn deregister(&self, promise: ChannelPromise) {
        self.deregister_inner(promise, false);
    }

    fn deregister_inner(&self, promise: ChannelPromise, fire_inactive: bool) {
        if !promise.set_uncancellable() {
            return;
        }
        if !self.channel.is_registered() {
            promise.try_success(());
            return;
        }
        let completion = promise.clone();
        // 延后执行，让当前回调链先走完。
        let deferred = self.invoke_later(move |channel| {
            if let Err(error) = channel.0.transport.do_deregister() {
                warn!(channel.id = %channel.id(), %error, "unexpected error while deregistering");
            }
            if fire_inactive {
                channel.pipeline().fire_channel_inactive();
            }
            if channel.0.registered.swap(false, Ordering::AcqRel) {
                debug!(channel.id = %channel.id(), "channel deregistered");
                channel.pipeline().fire_channel_unregistered();
            }
            promise.try_success(());
        });
        if let Err(error) = deferred {
            completion.try_failure(error);
        }
    }

    /// 请求传输层开始读取；通道不活跃时忽略。
    pub fn begin_read(&self) {
        if !self.channel.is_active() {
            return;
        }
        if let Err(error) = self.transport().do_begin_read() {
            let _ = self.invoke_later(move |channel| {
                channel.pipeline().fire_exception_caught(error);
            });
            self.close(ChannelPromise::new());
        }
    }

    /// 把消息挂入出站队列；通道已关闭时释放消息并以 `channel.closed` 失败。
    pub fn write(&self, msg: PipelineMessage, promise: ChannelPromise) {
        let Some(outbound) = self.channel.outbound_buffer() else {
            safe_release(&msg);
            promise.try_failure(CoreError::channel_closed());
            return;
        };
        let size = self.channel.estimate_size(&msg);
        outbound.add_message(msg, size, promise);
    }

    /// 标记已挂入的条目并交给传输层写出。
    pub fn flush(&self) {
        let Some(outbound) = self.channel.outbound_buffer() else {
            return;
        };
        outbound.add_flush();
        self.flush0(&outbound);
    }

    fn flush0(&self, outbound: &OutboundBuffer) {
        let inner = self.inner();
        if outbound.is_empty() || inner.in_flush.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.channel.is_active() {
            if self.channel.is_open() {
                outbound.fail_flushed(
                    CoreError::new(
                        codes::CHANNEL_NOT_YET_CONNECTED,
                        "channel is not yet connected",
                    ),
                    true,
                );
            } else {
                outbound.fail_flushed(CoreError::channel_closed(), false);
            }
            inner.in_flush.store(false, Ordering::Release);
            return;
        }
        let written = self.transport().do_write(outbound);
        inner.in_flush.store(false, Ordering::Release);
        if let Err(error) = written {
            warn!(
                channel.id = %self.channel.id(),
                %error,
                "write failed; closing the channel"
            );
            outbound.fail_flushed(error, true);
            self.close(ChannelPromise::new());
        }
    }

    fn ensure_open(&self, promise: &ChannelPromise) -> bool {
        if self.channel.is_open() {
            return true;
        }
        promise.try_failure(CoreError::channel_closed());
        false
    }

    fn close_if_closed(&self) {
        if !self.channel.is_open() {
            self.close(ChannelPromise::new());
        }
    }

    /// 投递到事件循环末尾执行；未注册或循环已关闭时就地执行。
    ///
    /// 执行器拒绝任务时返回该错误，任务随之丢弃；携带承诺的调用方必须据此失败承诺。
    fn invoke_later<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&Channel) + Send + 'static,
    {
        let channel = self.channel.clone();
        match self.channel.event_loop() {
            Some(executor) if !executor.is_shutdown() => executor
                .execute(Box::new(move || task(&channel)))
                .inspect_err(|error| {
                    warn!(
                        channel.id = %self.channel.id(),
                        %error,
                        "a deferred channel task was rejected"
                    );
                }),
            _ => {
                task(&channel);
                Ok(())
            }
        }
    }
}

fn drain_closed_outbound(outbound: &OutboundBuffer) {
    outbound.fail_flushed(CoreError::channel_closed(), false);
    if let Err(error) = outbound.close(CoreError::channel_closed()) {
        debug!(%error, "outbound buffer still busy while closing");
    }
}
