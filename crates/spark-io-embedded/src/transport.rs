use std::{
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use spark_io::{
    buffer::{PipelineMessage, safe_release},
    channel::{Channel, ChannelTransport, ConnectOutcome, OutboundBuffer},
    error::{CoreError, Result},
};

/// 内存传输：写出的消息原样收集，不做任何字节拷贝。
///
/// # 契约（What）
/// - `do_write` 在可写时按 FIFO 取走全部已冲刷条目并成功完成其承诺；
///   [`EmbeddedTransport::set_writable`] 关闭后条目留在出站队列中，用于模拟写不动的套接字。
/// - 连接行为由 [`EmbeddedTransport::set_connect_outcome`] 决定；`Pending` 时需调用
///   [`EmbeddedTransport::complete_connect`] 再由通道的 `finish_connect` 报告结果。
pub struct EmbeddedTransport {
    open: AtomicBool,
    active: AtomicBool,
    writable: AtomicBool,
    read_requests: AtomicUsize,
    connect_outcome: Mutex<ConnectOutcome>,
    fail_next_write: Mutex<Option<CoreError>>,
    local: Mutex<Option<SocketAddr>>,
    remote: Mutex<Option<SocketAddr>>,
    written: Mutex<VecDeque<PipelineMessage>>,
}

impl EmbeddedTransport {
    /// 创建已活跃的传输。
    pub fn new() -> Self {
        Self::with_active(true)
    }

    /// 创建尚未绑定或连接的传输。
    pub fn inactive() -> Self {
        Self::with_active(false)
    }

    fn with_active(active: bool) -> Self {
        Self {
            open: AtomicBool::new(true),
            active: AtomicBool::new(active),
            writable: AtomicBool::new(true),
            read_requests: AtomicUsize::new(0),
            connect_outcome: Mutex::new(ConnectOutcome::Connected),
            fail_next_write: Mutex::new(None),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            written: Mutex::new(VecDeque::new()),
        }
    }

    /// 设置后续 `do_connect` 的结果。
    pub fn set_connect_outcome(&self, outcome: ConnectOutcome) {
        *self.connect_outcome.lock() = outcome;
    }

    /// 让进行中的连接在传输层面完成；随后应调用 [`Channel::finish_connect`]。
    pub fn complete_connect(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// 切换写出能力。
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }

    /// 让下一次 `do_write` 以 `error` 失败。
    pub fn fail_next_write(&self, error: CoreError) {
        *self.fail_next_write.lock() = Some(error);
    }

    /// 模拟对端关闭：底层资源不再打开，也不再活跃。
    pub fn shutdown_remote(&self) {
        self.active.store(false, Ordering::Release);
        self.open.store(false, Ordering::Release);
    }

    /// `do_begin_read` 被调用的次数。
    pub fn read_requests(&self) -> usize {
        self.read_requests.load(Ordering::Acquire)
    }

    /// 取走最早写出的消息。
    pub fn take_written(&self) -> Option<PipelineMessage> {
        self.written.lock().pop_front()
    }

    /// 已写出且尚未取走的消息数。
    pub fn written_len(&self) -> usize {
        self.written.lock().len()
    }

    /// 释放全部已写出的消息，返回释放的条数。
    pub fn release_written(&self) -> usize {
        let drained: Vec<PipelineMessage> = self.written.lock().drain(..).collect();
        for msg in &drained {
            safe_release(msg);
        }
        drained.len()
    }
}

impl Default for EmbeddedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport for EmbeddedTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        self.is_open() && self.active.load(Ordering::Acquire)
    }

    fn local_address(&self) -> Option<SocketAddr> {
        *self.local.lock()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote.lock()
    }

    fn do_register(&self, _channel: &Channel) -> Result<()> {
        Ok(())
    }

    fn do_bind(&self, local: SocketAddr) -> Result<()> {
        *self.local.lock() = Some(local);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn do_connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<ConnectOutcome> {
        if let Some(local) = local {
            *self.local.lock() = Some(local);
        }
        *self.remote.lock() = Some(remote);
        let outcome = *self.connect_outcome.lock();
        if outcome == ConnectOutcome::Connected {
            self.active.store(true, Ordering::Release);
        }
        Ok(outcome)
    }

    fn do_disconnect(&self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    fn do_close(&self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn do_begin_read(&self) -> Result<()> {
        self.read_requests.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn do_write(&self, outbound: &OutboundBuffer) -> Result<()> {
        if let Some(error) = self.fail_next_write.lock().take() {
            return Err(error);
        }
        if !self.writable.load(Ordering::Acquire) {
            return Ok(());
        }
        while let Some(msg) = outbound.remove_message() {
            self.written.lock().push_back(msg);
        }
        Ok(())
    }
}

impl fmt::Debug for EmbeddedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedTransport")
            .field("open", &self.is_open())
            .field("active", &self.is_active())
            .field("written", &self.written_len())
            .finish()
    }
}
