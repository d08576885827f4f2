use std::net::SocketAddr;

use super::{Channel, OutboundBuffer};
use crate::error::Result;

/// `do_connect` 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// 连接已立即建立。
    Connected,
    /// 连接进行中，传输层稍后调用 [`Channel::finish_connect`] 报告结果。
    Pending,
}

/// 传输层契约：真正执行 I/O 的不透明句柄。
///
/// # 设计背景（Why）
/// - 核心只负责状态机、承诺与事件传播；套接字、内存管道等具体 I/O 由实现者提供。
///
/// # 契约（What）
/// - 所有 `do_*` 方法只会在通道所属的事件循环线程上调用（`is_*` 与地址查询除外）。
/// - `do_write` 应按 FIFO 消费 [`OutboundBuffer`] 中的已冲刷条目：全部写出时调用
///   `remove`，部分写出时调用 `remove_bytes`，写不动时直接返回等待下一次冲刷。
/// - 返回的错误会失败对应操作的承诺；`do_write` 失败时核心会失败全部已冲刷条目并关闭通道。
pub trait ChannelTransport: Send + Sync + 'static {
    /// 底层资源是否仍然打开。
    fn is_open(&self) -> bool;

    /// 是否处于可收发状态（已绑定或已连接）。
    fn is_active(&self) -> bool;

    /// 本地地址。
    fn local_address(&self) -> Option<SocketAddr> {
        None
    }

    /// 对端地址。
    fn remote_address(&self) -> Option<SocketAddr> {
        None
    }

    /// 注册到事件循环时调用，传输层可在此保存通道句柄以便回调。
    fn do_register(&self, _channel: &Channel) -> Result<()> {
        Ok(())
    }

    /// 绑定本地地址。
    fn do_bind(&self, local: SocketAddr) -> Result<()>;

    /// 发起连接。
    fn do_connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> Result<ConnectOutcome>;

    /// 断开连接。
    fn do_disconnect(&self) -> Result<()>;

    /// 关闭底层资源。
    fn do_close(&self) -> Result<()>;

    /// 从事件循环注销时调用。
    fn do_deregister(&self) -> Result<()> {
        Ok(())
    }

    /// 请求读取；读到的数据通过 [`Channel::fire_channel_read`] 交付。
    fn do_begin_read(&self) -> Result<()>;

    /// 消费已冲刷的出站条目。
    fn do_write(&self, outbound: &OutboundBuffer) -> Result<()>;
}
