//! 统一错误模型。
//!
//! # 设计背景（Why）
//! - 缓冲、流水线、执行器与出站队列的失败需要沿同一条通道传播：同步误用立即以 `Err` 返回，
//!   异步失败则写入 [`Promise`](crate::runtime::Promise)。两者共享 [`CoreError`]，
//!   调用方只需按稳定错误码分支即可。
//! - 同一个失败常常需要完成多个承诺（例如关闭时批量失败所有待写条目），因此错误必须可克隆，
//!   底层原因以 `Arc` 共享。
//!
//! # 契约（What）
//! - 错误码遵循 `<领域>.<语义>` 约定，集中定义在 [`codes`] 中，一经发布不得修改字面值。
//! - [`Result`] 为 crate 级别别名，默认错误类型为 [`CoreError`]。

use std::{borrow::Cow, error::Error, fmt, sync::Arc};

use thiserror::Error;

/// crate 级结果别名。
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// 可共享的底层原因。
///
/// 将 `Arc<dyn Error>` 包装为具名类型，使 [`CoreError`] 在保持 `Clone` 的同时仍能通过
/// `source()` 暴露完整错误链。
#[derive(Clone)]
pub struct ErrorCause(Arc<dyn Error + Send + Sync + 'static>);

impl ErrorCause {
    /// 以任意错误构造原因。
    pub fn new(cause: impl Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(cause))
    }

    /// 访问底层错误对象。
    pub fn get(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for ErrorCause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// 核心错误：稳定错误码 + 人类可读描述 + 可选底层原因。
///
/// # 契约（What）
/// - `code` 必须取自 [`codes`]；`message` 面向排障人员，不包含敏感数据。
/// - `Display` 渲染为 `[code] message`，便于日志检索。
/// - 克隆只复制引用计数，不会复制底层原因。
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    #[source]
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// ```rust
    /// use spark_io::error::{codes, CoreError};
    ///
    /// let err = CoreError::new(codes::CHANNEL_CLOSED, "channel closed");
    /// assert_eq!(err.code(), codes::CHANNEL_CLOSED);
    /// assert_eq!(err.to_string(), "[channel.closed] channel closed");
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(ErrorCause::new(cause));
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 判断错误码是否匹配。
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    pub(crate) fn index_out_of_bounds(index: usize, length: usize, capacity: usize) -> Self {
        Self::new(
            codes::BUFFER_INDEX_OUT_OF_BOUNDS,
            format!("index: {index}, length: {length} (expected: range(0, {capacity}))"),
        )
    }

    pub(crate) fn illegal_reference_count(ref_cnt: i32, delta: i32) -> Self {
        Self::new(
            codes::BUFFER_ILLEGAL_REFERENCE_COUNT,
            format!("refCnt: {ref_cnt}, delta: {delta}"),
        )
    }

    pub(crate) fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::INVALID_ARGUMENT, message)
    }

    pub(crate) fn channel_closed() -> Self {
        Self::new(codes::CHANNEL_CLOSED, "channel is closed")
    }

    pub(crate) fn rejected(executor: &str) -> Self {
        Self::new(
            codes::RUNTIME_REJECTED,
            format!("executor `{executor}` no longer accepts tasks"),
        )
    }
}

/// 稳定错误码表。
///
/// # 命名约定
/// - `<领域>.<语义>`，领域取 `buffer`、`pipeline`、`channel`、`outbound`、`runtime`、`promise`。
/// - 新增错误码只能追加，已发布的字面值不可变更。
pub mod codes {
    /// 绝对或相对访问越过了 `[0, capacity)` 或可读区间。
    pub const BUFFER_INDEX_OUT_OF_BOUNDS: &str = "buffer.index_out_of_bounds";
    /// 引用计数非法：访问已释放缓冲、对 0 计数 retain、溢出或过度 release。
    pub const BUFFER_ILLEGAL_REFERENCE_COUNT: &str = "buffer.illegal_reference_count";
    /// 扩容需求超过 `max_capacity`。
    pub const BUFFER_CAPACITY_EXCEEDED: &str = "buffer.capacity_exceeded";
    /// 缓冲内容不是合法 UTF-8。
    pub const BUFFER_INVALID_UTF8: &str = "buffer.invalid_utf8";
    /// 参数不满足前置条件（负向索引关系、初始容量大于上限等）。
    pub const INVALID_ARGUMENT: &str = "core.invalid_argument";
    /// 处理器回调返回 `Err`。
    pub const PIPELINE_HANDLER_FAILED: &str = "pipeline.handler_failed";
    /// 处理器回调发生 panic。
    pub const PIPELINE_HANDLER_PANICKED: &str = "pipeline.handler_panicked";
    /// 处理器名称在流水线内重复。
    pub const PIPELINE_DUPLICATE_NAME: &str = "pipeline.duplicate_name";
    /// 按名称、实例或类型查找处理器失败。
    pub const PIPELINE_NO_SUCH_HANDLER: &str = "pipeline.no_such_handler";
    /// 通道已关闭，写入或 I/O 操作无法执行。
    pub const CHANNEL_CLOSED: &str = "channel.closed";
    /// 通道尚未建立连接，无法冲刷。
    pub const CHANNEL_NOT_YET_CONNECTED: &str = "channel.not_yet_connected";
    /// 通道重复注册到事件循环。
    pub const CHANNEL_ALREADY_REGISTERED: &str = "channel.already_registered";
    /// 已存在进行中的连接请求。
    pub const CHANNEL_CONNECTION_PENDING: &str = "channel.connection_pending";
    /// 连接未能在超时前完成。
    pub const CHANNEL_CONNECT_TIMEOUT: &str = "channel.connect_timeout";
    /// 通道配置非法（例如低水位高于高水位）。
    pub const CHANNEL_INVALID_CONFIG: &str = "channel.invalid_config";
    /// 传输层执行 I/O 失败。
    pub const CHANNEL_IO: &str = "channel.io";
    /// 仍存在已冲刷条目时关闭出站缓冲。
    pub const OUTBOUND_CLOSE_WHILE_FLUSHING: &str = "outbound.close_while_flushing";
    /// 执行器已关闭，拒绝新任务。
    pub const RUNTIME_REJECTED: &str = "runtime.rejected";
    /// 任务执行期间 panic。
    pub const RUNTIME_TASK_PANICKED: &str = "runtime.task_panicked";
    /// 承诺被取消。
    pub const PROMISE_CANCELLED: &str = "promise.cancelled";
    /// 承诺已完成，不可再次完成。
    pub const PROMISE_ALREADY_COMPLETED: &str = "promise.already_completed";
}

/// 将 panic 负载转换为可读描述。
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
