use std::{any::Any, fmt};

use super::{ByteBuf, ReferenceCounted};
use crate::error::Result;

/// 在流水线中流动的消息。
///
/// # 设计背景（Why）
/// - 同一条流水线既要搬运传输层的字节，也要搬运解码后的业务对象，
///   因此以枚举区分两类载荷，业务对象通过 `Any` 在运行时下转型。
///
/// # 契约（What）
/// - `Buffer` 变体持有一个 [`ByteBuf`] 引用：消费它的处理器负责 `release`，或把它继续传递。
/// - `User` 变体不参与引用计数，`retain`/`release` 对其为空操作。
/// - `Debug` 不输出载荷内容，避免在日志中泄漏数据。
pub enum PipelineMessage {
    /// 字节缓冲。
    Buffer(ByteBuf),
    /// 业务消息。
    User(Box<dyn Any + Send>),
}

impl PipelineMessage {
    /// 以任意业务对象构造消息。
    pub fn user<T: Any + Send>(value: T) -> Self {
        Self::User(Box::new(value))
    }

    /// 借用字节缓冲。
    pub fn as_buffer(&self) -> Option<&ByteBuf> {
        match self {
            Self::Buffer(buf) => Some(buf),
            Self::User(_) => None,
        }
    }

    /// 可变借用字节缓冲。
    pub fn as_buffer_mut(&mut self) -> Option<&mut ByteBuf> {
        match self {
            Self::Buffer(buf) => Some(buf),
            Self::User(_) => None,
        }
    }

    /// 取出字节缓冲；若为业务消息则原样返还。
    pub fn into_buffer(self) -> Result<ByteBuf, Self> {
        match self {
            Self::Buffer(buf) => Ok(buf),
            other => Err(other),
        }
    }

    /// 借用指定类型的业务消息。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::User(value) => value.downcast_ref::<T>(),
            Self::Buffer(_) => None,
        }
    }

    /// 取出指定类型的业务消息；类型不匹配时原样返还。
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::User(value) => value.downcast::<T>().map(|boxed| *boxed).map_err(Self::User),
            other => Err(other),
        }
    }
}

impl From<ByteBuf> for PipelineMessage {
    fn from(buf: ByteBuf) -> Self {
        Self::Buffer(buf)
    }
}

impl ReferenceCounted for PipelineMessage {
    fn ref_cnt(&self) -> i32 {
        match self {
            Self::Buffer(buf) => buf.ref_cnt(),
            Self::User(_) => 1,
        }
    }

    fn retain_n(&self, increment: i32) -> Result<()> {
        match self {
            Self::Buffer(buf) => buf.retain_n(increment),
            Self::User(_) => Ok(()),
        }
    }

    fn release_n(&self, decrement: i32) -> Result<bool> {
        match self {
            Self::Buffer(buf) => buf.release_n(decrement),
            Self::User(_) => Ok(false),
        }
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buf) => f
                .debug_tuple("Buffer")
                .field(&buf.readable_bytes())
                .finish(),
            Self::User(_) => f.debug_tuple("User").field(&"<erased-user>").finish(),
        }
    }
}
