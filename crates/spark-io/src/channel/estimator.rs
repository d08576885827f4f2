use crate::buffer::PipelineMessage;

/// 估算消息占用的待写字节数，用于背压记账。
pub trait MessageSizeEstimator: Send + Sync + 'static {
    /// 估算 `message` 的大小。
    fn size(&self, message: &PipelineMessage) -> usize;
}

/// 默认估算器：缓冲取可读字节数，业务消息取固定值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultMessageSizeEstimator {
    unknown_size: usize,
}

impl DefaultMessageSizeEstimator {
    /// 业务消息的默认估值。
    pub const DEFAULT_UNKNOWN_SIZE: usize = 8;

    /// 以指定的业务消息估值创建。
    pub fn new(unknown_size: usize) -> Self {
        Self { unknown_size }
    }
}

impl Default for DefaultMessageSizeEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_UNKNOWN_SIZE)
    }
}

impl MessageSizeEstimator for DefaultMessageSizeEstimator {
    fn size(&self, message: &PipelineMessage) -> usize {
        match message.as_buffer() {
            Some(buf) => buf.readable_bytes(),
            None => self.unknown_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Unpooled;

    #[test]
    fn buffers_use_readable_bytes() {
        let estimator = DefaultMessageSizeEstimator::default();
        let message = PipelineMessage::from(Unpooled::copied_buffer(b"hello"));
        assert_eq!(estimator.size(&message), 5);
        assert_eq!(estimator.size(&PipelineMessage::user("text")), 8);
        assert_eq!(
            DefaultMessageSizeEstimator::new(0).size(&PipelineMessage::user(1_u8)),
            0
        );
    }
}
