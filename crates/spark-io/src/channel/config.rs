use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, codes};
use crate::runtime::config::duration_ms;

/// 默认高水位：64 KiB。
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;
/// 默认低水位：32 KiB。
pub const DEFAULT_LOW_WATER_MARK: usize = 32 * 1024;

/// 出站背压的高低水位。
///
/// # 契约（What）
/// - `low < high`；待写字节数 `>= high` 时通道变为不可写，`<= low` 时恢复可写。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterMarks {
    low: usize,
    high: usize,
}

impl WaterMarks {
    /// 构造水位；`low >= high` 返回 `channel.invalid_config`，相等时滞回区间为空。
    pub fn new(low: usize, high: usize) -> Result<Self> {
        if low >= high {
            return Err(CoreError::new(
                codes::CHANNEL_INVALID_CONFIG,
                format!("write buffer low water mark ({low}) must be below high water mark ({high})"),
            ));
        }
        Ok(Self { low, high })
    }

    /// 低水位。
    pub fn low(&self) -> usize {
        self.low
    }

    /// 高水位。
    pub fn high(&self) -> usize {
        self.high
    }
}

impl Default for WaterMarks {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_WATER_MARK,
            high: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// 通道配置。
///
/// # 设计背景（Why）
/// - 配置由外部装配代码（引导器、配置文件）填充，核心组件只读取；因此字段公开以便反序列化，
///   但运行中修改必须走校验过的 setter，避免出现低水位高于高水位的中间状态。
///
/// # 契约（What）
/// - TOML 中 `connect_timeout_ms = 0` 表示不设连接超时。
/// - 反序列化后调用 [`ChannelConfig::validate`] 校验；[`Channel`](super::Channel) 构造时同样会校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// 待写字节数到达该值后通道不可写。
    pub write_buffer_high_water_mark: usize,
    /// 待写字节数回落到该值后通道恢复可写。
    pub write_buffer_low_water_mark: usize,
    /// 单次读循环最多读取的消息数。
    pub max_messages_per_read: usize,
    /// 连接超时。
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// 激活后与每批读取完成后是否自动发起下一次读。
    pub auto_read: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            write_buffer_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            write_buffer_low_water_mark: DEFAULT_LOW_WATER_MARK,
            max_messages_per_read: 16,
            connect_timeout: Duration::from_secs(30),
            auto_read: true,
        }
    }
}

impl ChannelConfig {
    /// 校验字段组合。
    pub fn validate(&self) -> Result<()> {
        self.water_marks()?;
        if self.max_messages_per_read == 0 {
            return Err(CoreError::new(
                codes::CHANNEL_INVALID_CONFIG,
                "max_messages_per_read must be greater than zero",
            ));
        }
        Ok(())
    }

    /// 当前水位。
    pub fn water_marks(&self) -> Result<WaterMarks> {
        WaterMarks::new(
            self.write_buffer_low_water_mark,
            self.write_buffer_high_water_mark,
        )
    }

    /// 同时设置高低水位。
    pub fn set_water_marks(&mut self, marks: WaterMarks) {
        self.write_buffer_low_water_mark = marks.low();
        self.write_buffer_high_water_mark = marks.high();
    }

    /// 设置高水位；不高于当前低水位时拒绝。
    pub fn set_write_buffer_high_water_mark(&mut self, high: usize) -> Result<()> {
        let marks = WaterMarks::new(self.write_buffer_low_water_mark, high)?;
        self.set_water_marks(marks);
        Ok(())
    }

    /// 设置低水位；不低于当前高水位时拒绝。
    pub fn set_write_buffer_low_water_mark(&mut self, low: usize) -> Result<()> {
        let marks = WaterMarks::new(low, self.write_buffer_high_water_mark)?;
        self.set_water_marks(marks);
        Ok(())
    }

    /// 设置单次读循环的消息上限。
    pub fn set_max_messages_per_read(&mut self, max: usize) -> Result<()> {
        if max == 0 {
            return Err(CoreError::new(
                codes::CHANNEL_INVALID_CONFIG,
                "max_messages_per_read must be greater than zero",
            ));
        }
        self.max_messages_per_read = max;
        Ok(())
    }

    /// 设置连接超时，`Duration::ZERO` 表示不超时。
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// 设置自动读。
    pub fn set_auto_read(&mut self, auto_read: bool) {
        self.auto_read = auto_read;
    }
}

/// 单次读循环的预算。
///
/// 传输层在读循环中每交付一条消息调用 [`ReadBudget::record_message`]，
/// 直到 [`ReadBudget::should_continue`] 返回 `false` 再触发 `channel_read_complete`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBudget {
    max_messages: usize,
    messages: usize,
}

impl ReadBudget {
    /// 以最多 `max_messages` 条消息创建。
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            messages: 0,
        }
    }

    /// 记录一条已交付的消息。
    pub fn record_message(&mut self) {
        self.messages = self.messages.saturating_add(1);
    }

    /// 本轮已交付的消息数。
    pub fn messages(&self) -> usize {
        self.messages
    }

    /// 是否还能继续读取。
    pub fn should_continue(&self) -> bool {
        self.messages < self.max_messages
    }
}
