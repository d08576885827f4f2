use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, codes};

/// 事件循环配置。
///
/// 时长字段在 TOML 中以毫秒整数表示，例如：
///
/// ```toml
/// thread_name_prefix = "io"
/// quiet_period_ms = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// 工作线程名前缀，实际名称为 `<prefix>-<index>`。
    pub thread_name_prefix: String,
    /// 连续执行多少个任务后检查一次时间预算。
    pub breakout_interval: usize,
    /// 单轮排空即时任务的时间预算，超出后让出给定时任务与关闭检查。
    #[serde(rename = "max_task_burst_ms", with = "duration_ms")]
    pub max_task_burst: Duration,
    /// 优雅关闭的默认静默期。
    #[serde(rename = "quiet_period_ms", with = "duration_ms")]
    pub quiet_period: Duration,
    /// 优雅关闭的默认硬超时。
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "spark-io-loop".to_owned(),
            breakout_interval: 64,
            max_task_burst: Duration::from_millis(50),
            quiet_period: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

impl EventLoopConfig {
    /// 校验字段取值。
    pub fn validate(&self) -> Result<()> {
        if self.breakout_interval == 0 {
            return Err(CoreError::new(
                codes::INVALID_ARGUMENT,
                "breakout_interval must be greater than zero",
            ));
        }
        if self.quiet_period > self.shutdown_timeout {
            return Err(CoreError::new(
                codes::INVALID_ARGUMENT,
                format!(
                    "quiet period ({:?}) must not exceed shutdown timeout ({:?})",
                    self.quiet_period, self.shutdown_timeout
                ),
            ));
        }
        Ok(())
    }
}

/// 以毫秒整数（反）序列化 `Duration`。
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
