use serde::{Deserialize, Serialize};

/// 多字节数值在缓冲中的字节序。
///
/// 字节序是单个缓冲（或其派生视图）的属性，不是帧协议：同一块存储可以同时存在大端视图与
/// 小端视图，二者共享索引语义与引用计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// 网络字节序，缓冲默认值。
    #[default]
    BigEndian,
    /// 小端序。
    LittleEndian,
}

impl ByteOrder {
    /// 当前平台的本机字节序。
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::BigEndian
        } else {
            Self::LittleEndian
        }
    }
}
