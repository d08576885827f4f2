use std::{fmt, ops::BitOr};

/// 事件位集合，用于声明处理器不关心的事件。
///
/// 传播时遇到跳过位包含当前事件的上下文会直接越过，不做任何调用。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    /// 空集合。
    pub const NONE: Self = Self(0);

    pub const CHANNEL_REGISTERED: Self = Self(1 << 0);
    pub const CHANNEL_UNREGISTERED: Self = Self(1 << 1);
    pub const CHANNEL_ACTIVE: Self = Self(1 << 2);
    pub const CHANNEL_INACTIVE: Self = Self(1 << 3);
    pub const CHANNEL_READ: Self = Self(1 << 4);
    pub const CHANNEL_READ_COMPLETE: Self = Self(1 << 5);
    pub const WRITABILITY_CHANGED: Self = Self(1 << 6);
    pub const USER_EVENT: Self = Self(1 << 7);
    pub const EXCEPTION_CAUGHT: Self = Self(1 << 8);

    pub const BIND: Self = Self(1 << 9);
    pub const CONNECT: Self = Self(1 << 10);
    pub const DISCONNECT: Self = Self(1 << 11);
    pub const CLOSE: Self = Self(1 << 12);
    pub const DEREGISTER: Self = Self(1 << 13);
    pub const READ: Self = Self(1 << 14);
    pub const WRITE: Self = Self(1 << 15);
    pub const FLUSH: Self = Self(1 << 16);

    /// 全部入站事件。
    pub const INBOUND: Self = Self(0x1ff);
    /// 全部出站事件。
    pub const OUTBOUND: Self = Self(0xff << 9);

    /// 原始位。
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// 并集。
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// 是否包含 `other` 的全部位。
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 是否为空。
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventMask({:#07x})", self.0)
    }
}
