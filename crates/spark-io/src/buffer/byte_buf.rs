use std::{fmt, mem, sync::Arc};

use bytes::{Bytes, BytesMut};

use super::{
    ByteOrder, CapacityPolicy, ReferenceCounted,
    storage::{BufferRecycler, Storage},
};
use crate::error::{CoreError, Result, codes};

/// 视图形态：根视图（含其复制视图）共享并可扩展存储；切片视图容量固定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Root,
    Slice { offset: usize, length: usize },
}

/// 引用计数的字节缓冲。
///
/// # 设计背景（Why）
/// - 读写双游标模型让同一块内存先被写入、再被逐段读取，无需在解码与编码之间来回复制。
/// - 手工引用计数让缓冲在处理器之间移交所有权时语义清晰：谁最后消费，谁负责 `release`。
///
/// # 契约（What）
/// - 任何时刻满足 `0 ≤ reader_index ≤ writer_index ≤ capacity ≤ max_capacity`。
/// - `get_*`/`set_*` 为绝对访问，要求 `index + size ≤ capacity`，不移动游标；
///   `read_*` 要求 `readable_bytes ≥ size`，`write_*` 先 `ensure_writable(size)`。
/// - 派生视图（[`slice`](Self::slice)、[`duplicate`](Self::duplicate)、
///   [`with_order`](Self::with_order)）共享存储与引用计数，但拥有独立的游标与标记。
/// - 计数归零后，任何访问都返回 `buffer.illegal_reference_count`。
///
/// # 线程模型
/// - 句柄为 `Send`：游标状态同一时刻只属于一个线程，因此游标修改需要 `&mut self`。
/// - `retain`/`release` 只需 `&self`，可在任意线程无锁调用。
pub struct ByteBuf {
    storage: Arc<Storage>,
    view: View,
    reader_index: usize,
    writer_index: usize,
    marked_reader_index: usize,
    marked_writer_index: usize,
    order: ByteOrder,
}

macro_rules! primitive_accessors {
    ($($ty:ty => $get:ident, $set:ident, $read:ident, $write:ident;)*) => {
        $(
            #[doc = concat!("按当前字节序读取绝对位置上的 `", stringify!($ty), "`。")]
            pub fn $get(&self, index: usize) -> Result<$ty> {
                let mut raw = [0_u8; mem::size_of::<$ty>()];
                self.get_bytes(index, &mut raw)?;
                Ok(match self.order {
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                })
            }

            #[doc = concat!("按当前字节序写入绝对位置上的 `", stringify!($ty), "`。")]
            pub fn $set(&mut self, index: usize, value: $ty) -> Result<()> {
                let raw = match self.order {
                    ByteOrder::BigEndian => value.to_be_bytes(),
                    ByteOrder::LittleEndian => value.to_le_bytes(),
                };
                self.set_bytes(index, &raw)
            }

            #[doc = concat!("读取 `", stringify!($ty), "` 并推进读游标。")]
            pub fn $read(&mut self) -> Result<$ty> {
                let size = mem::size_of::<$ty>();
                self.check_readable(size)?;
                let value = self.$get(self.reader_index)?;
                self.reader_index += size;
                Ok(value)
            }

            #[doc = concat!("写入 `", stringify!($ty), "` 并推进写游标，必要时扩容。")]
            pub fn $write(&mut self, value: $ty) -> Result<()> {
                let size = mem::size_of::<$ty>();
                self.ensure_writable(size)?;
                self.$set(self.writer_index, value)?;
                self.writer_index += size;
                Ok(())
            }
        )*
    };
}

impl ByteBuf {
    pub(crate) fn from_storage(storage: Arc<Storage>, writer_index: usize) -> Self {
        Self {
            storage,
            view: View::Root,
            reader_index: 0,
            writer_index,
            marked_reader_index: 0,
            marked_writer_index: 0,
            order: ByteOrder::BigEndian,
        }
    }

    /// 以外部提供的内存块构造根缓冲，供自定义分配器使用。
    ///
    /// `bytes.len()` 即初始容量，游标为 0，计数为 1；`recycler` 会收到创建、容量调整与回收通知。
    pub fn with_storage(
        bytes: BytesMut,
        max_capacity: usize,
        policy: Arc<dyn CapacityPolicy>,
        recycler: Option<Arc<dyn BufferRecycler>>,
    ) -> Result<Self> {
        super::allocator::validate(bytes.len(), max_capacity)?;
        let storage = Storage::new(bytes, max_capacity, policy, recycler);
        Ok(Self::from_storage(Arc::new(storage), 0))
    }

    /// 进程级共享空缓冲：容量与上限均为 0，引用计数操作为空操作。
    pub fn empty() -> Self {
        Self::from_storage(Storage::shared_empty(), 0)
    }

    /// 是否为共享空缓冲。
    pub fn is_shared_empty(&self) -> bool {
        self.storage.is_shared_empty()
    }

    fn offset(&self) -> usize {
        match self.view {
            View::Root => 0,
            View::Slice { offset, .. } => offset,
        }
    }

    /// 当前容量。
    pub fn capacity(&self) -> usize {
        match self.view {
            View::Root => self.storage.capacity(),
            View::Slice { length, .. } => length,
        }
    }

    /// 容量上限；切片视图的上限等于其长度。
    pub fn max_capacity(&self) -> usize {
        match self.view {
            View::Root => self.storage.max_capacity(),
            View::Slice { length, .. } => length,
        }
    }

    /// 字节序。
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// 读游标。
    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    /// 写游标。
    pub fn writer_index(&self) -> usize {
        self.writer_index
    }

    /// `writer_index - reader_index`。
    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    /// `capacity - writer_index`。
    pub fn writable_bytes(&self) -> usize {
        self.capacity().saturating_sub(self.writer_index)
    }

    /// `max_capacity - writer_index`。
    pub fn max_writable_bytes(&self) -> usize {
        self.max_capacity().saturating_sub(self.writer_index)
    }

    /// 是否存在可读字节。
    pub fn is_readable(&self) -> bool {
        self.writer_index > self.reader_index
    }

    /// 是否至少有 `size` 个可读字节。
    pub fn is_readable_n(&self, size: usize) -> bool {
        self.readable_bytes() >= size
    }

    /// 不扩容的前提下是否还能写入。
    pub fn is_writable(&self) -> bool {
        self.writable_bytes() > 0
    }

    /// 不扩容的前提下是否还能写入 `size` 个字节。
    pub fn is_writable_n(&self, size: usize) -> bool {
        self.writable_bytes() >= size
    }

    /// 设置读游标，要求 `index ≤ writer_index`。
    pub fn set_reader_index(&mut self, index: usize) -> Result<()> {
        if index > self.writer_index {
            return Err(CoreError::new(
                codes::BUFFER_INDEX_OUT_OF_BOUNDS,
                format!(
                    "readerIndex: {index} (expected: 0 <= readerIndex <= writerIndex({}))",
                    self.writer_index
                ),
            ));
        }
        self.reader_index = index;
        Ok(())
    }

    /// 设置写游标，要求 `reader_index ≤ index ≤ capacity`。
    pub fn set_writer_index(&mut self, index: usize) -> Result<()> {
        let capacity = self.capacity();
        if index < self.reader_index || index > capacity {
            return Err(CoreError::new(
                codes::BUFFER_INDEX_OUT_OF_BOUNDS,
                format!(
                    "writerIndex: {index} (expected: readerIndex({}) <= writerIndex <= capacity({capacity}))",
                    self.reader_index
                ),
            ));
        }
        self.writer_index = index;
        Ok(())
    }

    /// 同时设置两个游标，要求 `0 ≤ reader ≤ writer ≤ capacity`。
    pub fn set_index(&mut self, reader_index: usize, writer_index: usize) -> Result<()> {
        let capacity = self.capacity();
        if reader_index > writer_index || writer_index > capacity {
            return Err(CoreError::new(
                codes::BUFFER_INDEX_OUT_OF_BOUNDS,
                format!(
                    "readerIndex: {reader_index}, writerIndex: {writer_index} (expected: 0 <= readerIndex <= writerIndex <= capacity({capacity}))"
                ),
            ));
        }
        self.reader_index = reader_index;
        self.writer_index = writer_index;
        Ok(())
    }

    /// 两个游标归零，不修改内容。
    pub fn clear(&mut self) {
        self.reader_index = 0;
        self.writer_index = 0;
    }

    /// 记录当前读游标。
    pub fn mark_reader_index(&mut self) {
        self.marked_reader_index = self.reader_index;
    }

    /// 回到标记的读游标。
    pub fn reset_reader_index(&mut self) -> Result<()> {
        self.set_reader_index(self.marked_reader_index)
    }

    /// 记录当前写游标。
    pub fn mark_writer_index(&mut self) {
        self.marked_writer_index = self.writer_index;
    }

    /// 回到标记的写游标。
    pub fn reset_writer_index(&mut self) -> Result<()> {
        self.set_writer_index(self.marked_writer_index)
    }

    fn ensure_accessible(&self) -> Result<()> {
        self.storage.ensure_accessible()
    }

    fn check_index(&self, index: usize, length: usize) -> Result<()> {
        self.ensure_accessible()?;
        let capacity = self.capacity();
        match index.checked_add(length) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(CoreError::index_out_of_bounds(index, length, capacity)),
        }
    }

    fn check_readable(&self, length: usize) -> Result<()> {
        self.ensure_accessible()?;
        if self.readable_bytes() < length {
            return Err(CoreError::new(
                codes::BUFFER_INDEX_OUT_OF_BOUNDS,
                format!(
                    "readerIndex({}) + length({length}) exceeds writerIndex({})",
                    self.reader_index, self.writer_index
                ),
            ));
        }
        Ok(())
    }

    /// 保证至少还能写入 `min_writable` 个字节，必要时按扩容策略增长。
    ///
    /// # 契约（What）
    /// - 已有足够空间时为空操作，重复调用幂等。
    /// - 需求超过 `max_capacity` 时返回 `buffer.capacity_exceeded`，缓冲保持不变。
    pub fn ensure_writable(&mut self, min_writable: usize) -> Result<()> {
        self.ensure_accessible()?;
        if min_writable <= self.writable_bytes() {
            return Ok(());
        }
        let max_capacity = self.max_capacity();
        let required = self
            .writer_index
            .checked_add(min_writable)
            .filter(|required| *required <= max_capacity)
            .ok_or_else(|| {
                CoreError::new(
                    codes::BUFFER_CAPACITY_EXCEEDED,
                    format!(
                        "writerIndex({}) + minWritableBytes({min_writable}) exceeds maxCapacity({max_capacity})",
                        self.writer_index
                    ),
                )
            })?;
        let new_capacity = self
            .storage
            .policy()
            .calculate_new_capacity(required, max_capacity)
            .clamp(required, max_capacity);
        self.adjust_capacity(new_capacity)
    }

    /// 直接调整容量。
    ///
    /// - 根视图可扩展或收缩共享存储，收缩时游标与标记被截断到新容量以内。
    /// - 还有其他视图共享存储时拒绝收缩（`core.invalid_argument`）：它们的游标无法同步截断。
    /// - 切片视图容量固定，只接受与当前长度相等的值。
    pub fn adjust_capacity(&mut self, new_capacity: usize) -> Result<()> {
        self.ensure_accessible()?;
        match self.view {
            View::Slice { length, .. } if new_capacity == length => Ok(()),
            View::Slice { length, .. } => Err(CoreError::invalid_argument(format!(
                "slice capacity is fixed at {length}, requested {new_capacity}"
            ))),
            View::Root => {
                let max_capacity = self.storage.max_capacity();
                if new_capacity > max_capacity {
                    return Err(CoreError::new(
                        codes::BUFFER_CAPACITY_EXCEEDED,
                        format!("newCapacity: {new_capacity} (expected: 0-{max_capacity})"),
                    ));
                }
                let shared_views = Arc::strong_count(&self.storage) - 1;
                if new_capacity < self.storage.capacity() && shared_views > 0 {
                    return Err(CoreError::invalid_argument(format!(
                        "cannot shrink to {new_capacity} while {shared_views} other view(s) share the storage"
                    )));
                }
                self.storage.resize(new_capacity);
                if new_capacity < self.writer_index {
                    self.writer_index = new_capacity;
                    self.reader_index = self.reader_index.min(new_capacity);
                    self.marked_reader_index = self.marked_reader_index.min(new_capacity);
                    self.marked_writer_index = self.marked_writer_index.min(new_capacity);
                }
                Ok(())
            }
        }
    }

    fn adjust_markers(&mut self, decrement: usize) {
        self.marked_reader_index = self.marked_reader_index.saturating_sub(decrement);
        self.marked_writer_index = self.marked_writer_index.saturating_sub(decrement);
    }

    /// 丢弃已读字节：未读内容前移到下标 0，游标与标记同步平移。
    pub fn discard_read_bytes(&mut self) -> Result<()> {
        self.ensure_accessible()?;
        let read = self.reader_index;
        if read == 0 {
            return Ok(());
        }
        if read != self.writer_index {
            self.move_to_front(read)?;
        }
        self.writer_index -= read;
        self.adjust_markers(read);
        self.reader_index = 0;
        Ok(())
    }

    /// 仅在值得时压缩：全部读完，或读游标越过容量一半。
    pub fn discard_some_read_bytes(&mut self) -> Result<()> {
        self.ensure_accessible()?;
        let read = self.reader_index;
        if read == 0 {
            return Ok(());
        }
        if read == self.writer_index {
            self.adjust_markers(read);
            self.reader_index = 0;
            self.writer_index = 0;
            return Ok(());
        }
        if read >= self.capacity() >> 1 {
            self.move_to_front(read)?;
            self.writer_index -= read;
            self.adjust_markers(read);
            self.reader_index = 0;
        }
        Ok(())
    }

    fn move_to_front(&mut self, read: usize) -> Result<()> {
        let base = self.offset();
        let end = base + self.writer_index;
        let mut bytes = self.storage.write();
        if end > bytes.len() {
            return Err(CoreError::index_out_of_bounds(
                self.reader_index,
                self.readable_bytes(),
                bytes.len().saturating_sub(base),
            ));
        }
        bytes.copy_within(base + read..end, base);
        Ok(())
    }

    /// 读取绝对位置的字节到 `dst`。
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.check_index(index, dst.len())?;
        let start = self.offset() + index;
        let bytes = self.storage.read();
        let src = bytes
            .get(start..start + dst.len())
            .ok_or_else(|| CoreError::index_out_of_bounds(index, dst.len(), bytes.len()))?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// 把 `src` 写入绝对位置。
    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.check_index(index, src.len())?;
        let start = self.offset() + index;
        let mut bytes = self.storage.write();
        let available = bytes.len();
        let dst = bytes
            .get_mut(start..start + src.len())
            .ok_or_else(|| CoreError::index_out_of_bounds(index, src.len(), available))?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// 把 `[index, index + length)` 清零。
    pub fn set_zero(&mut self, index: usize, length: usize) -> Result<()> {
        self.check_index(index, length)?;
        let start = self.offset() + index;
        let mut bytes = self.storage.write();
        let available = bytes.len();
        bytes
            .get_mut(start..start + length)
            .ok_or_else(|| CoreError::index_out_of_bounds(index, length, available))?
            .fill(0);
        Ok(())
    }

    /// 读取 `dst.len()` 个字节并推进读游标。
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_readable(dst.len())?;
        self.get_bytes(self.reader_index, dst)?;
        self.reader_index += dst.len();
        Ok(())
    }

    /// 读取 `length` 个字节到新的 `Vec`。
    pub fn read_to_vec(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut out = vec![0_u8; length];
        self.read_bytes(&mut out)?;
        Ok(out)
    }

    /// 跳过 `length` 个可读字节。
    pub fn skip_bytes(&mut self, length: usize) -> Result<()> {
        self.check_readable(length)?;
        self.reader_index += length;
        Ok(())
    }

    /// 追加 `src` 并推进写游标。
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        self.set_bytes(self.writer_index, src)?;
        self.writer_index += src.len();
        Ok(())
    }

    /// 从另一个缓冲转移 `length` 个可读字节，两侧游标同时推进。
    pub fn write_buf(&mut self, src: &mut ByteBuf, length: usize) -> Result<()> {
        src.check_readable(length)?;
        let mut chunk = vec![0_u8; length];
        src.get_bytes(src.reader_index, &mut chunk)?;
        self.write_bytes(&chunk)?;
        src.reader_index += length;
        Ok(())
    }

    /// 追加 `length` 个零字节。
    pub fn write_zero(&mut self, length: usize) -> Result<()> {
        self.ensure_writable(length)?;
        self.set_zero(self.writer_index, length)?;
        self.writer_index += length;
        Ok(())
    }

    primitive_accessors! {
        u8 => get_u8, set_u8, read_u8, write_u8;
        i8 => get_i8, set_i8, read_i8, write_i8;
        u16 => get_u16, set_u16, read_u16, write_u16;
        i16 => get_i16, set_i16, read_i16, write_i16;
        u32 => get_u32, set_u32, read_u32, write_u32;
        i32 => get_i32, set_i32, read_i32, write_i32;
        u64 => get_u64, set_u64, read_u64, write_u64;
        i64 => get_i64, set_i64, read_i64, write_i64;
        f32 => get_f32, set_f32, read_f32, write_f32;
        f64 => get_f64, set_f64, read_f64, write_f64;
    }

    /// 读取绝对位置的布尔值（非零即真）。
    pub fn get_bool(&self, index: usize) -> Result<bool> {
        Ok(self.get_u8(index)? != 0)
    }

    /// 写入布尔值（`1`/`0`）。
    pub fn set_bool(&mut self, index: usize, value: bool) -> Result<()> {
        self.set_u8(index, u8::from(value))
    }

    /// 读取布尔值并推进读游标。
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// 写入布尔值并推进写游标。
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// 读取一个 UTF-16 码元表示的字符；孤立代理项视为非法。
    pub fn get_char(&self, index: usize) -> Result<char> {
        let unit = self.get_u16(index)?;
        char::from_u32(u32::from(unit)).ok_or_else(|| {
            CoreError::invalid_argument(format!("0x{unit:04x} is an unpaired surrogate"))
        })
    }

    /// 写入单个 UTF-16 码元；基本多文种平面以外的字符无法用一个码元表示。
    pub fn set_char(&mut self, index: usize, value: char) -> Result<()> {
        let unit = u16::try_from(u32::from(value)).map_err(|_| {
            CoreError::invalid_argument(format!(
                "{value:?} does not fit in a single UTF-16 code unit"
            ))
        })?;
        self.set_u16(index, unit)
    }

    /// 读取字符并推进读游标。
    pub fn read_char(&mut self) -> Result<char> {
        self.check_readable(2)?;
        let value = self.get_char(self.reader_index)?;
        self.reader_index += 2;
        Ok(value)
    }

    /// 写入字符并推进写游标。
    pub fn write_char(&mut self, value: char) -> Result<()> {
        self.ensure_writable(2)?;
        self.set_char(self.writer_index, value)?;
        self.writer_index += 2;
        Ok(())
    }

    /// 读取 24 位无符号整数。
    pub fn get_unsigned_medium(&self, index: usize) -> Result<u32> {
        let mut raw = [0_u8; 3];
        self.get_bytes(index, &mut raw)?;
        let [a, b, c] = raw.map(u32::from);
        Ok(match self.order {
            ByteOrder::BigEndian => (a << 16) | (b << 8) | c,
            ByteOrder::LittleEndian => a | (b << 8) | (c << 16),
        })
    }

    /// 读取 24 位有符号整数（符号位扩展）。
    pub fn get_medium(&self, index: usize) -> Result<i32> {
        let value = self.get_unsigned_medium(index)?;
        Ok(((value << 8) as i32) >> 8)
    }

    /// 写入低 24 位。
    pub fn set_medium(&mut self, index: usize, value: i32) -> Result<()> {
        let value = value as u32;
        let raw = match self.order {
            ByteOrder::BigEndian => [(value >> 16) as u8, (value >> 8) as u8, value as u8],
            ByteOrder::LittleEndian => [value as u8, (value >> 8) as u8, (value >> 16) as u8],
        };
        self.set_bytes(index, &raw)
    }

    /// 读取 24 位有符号整数并推进读游标。
    pub fn read_medium(&mut self) -> Result<i32> {
        self.check_readable(3)?;
        let value = self.get_medium(self.reader_index)?;
        self.reader_index += 3;
        Ok(value)
    }

    /// 读取 24 位无符号整数并推进读游标。
    pub fn read_unsigned_medium(&mut self) -> Result<u32> {
        self.check_readable(3)?;
        let value = self.get_unsigned_medium(self.reader_index)?;
        self.reader_index += 3;
        Ok(value)
    }

    /// 写入 24 位整数并推进写游标。
    pub fn write_medium(&mut self, value: i32) -> Result<()> {
        self.ensure_writable(3)?;
        self.set_medium(self.writer_index, value)?;
        self.writer_index += 3;
        Ok(())
    }

    /// 在 `[from, to)` 中正向查找 `value`；`from > to` 时在 `[to, from)` 中反向查找。
    pub fn index_of(&self, from: usize, to: usize, value: u8) -> Option<usize> {
        self.ensure_accessible().ok()?;
        let capacity = self.capacity();
        let base = self.offset();
        let bytes = self.storage.read();
        if from <= to {
            let to = to.min(capacity);
            if from >= to {
                return None;
            }
            bytes
                .get(base + from..base + to)?
                .iter()
                .position(|byte| *byte == value)
                .map(|position| from + position)
        } else {
            let from = from.min(capacity);
            if to >= from {
                return None;
            }
            bytes
                .get(base + to..base + from)?
                .iter()
                .rposition(|byte| *byte == value)
                .map(|position| to + position)
        }
    }

    /// 从读游标起到 `value` 首次出现的距离。
    pub fn bytes_before(&self, value: u8) -> Option<usize> {
        self.index_of(self.reader_index, self.writer_index, value)
            .map(|index| index - self.reader_index)
    }

    /// 共享存储的切片视图：长度固定，游标为 `[0, length]`，不增加引用计数。
    pub fn slice(&self, index: usize, length: usize) -> Result<ByteBuf> {
        self.check_index(index, length)?;
        Ok(Self {
            storage: Arc::clone(&self.storage),
            view: View::Slice {
                offset: self.offset() + index,
                length,
            },
            reader_index: 0,
            writer_index: length,
            marked_reader_index: 0,
            marked_writer_index: 0,
            order: self.order,
        })
    }

    /// 可读区间的切片视图。
    pub fn readable_slice(&self) -> Result<ByteBuf> {
        self.slice(self.reader_index, self.readable_bytes())
    }

    /// 先 `retain` 再切片，返回的视图需单独 `release`。
    pub fn retained_slice(&self, index: usize, length: usize) -> Result<ByteBuf> {
        let slice = self.slice(index, length)?;
        self.storage.retain(1)?;
        Ok(slice)
    }

    /// 读取一段切片并推进读游标。
    pub fn read_slice(&mut self, length: usize) -> Result<ByteBuf> {
        self.check_readable(length)?;
        let slice = self.slice(self.reader_index, length)?;
        self.reader_index += length;
        Ok(slice)
    }

    /// 读取一段已 `retain` 的切片并推进读游标。
    pub fn read_retained_slice(&mut self, length: usize) -> Result<ByteBuf> {
        let slice = self.read_slice(length)?;
        self.storage.retain(1)?;
        Ok(slice)
    }

    /// 共享存储与计数的完整视图，复制当前游标与标记。
    pub fn duplicate(&self) -> Result<ByteBuf> {
        self.ensure_accessible()?;
        Ok(Self {
            storage: Arc::clone(&self.storage),
            view: self.view,
            reader_index: self.reader_index,
            writer_index: self.writer_index,
            marked_reader_index: self.marked_reader_index,
            marked_writer_index: self.marked_writer_index,
            order: self.order,
        })
    }

    /// 先 `retain` 再复制视图。
    pub fn retained_duplicate(&self) -> Result<ByteBuf> {
        let duplicate = self.duplicate()?;
        self.storage.retain(1)?;
        Ok(duplicate)
    }

    /// 指定字节序的视图；与当前字节序相同时等价于 [`duplicate`](Self::duplicate)。
    pub fn with_order(&self, order: ByteOrder) -> Result<ByteBuf> {
        let mut view = self.duplicate()?;
        view.order = order;
        Ok(view)
    }

    /// 复制 `[index, index + length)` 到独立缓冲，新缓冲计数为 1。
    pub fn copy(&self, index: usize, length: usize) -> Result<ByteBuf> {
        let mut data = vec![0_u8; length];
        self.get_bytes(index, &mut data)?;
        let storage = Storage::new(
            BytesMut::from(data.as_slice()),
            self.max_capacity().max(length),
            Arc::clone(self.storage.policy()),
            self.storage.recycler().cloned(),
        );
        let mut copy = Self::from_storage(Arc::new(storage), length);
        copy.order = self.order;
        Ok(copy)
    }

    /// 复制可读区间。
    pub fn copy_readable(&self) -> Result<ByteBuf> {
        self.copy(self.reader_index, self.readable_bytes())
    }

    /// 可读字节的副本。
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = vec![0_u8; self.readable_bytes()];
        self.get_bytes(self.reader_index, &mut out)?;
        Ok(out)
    }

    /// 可读字节按 UTF-8 解码。
    pub fn to_string_utf8(&self) -> Result<String> {
        String::from_utf8(self.to_vec()?).map_err(|error| {
            CoreError::new(codes::BUFFER_INVALID_UTF8, "readable bytes are not UTF-8")
                .with_cause(error)
        })
    }

    /// 可读字节的 `bytes::Bytes` 快照，用于与 `bytes` 生态互操作。
    pub fn copy_to_bytes(&self) -> Result<Bytes> {
        self.to_vec().map(Bytes::from)
    }

    /// 共享计数。
    pub fn ref_cnt(&self) -> i32 {
        self.storage.ref_cnt()
    }

    /// 增加共享计数。
    pub fn retain_n(&self, increment: i32) -> Result<()> {
        self.storage.retain(increment)
    }

    /// 增加 1。
    pub fn retain(&self) -> Result<()> {
        self.storage.retain(1)
    }

    /// 减少共享计数，返回是否触发存储归还。
    pub fn release_n(&self, decrement: i32) -> Result<bool> {
        self.storage.release(decrement)
    }

    /// 减少 1。
    pub fn release(&self) -> Result<bool> {
        self.storage.release(1)
    }
}

impl ReferenceCounted for ByteBuf {
    fn ref_cnt(&self) -> i32 {
        ByteBuf::ref_cnt(self)
    }

    fn retain_n(&self, increment: i32) -> Result<()> {
        ByteBuf::retain_n(self, increment)
    }

    fn release_n(&self, decrement: i32) -> Result<bool> {
        ByteBuf::release_n(self, decrement)
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("ridx", &self.reader_index)
            .field("widx", &self.writer_index)
            .field("cap", &self.capacity())
            .field("max_cap", &self.max_capacity())
            .field("order", &self.order)
            .field("ref_cnt", &self.ref_cnt())
            .finish()
    }
}

/// 比较可读字节；已释放的缓冲与任何缓冲都不相等。
impl PartialEq for ByteBuf {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_vec(), other.to_vec()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }
}
