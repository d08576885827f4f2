//! 流水线：头尾哨兵之间的可变处理器链。
//!
//! # 设计背景（Why）
//! - 处理器链需要在事件传播的同时被热插拔：链接保存在以下标寻址的数组里，由读写锁保护，
//!   锁只在遍历或改写链接时持有，绝不跨越处理器回调。
//! - 被移除的槽位保留原有链接，正在它上面传播的事件可以沿旧链接继续前进；
//!   不再有任何上下文持有、也无法经由被持有的已移除槽位到达时，槽位连同处理器引用一起回收复用。
//!
//! # 契约（What）
//! - 名称在流水线内唯一，头尾哨兵不可按名称访问，也不可被移除或越过。
//! - 通道已注册且调用方不在回调线程时：`add*` 把 `handler_added` 投递过去后立即返回；
//!   `remove*`/`replace` 把整个变更投递过去并阻塞等待完成。
//! - 通道注册前加入的处理器，其 `handler_added` 推迟到注册时按加入顺序调用。

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{
    ChannelHandlerContext, EventMask, Handler, UserEvent,
    context::ContextNode,
    head_tail::{HeadHandler, TailHandler, UnhandledInboundSink},
    handler_from_duplex, handler_from_inbound,
};
use crate::buffer::PipelineMessage;
use crate::channel::Channel;
use crate::error::{CoreError, Result, codes};
use crate::runtime::{ChannelPromise, EventExecutor};

pub(crate) const HEAD: usize = 0;
pub(crate) const TAIL: usize = 1;
const HEAD_NAME: &str = "HeadContext#0";
const TAIL_NAME: &str = "TailContext#0";

struct Slot {
    /// 回收后为 `None`，槽位等待复用。
    node: Option<Arc<ContextNode>>,
    prev: usize,
    next: usize,
    removed: bool,
}

struct Chain {
    slots: Vec<Slot>,
    names: HashMap<String, usize>,
    free: Vec<usize>,
}

enum Position<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}

impl Chain {
    fn lookup(&self, name: &str) -> Result<usize> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| no_such_handler(name))
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.names.contains_key(name) {
            return Err(CoreError::new(
                codes::PIPELINE_DUPLICATE_NAME,
                format!("duplicate handler name: {name}"),
            ));
        }
        Ok(())
    }

    fn neighbours(&self, position: Position<'_>) -> Result<(usize, usize)> {
        Ok(match position {
            Position::First => (HEAD, self.slots[HEAD].next),
            Position::Last => (self.slots[TAIL].prev, TAIL),
            Position::Before(base) => {
                let index = self.lookup(base)?;
                (self.slots[index].prev, index)
            }
            Position::After(base) => {
                let index = self.lookup(base)?;
                (index, self.slots[index].next)
            }
        })
    }

    /// 新节点的下标：优先复用已回收的槽位。
    fn vacant_index(&self) -> usize {
        self.free.last().copied().unwrap_or(self.slots.len())
    }

    fn link(&mut self, node: Arc<ContextNode>, prev: usize, next: usize) {
        let index = node.index;
        self.names.insert(node.name.clone(), index);
        let slot = Slot {
            node: Some(node),
            prev,
            next,
            removed: false,
        };
        if index == self.slots.len() {
            self.slots.push(slot);
        } else {
            self.free.retain(|free| *free != index);
            self.slots[index] = slot;
        }
        self.slots[prev].next = index;
        self.slots[next].prev = index;
    }

    fn holds(&self, node: &ContextNode) -> bool {
        self.slots
            .get(node.index)
            .and_then(|slot| slot.node.as_ref())
            .is_some_and(|held| std::ptr::eq(Arc::as_ptr(held), node))
    }

    fn unlink(&mut self, index: usize) -> bool {
        if index == HEAD || index == TAIL || self.slots[index].removed {
            return false;
        }
        let (prev, next) = (self.slots[index].prev, self.slots[index].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[index].removed = true;
        if let Some(node) = &self.slots[index].node
            && self.names.get(&node.name) == Some(&index)
        {
            self.names.remove(&node.name);
        }
        true
    }

    /// 回收不可能再被遍历到的已移除槽位。
    ///
    /// 仍被上下文持有的已移除节点，以及从它出发沿已移除槽位可达的节点，都必须保留。
    fn reclaim(&mut self) {
        let mut pinned = vec![false; self.slots.len()];
        let mut pending: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.removed
                    && slot
                        .node
                        .as_ref()
                        .is_some_and(|node| Arc::strong_count(node) > 1)
            })
            .map(|(index, _)| index)
            .collect();
        while let Some(index) = pending.pop() {
            let slot = &self.slots[index];
            if pinned[index] || !slot.removed || slot.node.is_none() {
                continue;
            }
            pinned[index] = true;
            pending.push(slot.prev);
            pending.push(slot.next);
        }
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.removed && slot.node.is_some() && !pinned[index] {
                slot.node = None;
                slot.prev = HEAD;
                slot.next = TAIL;
                self.free.push(index);
            }
        }
    }

    fn node_at(&self, index: usize) -> Option<&Arc<ContextNode>> {
        self.slots[index].node.as_ref()
    }

    fn live_nodes(&self) -> Vec<Arc<ContextNode>> {
        let mut nodes = Vec::new();
        let mut index = self.slots[HEAD].next;
        while index != TAIL {
            if let Some(node) = self.node_at(index) {
                nodes.push(Arc::clone(node));
            }
            index = self.slots[index].next;
        }
        nodes
    }
}

enum Deferred {
    Added(Arc<ContextNode>),
    Removed(Arc<ContextNode>),
}

#[derive(Default)]
struct DeferredCallbacks {
    registered: bool,
    callbacks: Vec<Deferred>,
}

/// 通道内部持有的流水线状态。
pub(crate) struct PipelineCore {
    head: Arc<ContextNode>,
    tail: Arc<ContextNode>,
    chain: RwLock<Chain>,
    name_counter: AtomicU64,
    deferred: Mutex<DeferredCallbacks>,
}

impl PipelineCore {
    pub(crate) fn new(sink: Option<Arc<dyn UnhandledInboundSink>>) -> Self {
        let head = Arc::new(ContextNode::sentinel(
            HEAD,
            HEAD_NAME,
            handler_from_duplex(HeadHandler),
        ));
        let tail = Arc::new(ContextNode::sentinel(
            TAIL,
            TAIL_NAME,
            handler_from_inbound(TailHandler::new(sink)),
        ));
        Self {
            head: Arc::clone(&head),
            tail: Arc::clone(&tail),
            chain: RwLock::new(Chain {
                slots: vec![
                    Slot {
                        node: Some(head),
                        prev: HEAD,
                        next: TAIL,
                        removed: false,
                    },
                    Slot {
                        node: Some(tail),
                        prev: HEAD,
                        next: TAIL,
                        removed: false,
                    },
                ],
                names: HashMap::new(),
                free: Vec::new(),
            }),
            name_counter: AtomicU64::new(0),
            deferred: Mutex::new(DeferredCallbacks::default()),
        }
    }

    pub(crate) fn head(&self) -> Arc<ContextNode> {
        Arc::clone(&self.head)
    }

    pub(crate) fn tail(&self) -> Arc<ContextNode> {
        Arc::clone(&self.tail)
    }

    /// 自 `from` 向尾部寻找第一个不跳过 `event` 的节点；尾哨兵兜底。
    pub(crate) fn next_inbound(&self, from: usize, event: EventMask) -> Arc<ContextNode> {
        let chain = self.chain.read();
        let mut index = chain.slots[from].next;
        while index != TAIL {
            if let Some(node) = chain.node_at(index)
                && !node.skip.contains(event)
            {
                return Arc::clone(node);
            }
            index = chain.slots[index].next;
        }
        Arc::clone(&self.tail)
    }

    /// 自 `from` 向头部寻找第一个不跳过 `event` 的节点；头哨兵兜底。
    pub(crate) fn next_outbound(&self, from: usize, event: EventMask) -> Arc<ContextNode> {
        let chain = self.chain.read();
        let mut index = chain.slots[from].prev;
        while index != HEAD {
            if let Some(node) = chain.node_at(index)
                && !node.skip.contains(event)
            {
                return Arc::clone(node);
            }
            index = chain.slots[index].prev;
        }
        Arc::clone(&self.head)
    }

    fn generate_name(&self, chain: &Chain, type_name: &str) -> String {
        loop {
            let n = self.name_counter.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("{type_name}#{n}");
            if !chain.names.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn is_registered(&self) -> bool {
        self.deferred.lock().registered
    }

    /// 未注册时暂存回调并返回 `None`；已注册时原样返还。
    fn defer_until_registered(&self, callback: Deferred) -> Option<Deferred> {
        let mut deferred = self.deferred.lock();
        if deferred.registered {
            return Some(callback);
        }
        deferred.callbacks.push(callback);
        None
    }

    fn take_deferred_on_register(&self) -> Vec<Deferred> {
        let mut deferred = self.deferred.lock();
        deferred.registered = true;
        std::mem::take(&mut deferred.callbacks)
    }
}

/// 通道流水线的操作句柄。克隆开销为一次引用计数。
#[derive(Clone)]
pub struct Pipeline {
    channel: Channel,
}

impl Pipeline {
    pub(crate) fn new(channel: Channel) -> Self {
        Self { channel }
    }

    fn core(&self) -> &PipelineCore {
        &self.channel.core().pipeline
    }

    /// 所属通道。
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    // ---- 增删改 ----

    /// 插入到头哨兵之后。
    pub fn add_first(&self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Result<&Self> {
        self.insert(Position::First, Some(name.into()), handler, None)?;
        Ok(self)
    }

    /// 插入到尾哨兵之前。
    pub fn add_last(&self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Result<&Self> {
        self.insert(Position::Last, Some(name.into()), handler, None)?;
        Ok(self)
    }

    /// 插入到 `base` 之前。
    pub fn add_before(
        &self,
        base: &str,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<&Self> {
        self.insert(Position::Before(base), Some(name.into()), handler, None)?;
        Ok(self)
    }

    /// 插入到 `base` 之后。
    pub fn add_after(
        &self,
        base: &str,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<&Self> {
        self.insert(Position::After(base), Some(name.into()), handler, None)?;
        Ok(self)
    }

    /// 以生成的名称 `<类型名>#<序号>` 插入到末尾，返回该名称。
    pub fn add_last_unnamed(&self, handler: Arc<dyn Handler>) -> Result<String> {
        self.insert(Position::Last, None, handler, None)
    }

    /// 插入到末尾，回调在 `executor` 而非通道的事件循环上执行。
    pub fn add_last_on(
        &self,
        executor: Arc<dyn EventExecutor>,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<&Self> {
        self.insert(Position::Last, Some(name.into()), handler, Some(executor))?;
        Ok(self)
    }

    fn insert(
        &self,
        position: Position<'_>,
        name: Option<String>,
        handler: Arc<dyn Handler>,
        executor: Option<Arc<dyn EventExecutor>>,
    ) -> Result<String> {
        let core = self.core();
        let node = {
            let mut chain = core.chain.write();
            let name = match name {
                Some(name) => {
                    chain.ensure_unique(&name)?;
                    name
                }
                None => core.generate_name(&chain, handler.type_name()),
            };
            let (prev, next) = chain.neighbours(position)?;
            chain.reclaim();
            let node = Arc::new(ContextNode::new(chain.vacant_index(), name, handler, executor));
            chain.link(Arc::clone(&node), prev, next);
            node
        };
        let name = node.name.clone();
        self.schedule_handler_added(node);
        Ok(name)
    }

    fn schedule_handler_added(&self, node: Arc<ContextNode>) {
        node.set_add_pending();
        let Some(Deferred::Added(node)) = self.core().defer_until_registered(Deferred::Added(node))
        else {
            return;
        };
        let ctx = ChannelHandlerContext::new(self.channel.clone(), node);
        let Some(executor) = ctx.foreign_executor() else {
            ctx.call_handler_added();
            return;
        };
        let task_ctx = ctx.clone();
        if let Err(error) = executor.execute(Box::new(move || task_ctx.call_handler_added())) {
            warn!(
                channel.id = %self.channel.id(),
                handler = %ctx.name(),
                %error,
                "cannot run handler_added; removing the handler"
            );
            self.unlink(ctx.node());
            ctx.call_handler_removed();
        }
    }

    fn schedule_handler_removed(&self, node: Arc<ContextNode>) {
        let Some(Deferred::Removed(node)) =
            self.core().defer_until_registered(Deferred::Removed(node))
        else {
            return;
        };
        let ctx = ChannelHandlerContext::new(self.channel.clone(), node);
        match ctx.foreign_executor() {
            Some(executor) if !executor.is_shutdown() => {
                let task_ctx = ctx.clone();
                if executor
                    .execute(Box::new(move || task_ctx.call_handler_removed()))
                    .is_err()
                {
                    ctx.call_handler_removed();
                }
            }
            _ => ctx.call_handler_removed(),
        }
    }

    /// 注册完成后调用所有被推迟的生命周期回调。
    pub(crate) fn invoke_deferred_callbacks(&self) {
        for callback in self.core().take_deferred_on_register() {
            match callback {
                Deferred::Added(node) => self.schedule_handler_added(node),
                Deferred::Removed(node) => self.schedule_handler_removed(node),
            }
        }
    }

    /// 解除节点链接；已移除或为哨兵时返回 `false`。
    pub(crate) fn unlink(&self, node: &ContextNode) -> bool {
        let mut chain = self.core().chain.write();
        chain.holds(node) && chain.unlink(node.index)
    }

    fn reclaim_slots(&self) {
        self.core().chain.write().reclaim();
    }

    /// 在节点的回调线程上执行变更；跨线程时阻塞等待结果。
    fn run_on_owner<T, F>(&self, node: &Arc<ContextNode>, work: F) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Pipeline) -> Result<T> + Send + 'static,
    {
        let ctx = ChannelHandlerContext::new(self.channel.clone(), Arc::clone(node));
        let executor = if self.core().is_registered() {
            ctx.foreign_executor()
                .filter(|executor| !executor.is_shutdown())
        } else {
            None
        };
        match executor {
            Some(executor) => {
                let pipeline = self.clone();
                crate::runtime::executor::submit_to(executor.as_ref(), move || work(&pipeline))
                    .wait()?
            }
            None => work(self),
        }
    }

    fn remove_node(&self, node: Arc<ContextNode>) -> Result<Arc<dyn Handler>> {
        let target = Arc::clone(&node);
        let removed = self.run_on_owner(&node, move |pipeline| {
            if !pipeline.unlink(&target) {
                return Err(no_such_handler(&target.name));
            }
            pipeline.schedule_handler_removed(Arc::clone(&target));
            Ok(Arc::clone(&target.handler))
        });
        drop(node);
        self.reclaim_slots();
        removed
    }

    /// 按名称移除，返回被移除的处理器。
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Handler>> {
        let node = self.find(|chain| chain.lookup(name), name)?;
        self.remove_node(node)
    }

    /// 按实例身份移除。
    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> Result<()> {
        let node = self.find_node(|node| {
            std::ptr::addr_eq(Arc::as_ptr(&node.handler), Arc::as_ptr(handler))
        });
        match node {
            Some(node) => self.remove_node(node).map(|_| ()),
            None => Err(no_such_handler(handler.type_name())),
        }
    }

    /// 移除第一个具体类型为 `H` 的处理器。
    pub fn remove_by_type<H: Any>(&self) -> Result<Arc<dyn Handler>> {
        match self.find_node(|node| node.handler.is::<H>()) {
            Some(node) => self.remove_node(node),
            None => Err(no_such_handler(std::any::type_name::<H>())),
        }
    }

    /// 移除紧随头哨兵的处理器。
    pub fn remove_first(&self) -> Result<Arc<dyn Handler>> {
        let first = self.core().chain.read().live_nodes().into_iter().next();
        match first {
            Some(node) => self.remove_node(node),
            None => Err(no_such_handler("<first>")),
        }
    }

    /// 移除紧邻尾哨兵的处理器。
    pub fn remove_last(&self) -> Result<Arc<dyn Handler>> {
        let last = self.core().chain.read().live_nodes().pop();
        match last {
            Some(node) => self.remove_node(node),
            None => Err(no_such_handler("<last>")),
        }
    }

    /// 原子地以新处理器替换 `old`：新处理器的 `handler_added` 先于旧处理器的 `handler_removed`。
    pub fn replace(
        &self,
        old: &str,
        new_name: impl Into<String>,
        new_handler: Arc<dyn Handler>,
    ) -> Result<Arc<dyn Handler>> {
        let old_node = self.find(|chain| chain.lookup(old), old)?;
        let new_name = new_name.into();
        let target = Arc::clone(&old_node);
        let replaced = self.run_on_owner(&old_node, move |pipeline| {
            pipeline.replace_here(&target, new_name, new_handler)
        });
        drop(old_node);
        self.reclaim_slots();
        replaced
    }

    fn replace_here(
        &self,
        old: &Arc<ContextNode>,
        new_name: String,
        new_handler: Arc<dyn Handler>,
    ) -> Result<Arc<dyn Handler>> {
        let new_node = {
            let mut chain = self.core().chain.write();
            if !chain.holds(old) || chain.slots[old.index].removed {
                return Err(no_such_handler(&old.name));
            }
            if new_name != old.name {
                chain.ensure_unique(&new_name)?;
            }
            let (prev, next) = (chain.slots[old.index].prev, chain.slots[old.index].next);
            chain.unlink(old.index);
            let node = Arc::new(ContextNode::new(
                chain.vacant_index(),
                new_name,
                new_handler,
                old.executor.clone(),
            ));
            chain.link(Arc::clone(&node), prev, next);
            // 仍停留在旧节点上的事件沿新节点继续传播。
            chain.slots[old.index].prev = node.index;
            chain.slots[old.index].next = node.index;
            node
        };
        debug!(
            channel.id = %self.channel.id(),
            old = %old.name,
            new = %new_node.name,
            "handler replaced"
        );
        self.schedule_handler_added(new_node);
        self.schedule_handler_removed(Arc::clone(old));
        Ok(Arc::clone(&old.handler))
    }

    /// 自尾向头移除全部处理器，每个节点遵循自身的回调线程。
    pub(crate) fn destroy(&self) {
        let nodes = self.core().chain.read().live_nodes();
        for node in nodes.into_iter().rev() {
            let ctx = ChannelHandlerContext::new(self.channel.clone(), node);
            match ctx.foreign_executor() {
                Some(executor) if !executor.is_shutdown() => {
                    let pipeline = self.clone();
                    let task_ctx = ctx.clone();
                    let queued = executor.execute(Box::new(move || {
                        if pipeline.unlink(task_ctx.node()) {
                            task_ctx.call_handler_removed();
                        }
                    }));
                    if queued.is_err() && self.unlink(ctx.node()) {
                        ctx.call_handler_removed();
                    }
                }
                _ => {
                    if self.unlink(ctx.node()) {
                        ctx.call_handler_removed();
                    }
                }
            }
        }
        self.reclaim_slots();
    }

    fn find<F>(&self, locate: F, name: &str) -> Result<Arc<ContextNode>>
    where
        F: FnOnce(&Chain) -> Result<usize>,
    {
        let chain = self.core().chain.read();
        let index = locate(&*chain).map_err(|_| no_such_handler(name))?;
        chain
            .node_at(index)
            .map(Arc::clone)
            .ok_or_else(|| no_such_handler(name))
    }

    fn find_node(
        &self,
        mut predicate: impl FnMut(&ContextNode) -> bool,
    ) -> Option<Arc<ContextNode>> {
        self.core()
            .chain
            .read()
            .live_nodes()
            .into_iter()
            .find(|node| predicate(node))
    }

    // ---- 查询 ----

    /// 按名称取处理器。
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.context(name).map(|ctx| Arc::clone(ctx.handler()))
    }

    /// 按名称取上下文。
    pub fn context(&self, name: &str) -> Option<ChannelHandlerContext> {
        self.find(|chain| chain.lookup(name), name)
            .ok()
            .map(|node| ChannelHandlerContext::new(self.channel.clone(), node))
    }

    /// 自头向尾的处理器名称（不含哨兵）。
    pub fn names(&self) -> Vec<String> {
        self.core()
            .chain
            .read()
            .live_nodes()
            .iter()
            .map(|node| node.name.clone())
            .collect()
    }

    /// 第一个处理器。
    pub fn first(&self) -> Option<Arc<dyn Handler>> {
        let nodes = self.core().chain.read().live_nodes();
        nodes.first().map(|node| Arc::clone(&node.handler))
    }

    /// 最后一个处理器。
    pub fn last(&self) -> Option<Arc<dyn Handler>> {
        let nodes = self.core().chain.read().live_nodes();
        nodes.last().map(|node| Arc::clone(&node.handler))
    }

    /// 处理器数量（不含哨兵）。
    pub fn len(&self) -> usize {
        self.core().chain.read().names.len()
    }

    /// 是否没有处理器。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- 入站入口：自头哨兵开始 ----

    fn head_context(&self) -> ChannelHandlerContext {
        ChannelHandlerContext::new(self.channel.clone(), self.core().head())
    }

    fn tail_context(&self) -> ChannelHandlerContext {
        ChannelHandlerContext::new(self.channel.clone(), self.core().tail())
    }

    /// 传播 `channel_registered`。
    pub fn fire_channel_registered(&self) -> &Self {
        self.head_context().invoke_channel_registered();
        self
    }

    /// 传播 `channel_unregistered`。
    pub fn fire_channel_unregistered(&self) -> &Self {
        self.head_context().invoke_channel_unregistered();
        self
    }

    /// 传播 `channel_active`。
    pub fn fire_channel_active(&self) -> &Self {
        self.head_context().invoke_channel_active();
        self
    }

    /// 传播 `channel_inactive`。
    pub fn fire_channel_inactive(&self) -> &Self {
        self.head_context().invoke_channel_inactive();
        self
    }

    /// 传播读到的消息。
    pub fn fire_channel_read(&self, msg: PipelineMessage) -> &Self {
        self.head_context().invoke_channel_read(msg);
        self
    }

    /// 传播 `channel_read_complete`。
    pub fn fire_channel_read_complete(&self) -> &Self {
        self.head_context().invoke_channel_read_complete();
        self
    }

    /// 传播可写性翻转。
    pub fn fire_channel_writability_changed(&self, writable: bool) -> &Self {
        self.head_context()
            .invoke_channel_writability_changed(writable);
        self
    }

    /// 传播用户事件。
    pub fn fire_user_event_triggered(&self, event: UserEvent) -> &Self {
        self.head_context().invoke_user_event_triggered(event);
        self
    }

    /// 传播异常。
    pub fn fire_exception_caught(&self, error: CoreError) -> &Self {
        self.head_context().invoke_exception_caught(error);
        self
    }

    // ---- 出站入口：自尾哨兵开始 ----

    /// 绑定本地地址。
    pub fn bind(&self, local: SocketAddr) -> ChannelPromise {
        self.tail_context().bind(local)
    }

    /// 连接对端。
    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelPromise {
        self.tail_context().connect(remote, local)
    }

    /// 断开连接。
    pub fn disconnect(&self) -> ChannelPromise {
        self.tail_context().disconnect()
    }

    /// 关闭通道。
    pub fn close(&self) -> ChannelPromise {
        self.tail_context().close()
    }

    /// 以调用方提供的承诺关闭通道。
    pub fn close_with(&self, promise: ChannelPromise) -> ChannelPromise {
        self.tail_context().close_with(promise)
    }

    /// 注销。
    pub fn deregister(&self) -> ChannelPromise {
        self.tail_context().deregister()
    }

    /// 请求读取。
    pub fn read(&self) -> &Self {
        self.tail_context().read();
        self
    }

    /// 写入，不冲刷。
    pub fn write(&self, msg: PipelineMessage) -> ChannelPromise {
        self.tail_context().write(msg)
    }

    /// 冲刷。
    pub fn flush(&self) -> &Self {
        self.tail_context().flush();
        self
    }

    /// 写入并冲刷。
    pub fn write_and_flush(&self, msg: PipelineMessage) -> ChannelPromise {
        self.tail_context().write_and_flush(msg)
    }
}

fn no_such_handler(name: &str) -> CoreError {
    CoreError::new(
        codes::PIPELINE_NO_SUCH_HANDLER,
        format!("no such handler: {name}"),
    )
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("channel", &self.channel.id())
            .field("handlers", &self.names())
            .finish()
    }
}
