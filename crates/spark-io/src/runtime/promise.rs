//! 一次性完成信号。
//!
//! # 设计背景（Why）
//! - 通道操作（写入、连接、关闭）与定时任务都需要把结果异步交给调用方：
//!   同一个承诺既能注册回调，也能阻塞等待，还能在 `async` 代码中 `.await`。
//! - 取消与完成互斥：一旦调用 [`Promise::set_uncancellable`]，操作进入“不可撤回”阶段，
//!   后续 `cancel` 一律失败。
//!
//! # 契约（What）
//! - 结果只写入一次：`Success`、`Failure` 或 `Cancelled`；后续 `try_*` 返回 `false`。
//! - 监听器在完成的线程上同步执行，且不持有内部锁，因此回调中可以安全地再次操作承诺或通道。
//! - 完成后注册的监听器立即在当前线程执行。

use std::{
    fmt,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{CoreError, Result, codes, panic_message};

/// 通道操作使用的承诺。
pub type ChannelPromise = Promise<()>;

type Listener<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

enum Outcome<T> {
    Success(T),
    Failure(CoreError),
    Cancelled,
}

impl<T: Clone> Outcome<T> {
    fn to_result(&self) -> Result<T> {
        match self {
            Self::Success(value) => Ok(value.clone()),
            Self::Failure(error) => Err(error.clone()),
            Self::Cancelled => Err(cancelled_error()),
        }
    }
}

fn cancelled_error() -> CoreError {
    CoreError::new(codes::PROMISE_CANCELLED, "promise was cancelled")
}

struct State<T> {
    outcome: Option<Outcome<T>>,
    uncancellable: bool,
    listeners: Vec<Listener<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    completed: Condvar,
}

/// 可克隆的一次性完成信号，所有克隆观察同一结果。
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// 创建未完成的承诺。
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    uncancellable: false,
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                completed: Condvar::new(),
            }),
        }
    }

    /// 创建已成功的承诺。
    pub fn succeeded(value: T) -> Self {
        let promise = Self::new();
        promise.try_success(value);
        promise
    }

    /// 创建已失败的承诺。
    pub fn failed(error: CoreError) -> Self {
        let promise = Self::new();
        promise.try_failure(error);
        promise
    }

    /// 两个句柄是否指向同一承诺。
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// 尝试以成功完成；已完成时返回 `false`。
    pub fn try_success(&self, value: T) -> bool {
        self.complete(Outcome::Success(value))
    }

    /// 尝试以失败完成；已完成时返回 `false`。
    pub fn try_failure(&self, error: CoreError) -> bool {
        self.complete(Outcome::Failure(error))
    }

    /// 以成功完成；已完成时返回 `promise.already_completed`。
    pub fn set_success(&self, value: T) -> Result<()> {
        if self.try_success(value) {
            Ok(())
        } else {
            Err(already_completed())
        }
    }

    /// 以失败完成；已完成时返回 `promise.already_completed`。
    pub fn set_failure(&self, error: CoreError) -> Result<()> {
        if self.try_failure(error) {
            Ok(())
        } else {
            Err(already_completed())
        }
    }

    /// 取消尚未完成、且未进入不可撤回阶段的承诺。
    pub fn cancel(&self) -> bool {
        self.complete(Outcome::Cancelled)
    }

    /// 进入不可撤回阶段；若已被取消则返回 `false`。
    pub fn set_uncancellable(&self) -> bool {
        let mut state = self.shared.state.lock();
        match state.outcome {
            Some(Outcome::Cancelled) => false,
            Some(_) => true,
            None => {
                state.uncancellable = true;
                true
            }
        }
    }

    /// 是否已完成（含取消）。
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// 是否以成功完成。
    pub fn is_success(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Outcome::Success(_)))
    }

    /// 是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Outcome::Cancelled))
    }

    /// 当前是否仍可取消。
    pub fn is_cancellable(&self) -> bool {
        let state = self.shared.state.lock();
        state.outcome.is_none() && !state.uncancellable
    }

    /// 非阻塞地读取结果。
    pub fn result(&self) -> Option<Result<T>> {
        self.shared
            .state
            .lock()
            .outcome
            .as_ref()
            .map(Outcome::to_result)
    }

    /// 失败或取消的原因。
    pub fn cause(&self) -> Option<CoreError> {
        self.result().and_then(|result| result.err())
    }

    /// 注册完成回调；已完成时立即在当前线程执行。
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let result = {
            let mut state = self.shared.state.lock();
            match state.outcome.as_ref().map(Outcome::to_result) {
                Some(result) => result,
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        notify_listener(Box::new(listener), result);
    }

    /// 阻塞直到完成。
    pub fn wait(&self) -> Result<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.to_result();
            }
            self.shared.completed.wait(&mut state);
        }
    }

    /// 最多阻塞 `timeout`；超时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.to_result());
            }
            if self
                .shared
                .completed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.outcome.as_ref().map(Outcome::to_result);
            }
        }
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (listeners, wakers, result) = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            if matches!(outcome, Outcome::Cancelled) && state.uncancellable {
                return false;
            }
            let result = outcome.to_result();
            state.outcome = Some(outcome);
            (
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.wakers),
                result,
            )
        };
        self.shared.completed.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            notify_listener(listener, result.clone());
        }
        true
    }
}

fn already_completed() -> CoreError {
    CoreError::new(codes::PROMISE_ALREADY_COMPLETED, "promise already completed")
}

fn notify_listener<T>(listener: Listener<T>, result: Result<T>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || listener(result))) {
        warn!(
            panic = %panic_message(payload.as_ref()),
            "promise listener panicked"
        );
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.to_result());
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        let status = match state.outcome {
            None if state.uncancellable => "uncancellable",
            None => "pending",
            Some(Outcome::Success(_)) => "success",
            Some(Outcome::Failure(_)) => "failure",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}
