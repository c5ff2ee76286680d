use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::task::Context;

use futures::task::AtomicWaker;

use crate::error::LineStreamError;

/// 只允许执行一次的关闭标志。
///
/// 显式停止、下游关闭、字节源报错等多条路径都可能竞争触发清理，它们统一调用
/// [`CloseOnce::close`]，只有第一次调用返回 `true` 并负责真正的释放动作，其余调用为空操作。
#[derive(Debug, Default)]
pub struct CloseOnce {
    closed: AtomicBool,
}

impl CloseOnce {
    pub const fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
        }
    }

    /// 标记为已关闭；返回本次调用是否是第一次。
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct FailureState {
    reported: CloseOnce,
    error: Mutex<Option<LineStreamError>>,
    waker: AtomicWaker,
}

impl FailureState {
    fn slot(&self) -> std::sync::MutexGuard<'_, Option<LineStreamError>> {
        match self.error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// 向行迭代器异步报告字节源失败的句柄。
///
/// # 契约说明（What）
/// - 可克隆、可跨线程，适合挂在字节源的错误回调上；
/// - 只记录第一次报告的错误，之后的报告被忽略（返回 `false`）；
/// - 报告会唤醒正在等待的拉取；若消费者此刻空闲，错误被保存到其下一次拉取时交付。
#[derive(Clone, Debug)]
pub struct FailureNotifier {
    state: Arc<FailureState>,
}

impl FailureNotifier {
    /// 报告字节源失败；返回该错误是否被记录。
    pub fn notify(&self, error: LineStreamError) -> bool {
        if !self.state.reported.close() {
            return false;
        }
        *self.state.slot() = Some(error);
        self.state.waker.wake();
        true
    }
}

/// 迭代器一侧持有的失败捕获槽。
#[derive(Debug, Default)]
pub(crate) struct FailureSlot {
    state: Arc<FailureState>,
    delivered: bool,
}

impl FailureSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn notifier(&self) -> FailureNotifier {
        FailureNotifier {
            state: Arc::clone(&self.state),
        }
    }

    /// 注册唤醒并取出已捕获的错误；同一错误只会被取出一次。
    pub(crate) fn poll_take(&mut self, cx: &mut Context<'_>) -> Option<LineStreamError> {
        if self.delivered {
            return None;
        }
        self.state.waker.register(cx.waker());
        let captured = self.state.slot().take();
        if captured.is_some() {
            self.delivered = true;
        }
        captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;

    #[test]
    fn close_once_reports_first_caller_only() {
        let guard = CloseOnce::new();
        assert!(!guard.is_closed());
        assert!(guard.close());
        assert!(!guard.close());
        assert!(guard.is_closed());
    }

    #[test]
    fn first_failure_wins_and_is_taken_once() {
        let mut slot = FailureSlot::new();
        let notifier = slot.notifier();
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(slot.poll_take(&mut cx).is_none());
        assert!(notifier.notify(LineStreamError::Closed));
        assert!(!notifier.notify(LineStreamError::Config("late".into())));

        let taken = slot.poll_take(&mut cx).expect("captured failure");
        assert!(matches!(taken, LineStreamError::Closed));
        assert!(slot.poll_take(&mut cx).is_none());
    }
}
