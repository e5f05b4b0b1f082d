use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 构建互斥门：任何时刻只允许一个构建在执行，占用时直接拒绝而非排队
#[derive(Clone, Default)]
pub struct BuildGate {
    lock: Arc<Mutex<()>>,
}

/// 持有期间门处于占用状态，drop 时释放（包括错误返回和 panic 展开）
pub struct BuildPermit {
    _guard: OwnedMutexGuard<()>,
}

impl BuildGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 检查与占用是同一个原子操作，已被占用时返回 `None`
    pub fn try_acquire(&self) -> Option<BuildPermit> {
        Arc::clone(&self.lock)
            .try_lock_owned()
            .ok()
            .map(|guard| BuildPermit { _guard: guard })
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
