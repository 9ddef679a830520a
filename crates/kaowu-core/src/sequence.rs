//! 操作序列：按顺序编排操作的执行、重复与撤销。
//!
//! 以操作 A, B, C, D 初始化的序列，执行顺序为：
//! - [`OperationSequence::try_perform`]：A -> B -> C -> D；某个操作失败时，按逆序撤销此前已成功的操作
//! - [`OperationSequence::try_repeat`]：A -> B -> C -> D；失败时不撤销
//! - [`OperationSequence::try_revert`]：D -> C -> B -> A；单个撤销失败不中断其余撤销
//!
//! 约束：
//! - 操作严格串行执行；序列不提供并发控制，调用方需保证运行期间独占外部存储
//! - 任何操作故障（`Err` 或 panic）都不会越过序列边界，只体现在返回值与日志中
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, info, warn};

use crate::operation::{Operation, OperationResult, OperationStatus, ProgressIndicator, StatusChange};

/// 序列一次运行的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceResult {
    /// 全部操作执行成功。
    Success,
    /// 有操作失败，已成功回滚。
    Failed,
    /// 有操作被取消，已成功回滚。
    Aborted,
    /// 有操作失败或被取消，且回滚本身失败或失败的操作自身留有残留：系统可能处于部分锁定状态。
    RollbackFailed,
}

impl SequenceResult {
    /// 是否需要人工介入（回滚失败导致系统状态不确定）。
    pub fn requires_attention(self) -> bool {
        matches!(self, SequenceResult::RollbackFailed)
    }
}

/// 序列级状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Perform,
    Repeat,
    Revert,
}

impl Phase {
    fn verb(self) -> &'static str {
        match self {
            Phase::Perform => "执行",
            Phase::Repeat => "重复执行",
            Phase::Revert => "撤销",
        }
    }
}

type Listener = Box<dyn Fn(&StatusChange)>;

struct Entry {
    operation: Box<dyn Operation>,
    status: OperationStatus,
}

/// 顺序操作执行器。
pub struct OperationSequence {
    entries: Vec<Entry>,
    progress: Option<Box<dyn ProgressIndicator>>,
    listeners: Vec<Listener>,
    state: SequenceState,
}

impl OperationSequence {
    /// 以调用方给定的顺序（通常为依赖顺序）创建序列。
    pub fn new(operations: Vec<Box<dyn Operation>>) -> Self {
        Self {
            entries: operations
                .into_iter()
                .map(|operation| Entry {
                    operation,
                    status: OperationStatus::Pending,
                })
                .collect(),
            progress: None,
            listeners: Vec::new(),
            state: SequenceState::NotStarted,
        }
    }

    /// 设置进度指示器；`None` 表示不上报进度。
    pub fn set_progress_indicator(&mut self, progress: Option<Box<dyn ProgressIndicator>>) {
        self.progress = progress;
    }

    /// 注册状态变化监听器（可注册多个）。
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&StatusChange) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 各操作的当前状态（按序列顺序）。
    pub fn statuses(&self) -> Vec<OperationStatus> {
        self.entries.iter().map(|e| e.status).collect()
    }

    /// 按顺序执行全部操作；失败时逆序撤销此前已成功的操作。
    ///
    /// 返回值：
    /// - `Success`：全部成功
    /// - `Failed` / `Aborted`：失败或被取消，回滚成功
    /// - `RollbackFailed`：回滚中有撤销失败（其余撤销仍已尝试），或失败的操作报告了残留
    pub fn try_perform(&mut self) -> SequenceResult {
        info!("开始执行操作序列（{} 个操作）", self.entries.len());
        let (performed, outcome) = self.run_forward(Phase::Perform);
        if outcome == OperationResult::Success {
            self.state = SequenceState::Completed;
            info!("操作序列执行成功");
            return SequenceResult::Success;
        }

        warn!("操作序列在第 {} 个操作处中止，开始回滚 {performed} 个已执行操作", performed + 1);
        let residue = self.entries.get(performed).is_some_and(|e| e.operation.left_residue());
        if residue {
            warn!("第 {} 个操作未能清理自身的部分效果", performed + 1);
        }
        let rolled_back = self.revert_prefix(performed);
        self.state = match outcome {
            OperationResult::Aborted => SequenceState::Cancelled,
            _ => SequenceState::Failed,
        };
        if !rolled_back || residue {
            error!("回滚失败，系统可能处于部分锁定状态，需要人工处理");
            return SequenceResult::RollbackFailed;
        }
        match outcome {
            OperationResult::Aborted => SequenceResult::Aborted,
            _ => SequenceResult::Failed,
        }
    }

    /// 按顺序重复执行全部操作；失败时不撤销已执行的操作。
    pub fn try_repeat(&mut self) -> SequenceResult {
        info!("开始重复执行操作序列（{} 个操作）", self.entries.len());
        let (performed, outcome) = self.run_forward(Phase::Repeat);
        match outcome {
            OperationResult::Success => {
                self.state = SequenceState::Completed;
                SequenceResult::Success
            }
            OperationResult::Failed => {
                warn!("重复执行在第 {} 个操作处失败，不做回滚", performed + 1);
                self.state = SequenceState::Failed;
                SequenceResult::Failed
            }
            OperationResult::Aborted => {
                warn!("重复执行在第 {} 个操作处被取消，不做回滚", performed + 1);
                self.state = SequenceState::Cancelled;
                SequenceResult::Aborted
            }
        }
    }

    /// 逆序撤销全部操作；单个失败不影响其余撤销。
    ///
    /// 返回值：
    /// - `true`：全部撤销成功
    /// - `false`：至少一个撤销失败
    pub fn try_revert(&mut self) -> bool {
        info!("开始撤销操作序列（{} 个操作）", self.entries.len());
        self.state = SequenceState::InProgress;
        if let Some(progress) = &self.progress {
            progress.set_max(self.entries.len());
        }
        let success = self.revert_prefix(self.entries.len());
        self.state = if success {
            SequenceState::Completed
        } else {
            SequenceState::Failed
        };
        if success {
            info!("操作序列撤销完成");
        } else {
            error!("操作序列撤销未完全成功");
        }
        success
    }

    /// 正向执行，返回（成功执行的操作数，终止结果）。
    fn run_forward(&mut self, phase: Phase) -> (usize, OperationResult) {
        self.state = SequenceState::InProgress;
        if let Some(progress) = &self.progress {
            progress.set_max(self.entries.len());
        }
        for index in 0..self.entries.len() {
            let outcome = self.execute(index, phase);
            if outcome != OperationResult::Success {
                return (index, outcome);
            }
            if let Some(progress) = &self.progress {
                progress.progress();
            }
        }
        (self.entries.len(), OperationResult::Success)
    }

    /// 逆序撤销前 `count` 个操作，继续执行直到全部尝试完毕。
    fn revert_prefix(&mut self, count: usize) -> bool {
        let mut success = true;
        for index in (0..count).rev() {
            if self.execute(index, Phase::Revert) != OperationResult::Success {
                success = false;
            }
            if let Some(progress) = &self.progress {
                progress.regress();
            }
        }
        success
    }

    fn execute(&mut self, index: usize, phase: Phase) -> OperationResult {
        self.set_status(index, OperationStatus::Running);
        let name = self.entries[index].operation.name().to_string();
        if let Some(progress) = &self.progress {
            progress.update_status(&format!("{}: {name}", phase.verb()));
        }

        let operation = &mut self.entries[index].operation;
        let outcome = catch_unwind(AssertUnwindSafe(|| match phase {
            Phase::Perform => operation.perform(),
            Phase::Repeat => operation.repeat(),
            Phase::Revert => operation.revert().map(|()| OperationResult::Success),
        }));
        let outcome = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("{}操作出现故障: {name}: {e:#}", phase.verb());
                OperationResult::Failed
            }
            Err(payload) => {
                error!("{}操作发生 panic: {name}: {}", phase.verb(), panic_message(payload.as_ref()));
                OperationResult::Failed
            }
        };

        match outcome {
            OperationResult::Success => {
                info!("{}操作成功: {name}", phase.verb());
                self.set_status(index, OperationStatus::Successful);
            }
            OperationResult::Failed => {
                warn!("{}操作失败: {name}", phase.verb());
                self.set_status(index, OperationStatus::Failed);
            }
            OperationResult::Aborted => {
                warn!("{}操作被取消: {name}", phase.verb());
                self.set_status(index, OperationStatus::Failed);
            }
        }
        outcome
    }

    fn set_status(&mut self, index: usize, status: OperationStatus) {
        let entry = &mut self.entries[index];
        entry.status = status;
        let change = StatusChange {
            index,
            name: entry.operation.name().to_string(),
            status,
        };
        for listener in &self.listeners {
            listener(&change);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<非字符串 panic>"
    }
}
