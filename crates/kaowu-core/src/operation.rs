//! 操作模型：可执行、可撤销、带状态的工作单元。
//!
//! 说明：
//! - 操作的 `Err` 返回或 panic 视为“未处理故障”，由 [`crate::sequence::OperationSequence`] 记录并按失败处理
//! - 状态流转：`Pending -> Running -> {Successful, Failed}`；每次新的执行/重复/撤销周期重新进入 `Running`
//! - 进度指示器为可选接收方，所有方法默认空实现
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

/// 单个操作的执行结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    Failed,
    /// 被取消（例如检测到取消信号），按失败回滚。
    Aborted,
}

/// 操作状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Successful,
    Failed,
}

/// 状态变化通知。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// 操作在序列中的下标。
    pub index: usize,
    /// 操作名称。
    pub name: String,
    pub status: OperationStatus,
}

/// 可回滚的工作单元。
pub trait Operation {
    /// 操作名称（用于日志与进度展示）。
    fn name(&self) -> &str;

    fn perform(&mut self) -> Result<OperationResult>;

    /// 重复执行；默认与 [`Operation::perform`] 相同。
    fn repeat(&mut self) -> Result<OperationResult> {
        self.perform()
    }

    /// 撤销已执行的效果；`Err` 表示撤销失败。
    fn revert(&mut self) -> Result<()>;

    /// 最近一次执行失败后是否仍残留部分效果。
    ///
    /// 序列不会撤销失败的操作本身，残留只能由操作自己报告；默认无残留。
    fn left_residue(&self) -> bool {
        false
    }
}

/// 进度指示器（可选）。
pub trait ProgressIndicator {
    fn set_max(&self, _max: usize) {}
    fn progress(&self) {}
    fn regress(&self) {}
    fn update_status(&self, _status: &str) {}
}

type Action = Box<dyn FnMut() -> Result<OperationResult>>;
type Undo = Box<dyn FnMut() -> Result<()>>;

/// 以闭包定义执行/撤销步骤的通用操作（用于初始化/清理类工作）。
pub struct ActionOperation {
    name: String,
    perform: Action,
    revert: Undo,
}

impl ActionOperation {
    pub fn new<P, R>(name: impl Into<String>, perform: P, revert: R) -> Self
    where
        P: FnMut() -> Result<OperationResult> + 'static,
        R: FnMut() -> Result<()> + 'static,
    {
        Self {
            name: name.into(),
            perform: Box::new(perform),
            revert: Box::new(revert),
        }
    }
}

impl Operation for ActionOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn perform(&mut self) -> Result<OperationResult> {
        (self.perform)()
    }

    fn revert(&mut self) -> Result<()> {
        (self.revert)()
    }
}

/// 取消检查点：取消信号置位时以 [`OperationResult::Aborted`] 快速失败。
///
/// 放在序列中需要可取消的位置；撤销为空操作。
#[derive(Debug, Clone)]
pub struct CancellationCheck {
    cancelled: Arc<AtomicBool>,
}

impl CancellationCheck {
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }
}

impl Operation for CancellationCheck {
    fn name(&self) -> &str {
        "cancellation_check"
    }

    fn perform(&mut self) -> Result<OperationResult> {
        if self.cancelled.load(Ordering::SeqCst) {
            Ok(OperationResult::Aborted)
        } else {
            Ok(OperationResult::Success)
        }
    }

    fn revert(&mut self) -> Result<()> {
        Ok(())
    }
}
