//! 锁定管理器：为当前机器/用户构建功能配置集合，并通过操作序列应用与恢复。
//!
//! 主要流程：
//! 1) 按清单顺序构建功能配置（用户级功能绑定会话用户 SID，机器级功能绑定机器作用域）
//! 2) 每个功能包装为 [`FeatureOperation`]，组成 [`OperationSequence`]
//! 3) 会话开始执行 `try_perform`（失败自动回滚），会话结束执行 `try_revert`
//! 4) 可选状态日志：进程异常退出后通过 [`LockdownManager::restore`] 按分组恢复
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{FeatureKind, ScopeKind};
use crate::feature::{FeatureConfiguration, FeatureError, IdentityScope, RegistryFeature, UserIdentity};
use crate::operation::{Operation, OperationResult, ProgressIndicator};
use crate::sequence::{OperationSequence, SequenceResult};
use crate::state::{AppliedFeature, LockdownState, StateJournal};
use crate::store::KeyValueStore;

/// 以功能配置为载体的操作：执行 = 启用，撤销 = 禁用。
pub struct FeatureOperation {
    name: String,
    feature: Box<dyn FeatureConfiguration>,
    journal: Option<Arc<StateJournal>>,
    residue: bool,
}

impl FeatureOperation {
    pub fn new(feature: Box<dyn FeatureConfiguration>, journal: Option<Arc<StateJournal>>) -> Self {
        Self {
            name: feature.kind().to_string(),
            feature,
            journal,
            residue: false,
        }
    }
}

impl Operation for FeatureOperation {
    fn name(&self) -> &str {
        &self.name
    }

    /// 先记录日志再启用；启用失败时先清理本功能已写入的配置项。
    fn perform(&mut self) -> Result<OperationResult> {
        if let Some(journal) = &self.journal {
            journal
                .record(AppliedFeature {
                    id: self.feature.id(),
                    kind: self.feature.kind(),
                    scope: self.feature.scope().clone(),
                })
                .with_context(|| format!("记录功能失败: {}", self.name))?;
        }

        let Err(e) = self.feature.enable() else {
            self.residue = false;
            return Ok(OperationResult::Success);
        };
        warn!("启用功能失败: {} ({}): {e}", self.name, self.feature.scope());
        match self.feature.disable() {
            Ok(()) => {
                self.residue = false;
                if let Some(journal) = &self.journal {
                    journal.forget(self.feature.id())?;
                }
            }
            Err(cleanup) => {
                self.residue = true;
                warn!("清理部分写入失败，保留日志记录: {}: {cleanup}", self.name);
            }
        }
        Ok(OperationResult::Failed)
    }

    fn revert(&mut self) -> Result<()> {
        self.feature
            .disable()
            .with_context(|| format!("恢复功能失败: {} ({})", self.name, self.feature.scope()))?;
        self.residue = false;
        if let Some(journal) = &self.journal {
            journal.forget(self.feature.id())?;
        }
        Ok(())
    }

    fn left_residue(&self) -> bool {
        self.residue
    }
}

/// 单个功能的当前状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureStatus {
    pub kind: FeatureKind,
    pub enabled: bool,
}

/// 锁定管理器。
///
/// 说明：
/// - 一个管理器对应一次锁定会话（一个分组 ID）
/// - 不提供并发控制：同一身份作用域的多个会话互斥由调用方保证
/// - 锁定回滚失败或解除锁定失败时，序列作为残留保留，`unlock` 可再次尝试恢复
pub struct LockdownManager {
    store: Arc<dyn KeyValueStore>,
    user: Option<UserIdentity>,
    group_id: Uuid,
    journal: Option<Arc<StateJournal>>,
    sequence: Option<OperationSequence>,
    residue: Option<OperationSequence>,
}

impl LockdownManager {
    /// 创建管理器（分配新的分组 ID）。
    pub fn new(store: Arc<dyn KeyValueStore>, user: Option<UserIdentity>) -> Self {
        Self {
            store,
            user,
            group_id: Uuid::new_v4(),
            journal: None,
            sequence: None,
            residue: None,
        }
    }

    /// 挂接状态日志（记录已应用功能，用于崩溃后恢复）。
    pub fn with_journal(mut self, journal: Arc<StateJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        self.user.as_ref()
    }

    /// 为本会话创建一份空的锁定状态。
    pub fn new_state(&self, product_code: String) -> LockdownState {
        LockdownState::new(product_code, self.group_id, self.user.clone())
    }

    /// 按给定顺序构建功能配置。
    ///
    /// 异常处理：
    /// - 存在用户级功能但会话没有用户身份时返回 [`FeatureError::MissingUserScope`]
    pub fn build_features(&self, kinds: &[FeatureKind]) -> Result<Vec<Box<dyn FeatureConfiguration>>, FeatureError> {
        kinds
            .iter()
            .map(|&kind| -> Result<Box<dyn FeatureConfiguration>, FeatureError> {
                let feature = RegistryFeature::new(kind, self.group_id, self.scope_for(kind), self.store.clone())?;
                Ok(Box::new(feature))
            })
            .collect()
    }

    /// 应用锁定（`try_perform`）。
    ///
    /// 返回值：
    /// - `Ok(SequenceResult)`：序列运行结果；非 `Success` 时已尝试回滚
    ///
    /// 异常处理：
    /// - 当前会话已锁定或存在未恢复的残留时返回错误
    /// - 构建功能配置失败（作用域缺失）返回错误，此时未做任何系统修改
    pub fn lock(&mut self, kinds: &[FeatureKind], progress: Option<Box<dyn ProgressIndicator>>) -> Result<SequenceResult> {
        if self.sequence.is_some() {
            bail!("当前会话已锁定，请先解除锁定: 分组 {}", self.group_id);
        }
        if self.residue.is_some() {
            bail!("存在未恢复的锁定残留，请先解除锁定: 分组 {}", self.group_id);
        }
        let features = self.build_features(kinds)?;
        info!("开始锁定: 分组 {}，{} 个功能", self.group_id, features.len());
        let mut sequence = self.build_sequence(features);
        sequence.set_progress_indicator(progress);
        let result = sequence.try_perform();
        match result {
            SequenceResult::Success => self.sequence = Some(sequence),
            SequenceResult::RollbackFailed => {
                warn!("锁定回滚未完成，保留残留待解除锁定: 分组 {}", self.group_id);
                self.residue = Some(sequence);
            }
            SequenceResult::Failed | SequenceResult::Aborted => {}
        }
        Ok(result)
    }

    /// 重新应用当前会话的锁定（`try_repeat`，失败不回滚）。
    ///
    /// 返回值：
    /// - `None`：当前没有已应用的锁定
    pub fn relock(&mut self) -> Option<SequenceResult> {
        let sequence = self.sequence.as_mut()?;
        info!("重新应用锁定: 分组 {}", self.group_id);
        Some(sequence.try_repeat())
    }

    /// 恢复当前会话的锁定或残留（`try_revert`）。
    ///
    /// 返回值：
    /// - `true`：全部恢复成功，或当前没有已应用的锁定与残留
    /// - `false`：至少一个功能恢复失败（已尝试恢复全部功能）；序列转为残留，可再次调用重试
    pub fn unlock(&mut self) -> bool {
        let Some(mut sequence) = self.sequence.take().or_else(|| self.residue.take()) else {
            info!("当前没有已应用的锁定");
            return true;
        };
        info!("开始解除锁定: 分组 {}", self.group_id);
        if sequence.try_revert() {
            return true;
        }
        warn!("解除锁定未完成，保留残留: 分组 {}", self.group_id);
        self.residue = Some(sequence);
        false
    }

    pub fn is_locked(&self) -> bool {
        self.sequence.is_some()
    }

    /// 是否存在回滚或恢复失败后残留、尚未恢复的功能。
    pub fn has_residue(&self) -> bool {
        self.residue.is_some()
    }

    /// 查询各功能当前是否处于启用状态。
    pub fn status(&self, kinds: &[FeatureKind]) -> Result<Vec<FeatureStatus>, FeatureError> {
        Ok(self
            .build_features(kinds)?
            .iter()
            .map(|feature| FeatureStatus {
                kind: feature.kind(),
                enabled: feature.is_enabled(),
            })
            .collect())
    }

    /// 按状态日志恢复一个分组的全部功能（逆序、失败继续）。
    ///
    /// 参数：
    /// - `store`：键值存储
    /// - `state`：日志中的锁定状态（决定分组与功能列表）
    /// - `journal`：可选；恢复成功的功能会从日志中删除
    ///
    /// 返回值：
    /// - `true`：全部恢复成功
    /// - `false`：有功能无法重建或恢复失败
    pub fn restore(store: Arc<dyn KeyValueStore>, state: &LockdownState, journal: Option<Arc<StateJournal>>) -> bool {
        info!("按日志恢复分组 {}（{} 个功能）", state.group_id, state.features.len());
        let mut rebuilt = true;
        let mut operations: Vec<Box<dyn Operation>> = Vec::new();
        for applied in &state.features {
            match RegistryFeature::with_id(applied.id, applied.kind, state.group_id, applied.scope.clone(), store.clone()) {
                Ok(feature) => operations.push(Box::new(FeatureOperation::new(Box::new(feature), journal.clone()))),
                Err(e) => {
                    warn!("无法重建功能 {}: {e}", applied.kind);
                    rebuilt = false;
                }
            }
        }
        let reverted = OperationSequence::new(operations).try_revert();
        rebuilt && reverted
    }

    fn scope_for(&self, kind: FeatureKind) -> IdentityScope {
        match (kind.scope_kind(), &self.user) {
            (ScopeKind::User, Some(user)) => IdentityScope::User(user.clone()),
            _ => IdentityScope::Machine,
        }
    }

    fn build_sequence(&self, features: Vec<Box<dyn FeatureConfiguration>>) -> OperationSequence {
        let operations = features
            .into_iter()
            .map(|feature| Box::new(FeatureOperation::new(feature, self.journal.clone())) as Box<dyn Operation>)
            .collect();
        OperationSequence::new(operations)
    }
}
