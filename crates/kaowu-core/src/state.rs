//! 锁定状态日志（lockdown-state.json）。
//!
//! 目的：
//! - 记录“本次锁定修改了哪些功能”，以便进程异常退出后仍能按分组精准恢复
//! - 启用功能前先记录，禁用成功后才删除记录；日志中残留的记录即可能未恢复的功能
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::FeatureKind;
use crate::feature::{IdentityScope, UserIdentity};

/// 锁定状态（序列化为 JSON 存储到 ProgramData）。
///
/// 字段说明：
/// - `state_id`：状态文件 ID
/// - `product_code`：产品标识（与清单一致）
/// - `group_id`：本次锁定会话的分组 ID，恢复时按分组重建功能
/// - `user`：会话用户（无用户身份时为空）
/// - `locked_at`：锁定时间（UTC）
/// - `features`：已记录（可能已应用）的功能
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockdownState {
    pub state_id: Uuid,
    pub product_code: String,
    pub group_id: Uuid,
    #[serde(default)]
    pub user: Option<UserIdentity>,
    pub locked_at: OffsetDateTime,
    #[serde(default)]
    pub features: Vec<AppliedFeature>,
}

impl LockdownState {
    /// 创建一份新的锁定状态（`state_id` 为随机 UUID，`locked_at` 为当前 UTC 时间）。
    pub fn new(product_code: String, group_id: Uuid, user: Option<UserIdentity>) -> Self {
        Self {
            state_id: Uuid::new_v4(),
            product_code,
            group_id,
            user,
            locked_at: OffsetDateTime::now_utc(),
            features: Vec::new(),
        }
    }
}

/// 已记录的功能。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFeature {
    /// 功能实例 ID。
    pub id: Uuid,
    /// 功能类型。
    pub kind: FeatureKind,
    /// 身份作用域。
    pub scope: IdentityScope,
}

/// 落盘的锁定状态日志。
///
/// 每次变更立即写盘；多个功能操作通过 `Arc<StateJournal>` 共享同一份日志。
#[derive(Debug)]
pub struct StateJournal {
    path: PathBuf,
    state: Mutex<LockdownState>,
}

impl StateJournal {
    /// 创建新日志并立即落盘。
    ///
    /// 异常处理：
    /// - 目录创建失败或写文件失败会返回错误
    pub fn create(path: impl Into<PathBuf>, state: LockdownState) -> Result<Self> {
        let journal = Self {
            path: path.into(),
            state: Mutex::new(state),
        };
        journal.persist()?;
        Ok(journal)
    }

    /// 打开已有日志；文件不存在返回 `Ok(None)`。
    pub fn open(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        let Some(state) = Self::load(&path)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            path,
            state: Mutex::new(state),
        }))
    }

    /// 读取日志内容；文件不存在返回 `Ok(None)`。
    pub fn load(path: &Path) -> Result<Option<LockdownState>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path).with_context(|| format!("读取状态日志失败: {}", path.display()))?;
        let state = serde_json::from_slice(&bytes).with_context(|| format!("解析状态日志失败: {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 记录一个即将应用的功能（已存在则不重复记录）。
    pub fn record(&self, feature: AppliedFeature) -> Result<()> {
        {
            let mut state = self.state.lock().map_err(|_| anyhow!("状态日志锁已损坏"))?;
            if state.features.iter().any(|f| f.id == feature.id) {
                return Ok(());
            }
            state.features.push(feature);
        }
        self.persist()
    }

    /// 删除一个已恢复功能的记录。
    pub fn forget(&self, id: Uuid) -> Result<()> {
        {
            let mut state = self.state.lock().map_err(|_| anyhow!("状态日志锁已损坏"))?;
            state.features.retain(|f| f.id != id);
        }
        self.persist()
    }

    /// 当前日志内容快照。
    pub fn snapshot(&self) -> Result<LockdownState> {
        let state = self.state.lock().map_err(|_| anyhow!("状态日志锁已损坏"))?;
        Ok(state.clone())
    }

    /// 是否已没有待恢复的功能。
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.snapshot()?.features.is_empty())
    }

    /// 删除日志文件（全部功能已恢复后调用）。
    pub fn discard(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("删除状态日志失败: {}", self.path.display())),
        }
    }

    fn persist(&self) -> Result<()> {
        let bytes = {
            let state = self.state.lock().map_err(|_| anyhow!("状态日志锁已损坏"))?;
            serde_json::to_vec_pretty(&*state).context("序列化状态日志失败")?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| format!("创建目录失败: {}", parent.display()))?;
            }
        }
        std::fs::write(&self.path, bytes).with_context(|| format!("写入状态日志失败: {}", self.path.display()))?;
        Ok(())
    }
}
