//! 安全功能配置模型。
//!
//! 组成：
//! - [`ConfigurationItem`]：单个可回滚的系统状态槽位（位置 + 启用值 + 禁用值），纯数据、无 IO
//! - [`FeatureConfiguration`]：一个可切换的安全限制（由若干配置项组成，绑定身份作用域）
//! - [`RegistryFeature`]：基于 [`KeyValueStore`] 的通用实现，各具体功能只提供自己的配置项列表
//!
//! 语义约定：
//! - `enable`：依次写入启用值，遇到第一个失败立即返回错误，不回滚已写入项（由外层操作负责）
//! - `disable`：对所有配置项写入禁用值，单项失败不中断，最终汇总失败项
//! - `is_enabled`：全部配置项等于启用值才返回 `true`；没有配置项、任何读取错误或不一致都返回 `false`
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{FeatureKind, ScopeKind};
use crate::store::{KeyValueStore, Location, RegistryValue, StoreError};

/// 用户身份（由外部身份/会话提供者给出，核心只把它当作不透明的作用域令牌）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// 用户 SID，用于定位 `HKEY_USERS\<SID>`。
    pub sid: String,
    #[serde(default)]
    /// 用户名（仅用于日志展示）。
    pub user_name: Option<String>,
}

impl UserIdentity {
    pub fn new(sid: impl Into<String>, user_name: Option<String>) -> Self {
        Self {
            sid: sid.into(),
            user_name,
        }
    }
}

/// 功能配置的身份作用域。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityScope {
    /// 机器级（所有用户）。
    Machine,
    /// 指定用户。
    User(UserIdentity),
}

impl fmt::Display for IdentityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityScope::Machine => f.write_str("machine"),
            IdentityScope::User(user) => match &user.user_name {
                Some(name) => write!(f, "user {name} ({})", user.sid),
                None => write!(f, "user {}", user.sid),
            },
        }
    }
}

/// 单个配置项：一个注册表值及其启用/禁用取值。
///
/// 构造后不可变，由唯一的功能配置持有。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationItem {
    location: Location,
    enabled_value: RegistryValue,
    disabled_value: RegistryValue,
}

impl ConfigurationItem {
    pub fn new(location: Location, enabled_value: RegistryValue, disabled_value: RegistryValue) -> Self {
        Self {
            location,
            enabled_value,
            disabled_value,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn enabled_value(&self) -> &RegistryValue {
        &self.enabled_value
    }

    pub fn disabled_value(&self) -> &RegistryValue {
        &self.disabled_value
    }
}

/// 单个配置项的失败记录。
#[derive(Debug)]
pub struct ItemFailure {
    pub location: Location,
    pub error: StoreError,
}

/// 功能配置错误。
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("功能 {feature} 需要用户作用域，但当前会话没有用户身份")]
    MissingUserScope { feature: FeatureKind },
    #[error("功能 {feature} 有 {} 个配置项写入失败", .failures.len())]
    Items {
        feature: FeatureKind,
        failures: Vec<ItemFailure>,
    },
}

/// 可切换安全功能的统一能力接口。
pub trait FeatureConfiguration {
    /// 功能实例 ID（用于状态日志）。
    fn id(&self) -> Uuid;
    /// 会话分组 ID（同一次锁定应用的功能共享该 ID，用于按组批量恢复）。
    fn group_id(&self) -> Uuid;
    fn kind(&self) -> FeatureKind;
    fn scope(&self) -> &IdentityScope;
    /// 启用限制。
    fn enable(&self) -> Result<(), FeatureError>;
    /// 恢复默认状态。
    fn disable(&self) -> Result<(), FeatureError>;
    /// 当前是否处于启用状态（读取失败按未启用处理）。
    fn is_enabled(&self) -> bool;
}

/// 基于键值存储的功能配置。
pub struct RegistryFeature {
    id: Uuid,
    group_id: Uuid,
    kind: FeatureKind,
    scope: IdentityScope,
    items: Vec<ConfigurationItem>,
    store: Arc<dyn KeyValueStore>,
}

impl RegistryFeature {
    /// 按功能目录构建功能配置。
    ///
    /// 参数：
    /// - `kind`：功能类型（决定配置项与所需作用域）
    /// - `group_id`：会话分组 ID
    /// - `scope`：身份作用域；用户级功能必须为 [`IdentityScope::User`]
    /// - `store`：键值存储
    ///
    /// 异常处理：
    /// - 用户级功能缺少用户身份时返回 [`FeatureError::MissingUserScope`]
    pub fn new(
        kind: FeatureKind,
        group_id: Uuid,
        scope: IdentityScope,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, FeatureError> {
        Self::with_id(Uuid::new_v4(), kind, group_id, scope, store)
    }

    /// 以既有 ID 重建功能配置（用于从状态日志恢复）。
    pub fn with_id(
        id: Uuid,
        kind: FeatureKind,
        group_id: Uuid,
        scope: IdentityScope,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, FeatureError> {
        let items = match (kind.scope_kind(), &scope) {
            (ScopeKind::Machine, _) => kind.items(None),
            (ScopeKind::User, IdentityScope::User(user)) => kind.items(Some(user.sid.as_str())),
            (ScopeKind::User, IdentityScope::Machine) => {
                return Err(FeatureError::MissingUserScope { feature: kind })
            }
        };
        Ok(Self {
            id,
            group_id,
            kind,
            scope,
            items,
            store,
        })
    }

    /// 使用自定义配置项构建功能配置。
    pub fn with_items(
        kind: FeatureKind,
        group_id: Uuid,
        scope: IdentityScope,
        items: Vec<ConfigurationItem>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            kind,
            scope,
            items,
            store,
        }
    }

    pub fn items(&self) -> &[ConfigurationItem] {
        &self.items
    }
}

impl fmt::Debug for RegistryFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryFeature")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

impl FeatureConfiguration for RegistryFeature {
    fn id(&self) -> Uuid {
        self.id
    }

    fn group_id(&self) -> Uuid {
        self.group_id
    }

    fn kind(&self) -> FeatureKind {
        self.kind
    }

    fn scope(&self) -> &IdentityScope {
        &self.scope
    }

    fn enable(&self) -> Result<(), FeatureError> {
        for item in &self.items {
            if let Err(error) = self.store.write(item.location(), item.enabled_value()) {
                warn!("写入启用值失败: {} = {}: {error}", item.location(), item.enabled_value());
                return Err(FeatureError::Items {
                    feature: self.kind,
                    failures: vec![ItemFailure {
                        location: item.location().clone(),
                        error,
                    }],
                });
            }
            info!("已写入启用值: {} = {}", item.location(), item.enabled_value());
        }
        Ok(())
    }

    fn disable(&self) -> Result<(), FeatureError> {
        let mut failures = Vec::new();
        for item in &self.items {
            match self.store.write(item.location(), item.disabled_value()) {
                Ok(()) => info!("已恢复禁用值: {} = {}", item.location(), item.disabled_value()),
                Err(error) => {
                    warn!("恢复禁用值失败: {} = {}: {error}", item.location(), item.disabled_value());
                    failures.push(ItemFailure {
                        location: item.location().clone(),
                        error,
                    });
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FeatureError::Items {
                feature: self.kind,
                failures,
            })
        }
    }

    fn is_enabled(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|item| match self.store.read(item.location()) {
            Ok(Some(value)) => value == *item.enabled_value(),
            Ok(None) => false,
            Err(e) => {
                warn!("读取配置项失败，按未启用处理: {}: {e}", item.location());
                false
            }
        })
    }
}
