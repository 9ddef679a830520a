//! 持久化键值存储抽象（注册表语义）。
//!
//! 说明：
//! - 锁定核心本身不绑定任何具体注册表实现，只依赖 [`KeyValueStore`] 契约
//! - Windows 下由 `kaowu-windows` 提供基于 winreg 的实现
//! - 本模块提供 [`MemoryStore`]（测试/故障注入）与 [`FileStore`]（JSON 文件，便于演练与端到端测试）
//!
//! 约定：
//! - 读取不存在的值返回 `Ok(None)`，不视为错误
//! - 存储实现不做缓存：每次读取都反映外部当前状态
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 注册表根键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hive {
    /// HKEY_LOCAL_MACHINE（机器级配置）。
    LocalMachine,
    /// HKEY_USERS（按 SID 区分的用户配置）。
    Users,
    /// HKEY_CURRENT_USER（当前进程用户）。
    CurrentUser,
}

impl Hive {
    /// 根键的完整名称（用于位置字符串与日志）。
    pub fn name(self) -> &'static str {
        match self {
            Hive::LocalMachine => "HKEY_LOCAL_MACHINE",
            Hive::Users => "HKEY_USERS",
            Hive::CurrentUser => "HKEY_CURRENT_USER",
        }
    }
}

/// 注册表值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryValue {
    /// DWORD（u32）。
    Dword(u32),
    /// 字符串（REG_SZ）。
    Sz(String),
}

impl fmt::Display for RegistryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryValue::Dword(v) => write!(f, "{v}"),
            RegistryValue::Sz(s) => write!(f, "\"{s}\""),
        }
    }
}

/// 系统状态槽位：根键 + 子键路径 + 值名。
///
/// 字符串形式：`<hive>\<key>\<name>`，例如
/// `HKEY_USERS\S-1-5-21-1\Software\Microsoft\Windows\CurrentVersion\Policies\Explorer\NoLogoff`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub hive: Hive,
    pub key: String,
    pub name: String,
}

impl Location {
    pub fn new(hive: Hive, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            hive,
            key: key.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}\\{}", self.hive.name(), self.key, self.name)
    }
}

/// 存储读写错误。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("访问被拒绝: {location}")]
    AccessDenied { location: String },
    #[error("值类型不受支持: {location}")]
    UnsupportedType { location: String },
    #[error("存储读写失败: {location}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("存储数据损坏: {0}")]
    Corrupted(String),
}

/// 持久化键值存储契约。
///
/// 实现要求：
/// - `read`：值不存在返回 `Ok(None)`；权限不足/类型不支持等返回错误
/// - `write`：键不存在时应自动创建
pub trait KeyValueStore {
    fn read(&self, location: &Location) -> Result<Option<RegistryValue>, StoreError>;
    fn write(&self, location: &Location, value: &RegistryValue) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: BTreeMap<String, RegistryValue>,
    denied_reads: BTreeSet<String>,
    denied_writes: BTreeSet<String>,
}

/// 内存键值存储。
///
/// 用途：
/// - 单元/集成测试的存储替身
/// - 通过 [`MemoryStore::deny_reads`] / [`MemoryStore::deny_writes`] 注入读写失败
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后对 `location` 的读取都返回 [`StoreError::AccessDenied`]。
    pub fn deny_reads(&self, location: &Location) {
        self.lock().denied_reads.insert(location.to_string());
    }

    /// 之后对 `location` 的写入都返回 [`StoreError::AccessDenied`]。
    pub fn deny_writes(&self, location: &Location) {
        self.lock().denied_writes.insert(location.to_string());
    }

    /// 清除所有注入的失败。
    pub fn allow_all(&self) {
        let mut inner = self.lock();
        inner.denied_reads.clear();
        inner.denied_writes.clear();
    }

    /// 直接查看当前值（绕过故障注入）。
    pub fn get(&self, location: &Location) -> Option<RegistryValue> {
        self.lock().values.get(&location.to_string()).cloned()
    }

    /// 已写入的值数量。
    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, location: &Location) -> Result<Option<RegistryValue>, StoreError> {
        let key = location.to_string();
        let inner = self.lock();
        if inner.denied_reads.contains(&key) {
            return Err(StoreError::AccessDenied { location: key });
        }
        Ok(inner.values.get(&key).cloned())
    }

    fn write(&self, location: &Location, value: &RegistryValue) -> Result<(), StoreError> {
        let key = location.to_string();
        let mut inner = self.lock();
        if inner.denied_writes.contains(&key) {
            return Err(StoreError::AccessDenied { location: key });
        }
        inner.values.insert(key, value.clone());
        Ok(())
    }
}

/// JSON 文件键值存储。
///
/// 格式：以位置字符串为键的 JSON 对象，例如 `{ "HKEY_LOCAL_MACHINE\\...\\NoClose": { "dword": 1 } }`。
///
/// 说明：
/// - 每次读取重新加载文件，每次写入立即落盘（与注册表一样不做缓存）
/// - 文件不存在视为空存储
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    /// 打开（或准备创建）一个文件存储。
    ///
    /// 异常处理：
    /// - 文件存在但无法解析时返回错误，避免后续写入覆盖损坏数据
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            guard: Mutex::new(()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, RegistryValue>, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    location: self.path.display().to_string(),
                    source: e,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, values: &BTreeMap<String, RegistryValue>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(values)
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", self.path.display())))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                    location: parent.display().to_string(),
                    source: e,
                })?;
            }
        }
        std::fs::write(&self.path, bytes).map_err(|e| StoreError::Io {
            location: self.path.display().to_string(),
            source: e,
        })
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, location: &Location) -> Result<Option<RegistryValue>, StoreError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.get(&location.to_string()).cloned())
    }

    fn write(&self, location: &Location, value: &RegistryValue) -> Result<(), StoreError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.load()?;
        values.insert(location.to_string(), value.clone());
        self.save(&values)
    }
}
