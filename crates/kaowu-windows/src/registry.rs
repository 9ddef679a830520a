//! 基于 Windows 注册表的键值存储。
//!
//! 主要用途：
//! - 为锁定核心提供 [`KeyValueStore`] 的真实实现（HKLM / HKEY_USERS / HKCU）
//! - 将 Win32 错误归类为 [`StoreError`]，权限不足单独区分，便于上层提示“需要管理员”
//!
//! 约定：
//! - 读取时键或值不存在视为“未设置”（`Ok(None)`），不是错误
//! - 写入时子键不存在会自动创建
//! - 只支持 DWORD 与字符串（REG_SZ / REG_EXPAND_SZ）两类值
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::io;

use kaowu_core::store::{Hive, KeyValueStore, Location, RegistryValue, StoreError};
use tracing::debug;
use winreg::enums::{RegType, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS};
use winreg::types::FromRegValue;
use winreg::RegKey;

/// 注册表存储（无状态，每次调用都重新打开键）。
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryStore;

impl RegistryStore {
    pub fn new() -> Self {
        Self
    }
}

impl KeyValueStore for RegistryStore {
    fn read(&self, location: &Location) -> Result<Option<RegistryValue>, StoreError> {
        let key = match root(location.hive).open_subkey(&location.key) {
            Ok(key) => key,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(classify(location, e)),
        };
        let raw = match key.get_raw_value(&location.name) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(classify(location, e)),
        };
        let value = match raw.vtype {
            RegType::REG_DWORD => RegistryValue::Dword(u32::from_reg_value(&raw).map_err(|e| classify(location, e))?),
            RegType::REG_SZ | RegType::REG_EXPAND_SZ => {
                RegistryValue::Sz(String::from_reg_value(&raw).map_err(|e| classify(location, e))?)
            }
            _ => {
                return Err(StoreError::UnsupportedType {
                    location: location.to_string(),
                })
            }
        };
        Ok(Some(value))
    }

    fn write(&self, location: &Location, value: &RegistryValue) -> Result<(), StoreError> {
        let (key, _disp) = root(location.hive)
            .create_subkey(&location.key)
            .map_err(|e| classify(location, e))?;
        let written = match value {
            RegistryValue::Dword(v) => key.set_value(&location.name, v),
            RegistryValue::Sz(s) => key.set_value(&location.name, &s.as_str()),
        };
        written.map_err(|e| classify(location, e))?;
        debug!("写入注册表: {location} = {value}");
        Ok(())
    }
}

fn root(hive: Hive) -> RegKey {
    match hive {
        Hive::LocalMachine => RegKey::predef(HKEY_LOCAL_MACHINE),
        Hive::Users => RegKey::predef(HKEY_USERS),
        Hive::CurrentUser => RegKey::predef(HKEY_CURRENT_USER),
    }
}

fn classify(location: &Location, source: io::Error) -> StoreError {
    match source.kind() {
        io::ErrorKind::PermissionDenied => StoreError::AccessDenied {
            location: location.to_string(),
        },
        _ => StoreError::Io {
            location: location.to_string(),
            source,
        },
    }
}
