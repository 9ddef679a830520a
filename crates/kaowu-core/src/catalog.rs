//! 功能目录：每种受限的系统能力及其注册表配置项。
//!
//! 分类：
//! - 用户级（`HKEY_USERS\<SID>\...`）：修改密码、锁定工作站、通知中心、注销、任务管理器、VMware 遮罩
//! - 机器级（`HKEY_LOCAL_MACHINE\...`）：轻松使用、网络选项、电源选项、远程连接、快速切换用户
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::feature::ConfigurationItem;
use crate::store::{Hive, Location, RegistryValue};

const POLICIES_SYSTEM: &str = r"Software\Microsoft\Windows\CurrentVersion\Policies\System";
const POLICIES_EXPLORER: &str = r"Software\Microsoft\Windows\CurrentVersion\Policies\Explorer";

/// 轻松使用（Utilman.exe）被替换成的占位调试器。
pub const EASE_OF_ACCESS_DUMMY: &str = "KaowuDummy.exe";

/// 功能配置所需的作用域类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Machine,
    User,
}

/// 可锁定的系统能力。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    ChangePassword,
    LockWorkstation,
    Notifications,
    Signout,
    TaskManager,
    VmwareOverlay,
    EaseOfAccess,
    NetworkOptions,
    PowerOptions,
    RemoteConnection,
    UserSwitch,
}

impl FeatureKind {
    /// 全部功能（用户级在前，机器级在后）。
    pub const ALL: [FeatureKind; 11] = [
        FeatureKind::ChangePassword,
        FeatureKind::LockWorkstation,
        FeatureKind::Notifications,
        FeatureKind::Signout,
        FeatureKind::TaskManager,
        FeatureKind::VmwareOverlay,
        FeatureKind::EaseOfAccess,
        FeatureKind::NetworkOptions,
        FeatureKind::PowerOptions,
        FeatureKind::RemoteConnection,
        FeatureKind::UserSwitch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::ChangePassword => "change_password",
            FeatureKind::LockWorkstation => "lock_workstation",
            FeatureKind::Notifications => "notifications",
            FeatureKind::Signout => "signout",
            FeatureKind::TaskManager => "task_manager",
            FeatureKind::VmwareOverlay => "vmware_overlay",
            FeatureKind::EaseOfAccess => "ease_of_access",
            FeatureKind::NetworkOptions => "network_options",
            FeatureKind::PowerOptions => "power_options",
            FeatureKind::RemoteConnection => "remote_connection",
            FeatureKind::UserSwitch => "user_switch",
        }
    }

    pub fn scope_kind(self) -> ScopeKind {
        match self {
            FeatureKind::ChangePassword
            | FeatureKind::LockWorkstation
            | FeatureKind::Notifications
            | FeatureKind::Signout
            | FeatureKind::TaskManager
            | FeatureKind::VmwareOverlay => ScopeKind::User,
            FeatureKind::EaseOfAccess
            | FeatureKind::NetworkOptions
            | FeatureKind::PowerOptions
            | FeatureKind::RemoteConnection
            | FeatureKind::UserSwitch => ScopeKind::Machine,
        }
    }

    /// 生成该功能的配置项。
    ///
    /// 参数：
    /// - `sid`：用户级功能所需的用户 SID；机器级功能忽略该参数
    ///
    /// 说明：
    /// - 用户级功能未提供 SID 时返回空列表，调用方（[`crate::feature::RegistryFeature`]）负责先校验作用域
    pub fn items(self, sid: Option<&str>) -> Vec<ConfigurationItem> {
        match self.scope_kind() {
            ScopeKind::Machine => self.machine_items(),
            ScopeKind::User => match sid {
                Some(sid) => self.user_items(sid),
                None => Vec::new(),
            },
        }
    }

    fn user_items(self, sid: &str) -> Vec<ConfigurationItem> {
        let dword = |key: &str, name: &str, enabled: u32, disabled: u32| {
            ConfigurationItem::new(
                Location::new(Hive::Users, format!("{sid}\\{key}"), name),
                RegistryValue::Dword(enabled),
                RegistryValue::Dword(disabled),
            )
        };
        match self {
            FeatureKind::ChangePassword => vec![dword(POLICIES_SYSTEM, "DisableChangePassword", 1, 0)],
            FeatureKind::LockWorkstation => vec![dword(POLICIES_SYSTEM, "DisableLockWorkstation", 1, 0)],
            FeatureKind::Notifications => vec![dword(
                r"Software\Policies\Microsoft\Windows\Explorer",
                "DisableNotificationCenter",
                1,
                0,
            )],
            FeatureKind::Signout => vec![dword(POLICIES_EXPLORER, "NoLogoff", 1, 0)],
            FeatureKind::TaskManager => vec![dword(POLICIES_SYSTEM, "DisableTaskMgr", 1, 0)],
            // 启用限制即关闭 VMware Horizon 客户端的顶部遮罩栏。
            FeatureKind::VmwareOverlay => vec![dword(r"Software\VMware, Inc.\VMware VDM\Client", "EnableShade", 0, 1)],
            _ => Vec::new(),
        }
    }

    fn machine_items(self) -> Vec<ConfigurationItem> {
        let dword = |key: &str, name: &str, enabled: u32, disabled: u32| {
            ConfigurationItem::new(
                Location::new(Hive::LocalMachine, key, name),
                RegistryValue::Dword(enabled),
                RegistryValue::Dword(disabled),
            )
        };
        match self {
            FeatureKind::EaseOfAccess => vec![ConfigurationItem::new(
                Location::new(
                    Hive::LocalMachine,
                    r"SOFTWARE\Microsoft\Windows NT\CurrentVersion\Image File Execution Options\Utilman.exe",
                    "Debugger",
                ),
                RegistryValue::Sz(EASE_OF_ACCESS_DUMMY.to_string()),
                RegistryValue::Sz(String::new()),
            )],
            FeatureKind::NetworkOptions => vec![dword(
                r"SOFTWARE\Policies\Microsoft\Windows\System",
                "DontDisplayNetworkSelectionUI",
                1,
                0,
            )],
            FeatureKind::PowerOptions => vec![dword(
                r"SOFTWARE\Microsoft\Windows\CurrentVersion\Policies\Explorer",
                "NoClose",
                1,
                0,
            )],
            FeatureKind::RemoteConnection => vec![dword(
                r"SYSTEM\CurrentControlSet\Control\Terminal Server",
                "fDenyTSConnections",
                1,
                0,
            )],
            FeatureKind::UserSwitch => vec![dword(
                r"SOFTWARE\Microsoft\Windows\CurrentVersion\Policies\System",
                "HideFastUserSwitching",
                1,
                0,
            )],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
