//! Windows 平台能力封装（注册表存储、管理员检测、当前用户身份）。
//!
//! 目标：
//! - 将 Win32 细节集中在本 crate，锁定核心逻辑只依赖 `KeyValueStore` 抽象
//! - 非 Windows 平台下本 crate 为空，上层改用文件存储
//!
//! 安全注意：
//! - 写入 HKLM 与 HKEY_USERS 下其他用户的配置单元需要管理员权限
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

#[cfg(windows)]
pub mod elevation;
#[cfg(windows)]
pub mod identity;
#[cfg(windows)]
pub mod registry;
