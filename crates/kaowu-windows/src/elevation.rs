//! 管理员权限检测。
//!
//! 锁定写入 HKLM 以及其他用户的 `HKEY_USERS\<SID>` 配置单元，非管理员运行时写入会在中途
//! 以“拒绝访问”失败并触发回滚，因此入口处先行拒绝。
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use anyhow::{bail, Result};
use windows::Win32::UI::Shell::IsUserAnAdmin;

/// 当前进程是否以管理员权限运行。
pub fn is_elevated() -> bool {
    unsafe { IsUserAnAdmin().as_bool() }
}

/// 要求管理员权限；`action` 用于错误提示（例如 `"锁定"`）。
pub fn require_elevated(action: &str) -> Result<()> {
    if !is_elevated() {
        bail!("{action}需要管理员权限，请以管理员方式运行");
    }
    Ok(())
}
