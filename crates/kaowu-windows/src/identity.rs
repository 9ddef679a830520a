//! 当前进程用户身份（SID）查询。
//!
//! 用户级锁定功能写入 `HKEY_USERS\<SID>`，因此需要会话用户的字符串 SID。
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use anyhow::{anyhow, Context, Result};
use kaowu_core::feature::UserIdentity;
use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, LocalFree, HANDLE, HLOCAL};
use windows::Win32::Security::Authorization::ConvertSidToStringSidW;
use windows::Win32::Security::{GetTokenInformation, TokenUser, TOKEN_QUERY, TOKEN_USER};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

/// 获取当前进程用户的身份（SID + 用户名）。
///
/// 返回值：
/// - `UserIdentity.sid`：形如 `S-1-5-21-...` 的字符串 SID
/// - `UserIdentity.user_name`：取自 `USERNAME` 环境变量（可能为空）
///
/// 异常处理：
/// - 打开进程令牌或读取令牌信息失败会返回错误
pub fn current_user() -> Result<UserIdentity> {
    let sid = current_user_sid()?;
    let user_name = std::env::var("USERNAME").ok().filter(|s| !s.is_empty());
    Ok(UserIdentity::new(sid, user_name))
}

/// 读取当前进程令牌中的用户 SID 并转为字符串。
pub fn current_user_sid() -> Result<String> {
    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).context("打开进程令牌失败")?;
        let sid = token_user_sid(token);
        let _ = CloseHandle(token);
        sid
    }
}

unsafe fn token_user_sid(token: HANDLE) -> Result<String> {
    let mut needed = 0u32;
    // 第一次调用只用于获取缓冲区大小，预期返回“缓冲区不足”。
    let _ = GetTokenInformation(token, TokenUser, None, 0, &mut needed);
    if needed == 0 {
        return Err(anyhow!("读取令牌用户信息长度失败"));
    }

    let mut buffer = vec![0u64; (needed as usize).div_ceil(8)];
    GetTokenInformation(
        token,
        TokenUser,
        Some(buffer.as_mut_ptr().cast()),
        needed,
        &mut needed,
    )
    .context("读取令牌用户信息失败")?;
    let user = &*(buffer.as_ptr() as *const TOKEN_USER);

    let mut raw = PWSTR::null();
    ConvertSidToStringSidW(user.User.Sid, &mut raw).context("SID 转字符串失败")?;
    let sid = raw.to_string();
    let _ = LocalFree(HLOCAL(raw.0.cast()));
    sid.context("SID 字符串不是有效的 UTF-16")
}
