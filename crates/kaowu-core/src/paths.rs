//! 状态日志的落盘位置。
//!
//! 状态日志必须放在机器级目录（`%ProgramData%\KaowuSecureBrowser`），
//! 这样考试进程崩溃或换用户登录后，`unlock` 仍能找到同一份日志。
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// ProgramData 下的产品目录名。
pub const VENDOR_DIR: &str = "KaowuSecureBrowser";

/// 状态日志文件名。
pub const STATE_FILE_NAME: &str = "lockdown-state.json";

/// 默认状态日志路径：`%ProgramData%\KaowuSecureBrowser\lockdown-state.json`。
///
/// 异常处理：
/// - 环境变量 `ProgramData` 不存在时返回错误
pub fn default_state_file() -> Result<PathBuf> {
    let program_data = std::env::var_os("ProgramData").context("读取 ProgramData 环境变量失败")?;
    Ok(PathBuf::from(program_data).join(VENDOR_DIR).join(STATE_FILE_NAME))
}

/// 清单中 `state_file` 的实际路径：绝对路径原样使用，相对路径以清单所在目录为基准。
pub fn manifest_relative(manifest: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match manifest.parent() {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_file_is_resolved_next_to_the_manifest() {
        let manifest = Path::new("exam").join("lockdown-manifest.json");
        assert_eq!(
            manifest_relative(&manifest, "state/lockdown-state.json"),
            Path::new("exam").join("state/lockdown-state.json")
        );

        let absolute = std::env::temp_dir().join("lockdown-state.json");
        let raw = absolute.to_string_lossy().into_owned();
        assert_eq!(manifest_relative(&manifest, &raw), absolute);
    }
}
