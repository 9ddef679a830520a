//! 锁定清单（lockdown-manifest.json）模型定义。
//!
//! 清单描述一次考试会话需要锁定哪些系统能力：
//! - `product_code`：产品标识（写入状态日志，便于审计）
//! - `features`：按顺序应用的功能列表（顺序即执行顺序，撤销时逆序）
//! - `state_file`：状态日志路径（可选，覆盖默认 ProgramData 位置）
//!
//! 约定：
//! - 字段通过 `#[serde(default)]` 提供默认值，以便清单向前兼容
//! - 该模块仅定义数据结构与读取，不执行任何系统修改
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::FeatureKind;

/// 默认产品标识。
pub const DEFAULT_PRODUCT_CODE: &str = "kaowu-secure-browser";

/// 锁定清单根对象。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockdownManifest {
    #[serde(default = "default_product_code")]
    /// 产品标识。
    pub product_code: String,
    #[serde(default)]
    /// 功能列表（按执行顺序）。
    pub features: Vec<FeatureEntry>,
    #[serde(default)]
    /// 状态日志路径（覆盖默认 `%ProgramData%\KaowuSecureBrowser\lockdown-state.json`）。
    pub state_file: Option<String>,
}

impl Default for LockdownManifest {
    fn default() -> Self {
        Self {
            product_code: default_product_code(),
            features: Vec::new(),
            state_file: None,
        }
    }
}

impl LockdownManifest {
    /// 读取并解析清单文件。
    ///
    /// 异常处理：
    /// - 文件读取失败（不存在/权限/IO）返回错误
    /// - JSON 解析失败返回错误
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("读取锁定清单失败: {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("解析锁定清单 JSON 失败: {}", path.display()))
    }

    /// 已启用的功能（保持清单顺序，重复项只保留第一次出现）。
    pub fn enabled_features(&self) -> Vec<FeatureKind> {
        let mut kinds: Vec<FeatureKind> = Vec::new();
        for entry in self.features.iter().filter(|e| e.enabled) {
            if !kinds.contains(&entry.kind) {
                kinds.push(entry.kind);
            }
        }
        kinds
    }
}

/// 清单中的单个功能开关。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEntry {
    /// 功能类型。
    pub kind: FeatureKind,
    #[serde(default = "default_enabled")]
    /// 是否启用该限制（默认启用）。
    pub enabled: bool,
}

fn default_product_code() -> String {
    DEFAULT_PRODUCT_CODE.to_string()
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// 验证缺省字段与启用过滤、去重逻辑。
    fn manifest_defaults_and_enabled_filter() {
        let json = r#"
{
  "features": [
    { "kind": "signout" },
    { "kind": "task_manager", "enabled": false },
    { "kind": "power_options", "enabled": true },
    { "kind": "signout" }
  ]
}
"#;
        let manifest: LockdownManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.product_code, DEFAULT_PRODUCT_CODE);
        assert!(manifest.state_file.is_none());
        assert_eq!(
            manifest.enabled_features(),
            vec![FeatureKind::Signout, FeatureKind::PowerOptions]
        );
    }

    #[test]
    fn manifest_rejects_unknown_feature_kind() {
        let json = r#"{ "features": [ { "kind": "teleport" } ] }"#;
        assert!(serde_json::from_str::<LockdownManifest>(json).is_err());
    }
}
