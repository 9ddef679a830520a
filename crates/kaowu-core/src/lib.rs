//! 考务安全浏览器锁定核心库（跨平台/与 UI 无关）。
//!
//! 功能：
//! - 定义可回滚的顺序操作模型（执行 / 重复 / 撤销，失败自动回滚）
//! - 定义安全功能配置模型（配置项、功能配置、按身份作用域生成注册表位置）
//! - 定义键值存储抽象，并提供内存存储与 JSON 文件存储实现
//! - 定义锁定清单（lockdown-manifest.json）与锁定状态日志（lockdown-state.json）
//! - 提供锁定管理器：按会话构建功能集合并驱动操作序列
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod catalog;
pub mod feature;
pub mod lockdown;
pub mod manifest;
pub mod operation;
pub mod paths;
pub mod sequence;
pub mod state;
pub mod store;
