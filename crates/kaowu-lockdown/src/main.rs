//! 考试会话锁定命令行（lockdown）。
//!
//! 职责：
//! - 读取 `lockdown-manifest.json`，按清单顺序应用系统锁定（失败自动回滚）
//! - 生成/更新 `lockdown-state.json`，用于解除锁定或进程崩溃后的精准恢复
//! - 查询各功能当前状态、输出环境自检信息
//!
//! 权限要求：
//! - 锁定/解除锁定需要管理员权限（写 HKLM 与 HKEY_USERS）
//! - 指定 `--store` 使用文件存储时不检查权限（用于演练与自动化测试）
//!
//! 作者：考务安全浏览器项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use kaowu_core::feature::UserIdentity;
use kaowu_core::lockdown::LockdownManager;
use kaowu_core::manifest::LockdownManifest;
use kaowu_core::operation::ProgressIndicator;
use kaowu_core::paths;
use kaowu_core::sequence::SequenceResult;
use kaowu_core::state::StateJournal;
use kaowu_core::store::{FileStore, KeyValueStore};
use tracing::{error, info, warn};

/// 命令行参数。
///
/// 说明：
/// - `manifest` 指向锁定清单文件（默认 `lockdown-manifest.json`）
/// - `store` 指定 JSON 文件存储代替注册表
/// - `sid` / `user_name` 覆盖会话用户（默认取当前进程用户）
#[derive(Debug, Parser)]
#[command(name = "kaowu-lockdown", version)]
struct Cli {
    #[arg(long, default_value = "lockdown-manifest.json")]
    manifest: PathBuf,

    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long)]
    sid: Option<String>,

    #[arg(long)]
    user_name: Option<String>,

    #[arg(long)]
    state_file: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

/// 支持的子命令。
#[derive(Debug, Subcommand)]
enum Commands {
    /// 应用锁定（失败时自动回滚已应用的功能）。
    Lock,
    /// 按状态日志解除锁定。
    Unlock,
    /// 输出清单中各功能的当前状态（不做系统修改）。
    Status,
    /// 环境自检（管理员权限、会话用户等）。
    Doctor,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Lock => lock(&cli),
        Commands::Unlock => unlock(&cli),
        Commands::Status => status(&cli),
        Commands::Doctor => doctor(&cli),
    }
}

#[cfg(windows)]
fn allow_non_admin_for_tests() -> bool {
    matches!(
        std::env::var("KAOWU_TEST_ALLOW_NON_ADMIN").as_deref(),
        Ok("1")
    )
}

#[cfg(windows)]
fn require_admin(cli: &Cli) -> Result<()> {
    if cli.store.is_some() || allow_non_admin_for_tests() {
        return Ok(());
    }
    kaowu_windows::elevation::require_elevated("锁定/解除锁定")
}

#[cfg(not(windows))]
fn require_admin(_cli: &Cli) -> Result<()> {
    Ok(())
}

/// 选择键值存储：指定 `--store` 时使用文件存储，否则使用注册表。
fn open_store(cli: &Cli) -> Result<Arc<dyn KeyValueStore>> {
    if let Some(path) = &cli.store {
        let store = FileStore::open(path).with_context(|| format!("打开文件存储失败: {}", path.display()))?;
        return Ok(Arc::new(store));
    }
    registry_store()
}

#[cfg(windows)]
fn registry_store() -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(kaowu_windows::registry::RegistryStore::new()))
}

#[cfg(not(windows))]
fn registry_store() -> Result<Arc<dyn KeyValueStore>> {
    Err(anyhow!("当前平台没有注册表，请通过 --store 指定文件存储"))
}

/// 会话用户：`--sid` 优先，否则取当前进程用户。
fn session_user(cli: &Cli) -> Result<Option<UserIdentity>> {
    if let Some(sid) = &cli.sid {
        return Ok(Some(UserIdentity::new(sid.clone(), cli.user_name.clone())));
    }
    current_user()
}

#[cfg(windows)]
fn current_user() -> Result<Option<UserIdentity>> {
    Ok(Some(kaowu_windows::identity::current_user()?))
}

#[cfg(not(windows))]
fn current_user() -> Result<Option<UserIdentity>> {
    Ok(None)
}

/// 状态日志路径：`--state-file` > 清单 `state_file`（相对清单目录）> ProgramData 默认位置。
fn state_file(cli: &Cli, manifest: &LockdownManifest) -> Result<PathBuf> {
    if let Some(path) = &cli.state_file {
        return Ok(path.clone());
    }
    match manifest.state_file.as_deref().filter(|raw| !raw.is_empty()) {
        Some(raw) => Ok(paths::manifest_relative(&cli.manifest, raw)),
        None => paths::default_state_file(),
    }
}

/// 通过日志输出进度的指示器。
struct LogProgress {
    max: Cell<usize>,
    done: Cell<usize>,
}

impl LogProgress {
    fn new() -> Self {
        Self {
            max: Cell::new(0),
            done: Cell::new(0),
        }
    }
}

impl ProgressIndicator for LogProgress {
    fn set_max(&self, max: usize) {
        self.max.set(max);
        self.done.set(0);
    }

    fn progress(&self) {
        self.done.set(self.done.get() + 1);
        info!("进度 {}/{}", self.done.get(), self.max.get());
    }

    fn regress(&self) {
        self.done.set(self.done.get().saturating_sub(1));
        info!("回滚 {}/{}", self.done.get(), self.max.get());
    }

    fn update_status(&self, status: &str) {
        info!("{status}");
    }
}

/// 应用锁定。
///
/// 主要步骤：
/// 1) 权限检查、加载清单
/// 2) 已存在状态日志时拒绝（上一次锁定尚未恢复）
/// 3) 创建状态日志，按清单顺序执行锁定；失败时序列自动回滚
///
/// 异常处理：
/// - 回滚失败时状态日志保留残留功能，返回错误并提示人工处理
fn lock(cli: &Cli) -> Result<()> {
    require_admin(cli)?;
    let manifest = LockdownManifest::load(&cli.manifest)?;
    let kinds = manifest.enabled_features();
    let path = state_file(cli, &manifest)?;
    if path.exists() {
        bail!("存在未恢复的锁定状态，请先执行 unlock: {}", path.display());
    }

    let store = open_store(cli)?;
    let manager = LockdownManager::new(store, session_user(cli)?);
    let journal = Arc::new(StateJournal::create(&path, manager.new_state(manifest.product_code.clone()))?);
    let mut manager = manager.with_journal(journal.clone());

    info!("开始锁定: {}（{} 个功能）", manifest.product_code, kinds.len());
    let progress: Option<Box<dyn ProgressIndicator>> = if cli.silent { None } else { Some(Box::new(LogProgress::new())) };
    let result = match manager.lock(&kinds, progress) {
        Ok(result) => result,
        Err(e) => {
            if journal.is_empty()? {
                journal.discard()?;
            }
            return Err(e);
        }
    };

    if result == SequenceResult::Success {
        info!("锁定完成: 分组 {}", manager.group_id());
        return Ok(());
    }
    if result.requires_attention() || !journal.is_empty()? {
        error!("锁定失败且回滚未完成，残留功能记录在: {}", path.display());
        return Err(anyhow!("回滚失败，系统可能处于部分锁定状态，请人工处理后执行 unlock"));
    }
    journal.discard()?;
    Err(anyhow!("锁定失败，已回滚全部已应用的功能: {result:?}"))
}

/// 按状态日志解除锁定。
///
/// 异常处理：
/// - 部分功能恢复失败时日志保留这些功能，返回错误；可重复执行 unlock 重试
fn unlock(cli: &Cli) -> Result<()> {
    require_admin(cli)?;
    let manifest = LockdownManifest::load(&cli.manifest)?;
    let path = state_file(cli, &manifest)?;
    let Some(journal) = StateJournal::open(&path)? else {
        info!("未找到锁定状态，无需恢复: {}", path.display());
        return Ok(());
    };
    let journal = Arc::new(journal);
    let state = journal.snapshot()?;

    let store = open_store(cli)?;
    let restored = LockdownManager::restore(store, &state, Some(journal.clone()));
    if journal.is_empty()? {
        journal.discard()?;
    }
    if !restored {
        warn!("部分功能恢复失败，状态日志已保留: {}", path.display());
        return Err(anyhow!("解除锁定未完成，请检查日志后重试"));
    }
    info!("解除锁定完成: 分组 {}", state.group_id);
    Ok(())
}

/// 输出清单中各功能的当前状态。
fn status(cli: &Cli) -> Result<()> {
    let manifest = LockdownManifest::load(&cli.manifest)?;
    let manager = LockdownManager::new(open_store(cli)?, session_user(cli)?);
    for feature in manager.status(&manifest.enabled_features())? {
        println!("{} = {}", feature.kind, feature.enabled);
    }
    Ok(())
}

fn doctor(cli: &Cli) -> Result<()> {
    print_admin();
    match session_user(cli)? {
        Some(user) => println!("sid = {}", user.sid),
        None => println!("sid = <none>"),
    }
    match &cli.store {
        Some(path) => println!("store = {}", path.display()),
        None => println!("store = registry"),
    }
    Ok(())
}

#[cfg(windows)]
fn print_admin() {
    println!("admin = {}", kaowu_windows::elevation::is_elevated());
}

#[cfg(not(windows))]
fn print_admin() {
    println!("admin = <unsupported>");
}
