//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__APPROVAL__UNATTENDED=true`）。
//! 审批与上下文设置在两轮之间可能变化，运行时通过 SettingsHandle 每轮重新读取。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub approval: ApprovalSection,
    pub context: ContextSection,
    pub tools: ToolsSection,
}

/// [app] 段：工作区、会话目录、单任务轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 工作区根目录（局部性判断的「内部」），为空时使用当前目录
    pub workspace_roots: Vec<PathBuf>,
    pub session_dir: PathBuf,
    pub max_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_roots: Vec::new(),
            session_dir: PathBuf::from("sessions"),
            max_turns: 25,
        }
    }
}

impl AppSection {
    /// 有效工作区根：未配置时退回当前目录
    pub fn roots(&self) -> Vec<PathBuf> {
        if self.workspace_roots.is_empty() {
            vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
        } else {
            self.workspace_roots.clone()
        }
    }
}

/// 多个 action 块的派发方式：sequential 逐个审批、逐个执行；eager_approval 先对本轮全部完整块做策略判定，执行仍按块顺序
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Sequential,
    EagerApproval,
}

/// [approval] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// 无人值守：跳过全部审批闸门
    pub unattended: bool,
    /// 计划模式：拒绝所有修改文件的 action
    pub plan_mode: bool,
    pub max_consecutive_mistakes: u32,
    /// 等待人工确认的超时，None 表示一直等待
    pub approval_timeout_secs: Option<u64>,
    pub dispatch: DispatchMode,
    /// 视为「内部」的 URL 主机
    pub local_hosts: Vec<String>,
    pub actions: AutoApproveActions,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            unattended: false,
            plan_mode: false,
            max_consecutive_mistakes: 3,
            approval_timeout_secs: None,
            dispatch: DispatchMode::Sequential,
            local_hosts: vec!["localhost".into(), "127.0.0.1".into(), "::1".into()],
            actions: AutoApproveActions::default(),
        }
    }
}

/// [approval.actions] 段：各类 action 的自动批准开关（工作区内 / 工作区外）
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoApproveActions {
    pub read_files: bool,
    pub read_files_externally: bool,
    pub edit_files: bool,
    pub edit_files_externally: bool,
    pub execute_safe_commands: bool,
    pub execute_all_commands: bool,
    pub use_browser: bool,
    pub use_mcp: bool,
}

impl Default for AutoApproveActions {
    fn default() -> Self {
        Self {
            read_files: true,
            read_files_externally: false,
            edit_files: false,
            edit_files_externally: false,
            execute_safe_commands: true,
            execute_all_commands: false,
            use_browser: false,
            use_mcp: false,
        }
    }
}

/// [context] 段：模型上下文窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub context_window: u64,
    /// 覆盖按窗口推算的截断阈值
    pub max_allowed_tokens: Option<u64>,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            max_allowed_tokens: None,
        }
    }
}

/// [tools] 段：执行超时、文件大小上限、排除路径、命令观察时间、网页抓取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次 action 执行超时（秒）
    pub action_timeout_secs: u64,
    pub max_file_bytes: u64,
    /// glob 排除列表（相对工作区，如 `.git/**`、`**/.env`）
    pub excluded_paths: Vec<String>,
    /// 命令运行超过此时间后询问是否继续观察
    pub command_watch_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_fetch_chars: usize,
    /// use_mcp_tool 可调用的外部工具服务 [[tools.external_servers]]
    pub external_servers: Vec<ExternalServerEntry>,
}

/// 外部工具服务：以 `program args.. <tool_name>` 方式运行，参数 JSON 写入 stdin
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExternalServerEntry {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_external_timeout")]
    pub timeout_secs: u64,
}

fn default_external_timeout() -> u64 {
    60
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            action_timeout_secs: 600,
            max_file_bytes: 300 * 1024,
            excluded_paths: vec![".git/**".into(), "**/.env".into()],
            command_watch_secs: 30,
            fetch_timeout_secs: 15,
            max_fetch_chars: 8000,
            external_servers: Vec::new(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 运行时设置句柄：审批策略与上下文管理每轮读取一次快照
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<AppConfig>>,
    source: Option<PathBuf>,
}

impl SettingsHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            source: None,
        }
    }

    /// 记住配置文件来源，reload 时重新读取
    pub fn with_source(mut self, path: Option<PathBuf>) -> Self {
        self.source = path;
        self
    }

    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }

    pub async fn update(&self, f: impl FnOnce(&mut AppConfig)) {
        let mut guard = self.inner.write().await;
        f(&mut guard);
    }

    /// 重新从磁盘与环境变量加载；失败时保留旧配置
    pub async fn reload(&self) -> Result<(), config::ConfigError> {
        let fresh = load_config(self.source.clone())?;
        *self.inner.write().await = fresh;
        tracing::info!("settings reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.approval.max_consecutive_mistakes, 3);
        assert!(c.approval.approval_timeout_secs.is_none());
        assert_eq!(c.approval.dispatch, DispatchMode::Sequential);
        assert!(c.approval.actions.read_files);
        assert!(!c.approval.actions.edit_files);
        assert_eq!(c.context.context_window, 128_000);
    }

    #[test]
    fn test_load_from_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[approval]\nplan_mode = true\ndispatch = \"eager_approval\"\n[approval.actions]\nedit_files = true\n[context]\ncontext_window = 64000\n",
        )
        .unwrap();
        let c = load_config(Some(path)).unwrap();
        assert!(c.approval.plan_mode);
        assert_eq!(c.approval.dispatch, DispatchMode::EagerApproval);
        assert!(c.approval.actions.edit_files);
        assert!(c.approval.actions.read_files);
        assert_eq!(c.context.context_window, 64_000);
    }

    #[tokio::test]
    async fn test_settings_update_visible_in_snapshot() {
        let handle = SettingsHandle::new(AppConfig::default());
        handle.update(|c| c.approval.unattended = true).await;
        assert!(handle.snapshot().await.approval.unattended);
    }
}
