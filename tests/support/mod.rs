//! 集成测试公共夹具

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use hive::approval::{ApprovalResponse, ApprovalUi, StaticApprovalUi};
use hive::config::{AppConfig, SettingsHandle};
use hive::llm::ScriptedTransport;
use hive::memory::{HistoryPart, SessionState, SessionStore};
use hive::tools::default_registry;
use hive::Agent;

/// 工作区为 dir 的配置
pub fn config_for(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.workspace_roots = vec![dir.to_path_buf()];
    cfg.app.max_turns = 5;
    cfg
}

pub fn agent(
    dir: &Path,
    cfg: AppConfig,
    transport: ScriptedTransport,
    store: Arc<dyn SessionStore>,
    ui: Arc<dyn ApprovalUi>,
) -> Agent {
    let registry = Arc::new(default_registry(&cfg.tools, None).unwrap());
    Agent::new(
        Arc::new(transport),
        registry,
        store,
        SettingsHandle::new(cfg),
        ui,
        dir,
    )
}

/// 固定回答的审批 UI
pub fn answering(response: ApprovalResponse) -> Arc<dyn ApprovalUi> {
    Arc::new(StaticApprovalUi::new(response))
}

/// 某个 user 条目中的全部结果文本
pub fn results_in(state: &SessionState, entry: usize) -> Vec<String> {
    state.history[entry]
        .parts
        .iter()
        .filter_map(|p| match p {
            HistoryPart::ActionResult { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

/// 全部历史中的结果条数
pub fn result_count(state: &SessionState) -> usize {
    state
        .history
        .iter()
        .flat_map(|e| e.parts.iter())
        .filter(|p| matches!(p, HistoryPart::ActionResult { .. }))
        .count()
}
