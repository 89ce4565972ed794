//! 审批策略：类别闸门 + 局部性闸门
//!
//! 两道闸门都通过才自动批准；无人值守模式跳过两道闸门；计划模式下修改文件的 action 一律拒绝，
//! 优先于其他判断。判定是纯函数，每个请求单独计算，不跨请求缓存。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::approval::locality::{self, Locality};
use crate::config::{ApprovalSection, AutoApproveActions};
use crate::marshal::responses;
use crate::tools::{ActionCategory, ActionHandler, ActionRequest, ActionTarget};

/// 审批判定
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub auto_approved: bool,
    pub requires_confirmation: bool,
    pub denied: bool,
    pub reason: String,
    pub locality: Option<Locality>,
}

impl ApprovalDecision {
    fn auto(reason: impl Into<String>, locality: Option<Locality>) -> Self {
        Self {
            auto_approved: true,
            requires_confirmation: false,
            denied: false,
            reason: reason.into(),
            locality,
        }
    }

    fn confirm(reason: impl Into<String>, locality: Option<Locality>) -> Self {
        Self {
            auto_approved: false,
            requires_confirmation: true,
            denied: false,
            reason: reason.into(),
            locality,
        }
    }

    fn deny(reason: impl Into<String>, locality: Option<Locality>) -> Self {
        Self {
            auto_approved: false,
            requires_confirmation: false,
            denied: true,
            reason: reason.into(),
            locality,
        }
    }
}

/// 类别闸门的 (工作区内, 工作区外) 开关对
///
/// 工作区外的开关只有在工作区内也开启时才生效。
pub fn category_gate(
    actions: &AutoApproveActions,
    category: ActionCategory,
    flagged_risky: bool,
) -> (bool, bool) {
    match category {
        ActionCategory::Read => (
            actions.read_files,
            actions.read_files && actions.read_files_externally,
        ),
        ActionCategory::Write => (
            actions.edit_files,
            actions.edit_files && actions.edit_files_externally,
        ),
        ActionCategory::ExecuteShell => {
            let pass = actions.execute_all_commands
                || (actions.execute_safe_commands && !flagged_risky);
            (pass, pass)
        }
        ActionCategory::Browse => (actions.use_browser, actions.use_browser),
        ActionCategory::CallExternalTool => (actions.use_mcp, actions.use_mcp),
    }
}

/// 某一轮的审批策略快照（设置可能在两轮之间变化）
#[derive(Clone, Debug)]
pub struct ApprovalPolicy {
    settings: ApprovalSection,
    roots: Vec<PathBuf>,
    cwd: PathBuf,
}

impl ApprovalPolicy {
    pub fn new(settings: ApprovalSection, roots: Vec<PathBuf>, cwd: impl AsRef<Path>) -> Self {
        Self {
            settings,
            roots,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn settings(&self) -> &ApprovalSection {
        &self.settings
    }

    pub fn locality_of(&self, target: &ActionTarget) -> Locality {
        locality::classify(target, &self.cwd, &self.roots, &self.settings.local_hosts)
    }

    pub fn decide(
        &self,
        category: ActionCategory,
        target: Option<&ActionTarget>,
        flagged_risky: bool,
    ) -> ApprovalDecision {
        let loc = target.map(|t| self.locality_of(t));

        if self.settings.plan_mode && category.is_mutating() {
            return ApprovalDecision::deny(responses::PLAN_MODE_DENIED, loc);
        }
        if self.settings.unattended {
            return ApprovalDecision::auto("unattended mode", loc);
        }

        let (local, external) = category_gate(&self.settings.actions, category, flagged_risky);
        let pass = match loc {
            Some(Locality::External) => external,
            Some(Locality::Local) | None => local,
        };
        let where_ = match loc {
            Some(Locality::Local) => "inside workspace",
            Some(Locality::External) => "outside workspace",
            None => "no target",
        };
        if pass {
            ApprovalDecision::auto(format!("{} auto-approved ({where_})", category.as_str()), loc)
        } else {
            ApprovalDecision::confirm(
                format!("{} requires confirmation ({where_})", category.as_str()),
                loc,
            )
        }
    }

    pub fn decide_for(&self, handler: &dyn ActionHandler, request: &ActionRequest) -> ApprovalDecision {
        let target = handler.target(&request.params);
        self.decide(
            handler.category(),
            target.as_ref(),
            handler.flagged_risky(&request.params),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(f: impl FnOnce(&mut ApprovalSection)) -> ApprovalPolicy {
        let mut s = ApprovalSection::default();
        f(&mut s);
        ApprovalPolicy::new(s, vec![PathBuf::from("/work")], "/work")
    }

    fn path(p: &str) -> ActionTarget {
        ActionTarget::Path(p.into())
    }

    #[test]
    fn test_local_external_write_gate() {
        let p = policy(|s| {
            s.actions.edit_files = true;
            s.actions.edit_files_externally = false;
        });
        let inside = p.decide(ActionCategory::Write, Some(&path("src/a.rs")), false);
        assert!(inside.auto_approved);
        assert_eq!(inside.locality, Some(Locality::Local));
        let outside = p.decide(ActionCategory::Write, Some(&path("/tmp/a.rs")), false);
        assert!(outside.requires_confirmation);
        assert!(!outside.auto_approved && !outside.denied);
    }

    #[test]
    fn test_plan_mode_denies_mutating_only() {
        let p = policy(|s| {
            s.plan_mode = true;
            s.unattended = true;
        });
        let w = p.decide(ActionCategory::Write, Some(&path("a")), false);
        assert!(w.denied);
        assert_eq!(w.reason, responses::PLAN_MODE_DENIED);
        let r = p.decide(ActionCategory::Read, Some(&path("a")), false);
        assert!(r.auto_approved);
    }

    #[test]
    fn test_unattended_overrides_gates() {
        let p = policy(|s| s.unattended = true);
        assert!(p.decide(ActionCategory::Browse, None, false).auto_approved);
        assert!(p
            .decide(ActionCategory::Write, Some(&path("/etc/hosts")), false)
            .auto_approved);
    }

    #[test]
    fn test_shell_risky_flag() {
        let p = policy(|_| {});
        assert!(p.decide(ActionCategory::ExecuteShell, None, false).auto_approved);
        assert!(p.decide(ActionCategory::ExecuteShell, None, true).requires_confirmation);
        let p = policy(|s| s.actions.execute_all_commands = true);
        assert!(p.decide(ActionCategory::ExecuteShell, None, true).auto_approved);
    }

    #[test]
    fn test_external_requires_local_flag_too() {
        let p = policy(|s| {
            s.actions.read_files = false;
            s.actions.read_files_externally = true;
        });
        assert!(p
            .decide(ActionCategory::Read, Some(&path("/etc/x")), false)
            .requires_confirmation);
    }

    #[test]
    fn test_decision_is_deterministic() {
        let p = policy(|s| s.actions.edit_files = true);
        let a = p.decide(ActionCategory::Write, Some(&path("x/y")), false);
        let b = p.decide(ActionCategory::Write, Some(&path("./x/y")), false);
        assert_eq!(a, b);
    }
}
