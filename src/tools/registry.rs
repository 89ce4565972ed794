//! Action 注册表
//!
//! 每种 action 实现 ActionHandler（validate / describe / execute / 可选 preview_partial），
//! 由 ActionRegistry 按 id 注册与查找；解析器词表（Vocabulary）与 prompt 中的 action 列表都从这里生成。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalCapability;
use crate::core::HiveError;
use crate::marshal::responses;
use crate::parser::{ActionInvocation, Vocabulary};
use crate::tools::{ActionCategory, ActionRequest, ActionTarget, ExecutionResult, Params, ProcessRegistry};

/// 参数取值类型：Path / Url 参数参与审批的局部性判断
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Path,
    Url,
}

/// 参数声明
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub kind: ParamKind,
    /// 保留内部空白（文件内容、diff）
    pub raw: bool,
}

impl ParamSpec {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            kind: ParamKind::Text,
            raw: false,
        }
    }

    pub const fn path(name: &'static str) -> Self {
        Self {
            kind: ParamKind::Path,
            ..Self::text(name)
        }
    }

    pub const fn url(name: &'static str) -> Self {
        Self {
            kind: ParamKind::Url,
            ..Self::text(name)
        }
    }

    pub const fn raw(name: &'static str) -> Self {
        Self {
            raw: true,
            ..Self::text(name)
        }
    }

    pub const fn optional(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }
}

/// handler 执行时可用的会话资源；审批通过窄接口 ApprovalCapability 请求，而不是持有编排器
#[derive(Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub cwd: PathBuf,
    pub cancel: CancellationToken,
    pub approvals: ApprovalCapability,
    pub processes: ProcessRegistry,
}

/// Action handler：id、描述（供模型理解）、参数声明、类别，以及校验与执行
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn params(&self) -> &[ParamSpec];

    fn category(&self) -> ActionCategory;

    /// 局部性闸门的判定对象，默认取第一个 Path / Url 参数
    fn target(&self, params: &Params) -> Option<ActionTarget> {
        self.params().iter().find_map(|spec| {
            let value = params.get(spec.name)?;
            match spec.kind {
                ParamKind::Path => Some(ActionTarget::Path(value.clone())),
                ParamKind::Url => Some(ActionTarget::Url(value.clone())),
                ParamKind::Text => None,
            }
        })
    }

    /// 请求自身声明需要人工确认（如 execute_command 的 requires_approval）
    fn flagged_risky(&self, _params: &Params) -> bool {
        false
    }

    /// 自行管理时限（等待人工确认、观察长时间运行的进程），执行器不再套全局超时
    fn manages_own_deadline(&self) -> bool {
        false
    }

    /// 结构校验：必填参数存在、路径参数格式合法；不得产生副作用
    fn validate(&self, params: &Params) -> Result<(), HiveError> {
        validate_params(self.params(), params)
    }

    /// 人类可读描述（审批提示与日志）
    fn describe(&self, request: &ActionRequest) -> String {
        match self.target(&request.params) {
            Some(ActionTarget::Path(p)) | Some(ActionTarget::Url(p)) => {
                format!("{} for '{}'", self.id(), p)
            }
            None => self.id().to_string(),
        }
    }

    /// 流式中的预览（仅供 UI，无副作用）
    fn preview_partial(&self, _invocation: &ActionInvocation) -> Option<String> {
        None
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String>;
}

/// 按参数声明做通用校验（handler 覆盖 validate 时可先调用它）
pub fn validate_params(specs: &[ParamSpec], params: &Params) -> Result<(), HiveError> {
    for spec in specs {
        let value = params.get(spec.name).map(|v| v.as_str());
        match value {
            None | Some("") if spec.required => {
                return Err(HiveError::Structural(responses::missing_param(spec.name)));
            }
            Some(v) if spec.kind == ParamKind::Path && v.contains('\0') => {
                return Err(HiveError::Structural(format!(
                    "Invalid path for parameter '{}'.",
                    spec.name
                )));
            }
            Some(v) if spec.kind == ParamKind::Url && !is_http_url(v) => {
                return Err(HiveError::Structural(format!(
                    "Invalid URL for parameter '{}': {v}",
                    spec.name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_http_url(v: &str) -> bool {
    v.starts_with("http://") || v.starts_with("https://")
}

/// Action 注册表：按 id 存储 Arc<dyn ActionHandler>，保留注册顺序
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    order: Vec<String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 handler；同名重复注册视为配置错误
    pub fn register(&mut self, handler: impl ActionHandler + 'static) -> Result<(), HiveError> {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ActionHandler>) -> Result<(), HiveError> {
        let id = handler.id().to_string();
        if self.handlers.contains_key(&id) {
            return Err(HiveError::Config(format!("action '{id}' registered twice")));
        }
        self.order.push(id.clone());
        self.handlers.insert(id, handler);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(id).cloned()
    }

    /// 查找并校验；未知 id 是结构错误而不是运行时异常
    pub fn resolve(&self, request: &ActionRequest) -> Result<Arc<dyn ActionHandler>, HiveError> {
        let handler = self
            .get(&request.action_id)
            .ok_or_else(|| HiveError::Structural(responses::unknown_action(&request.action_id)))?;
        handler.validate(&request.params)?;
        Ok(handler)
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 解析器词表
    pub fn vocabulary(&self) -> Vocabulary {
        let mut vocab = Vocabulary::new();
        for handler in self.ordered() {
            let specs = handler.params();
            vocab.insert(
                handler.id(),
                specs.iter().map(|s| s.name),
                specs.iter().filter(|s| s.raw).map(|s| s.name),
            );
        }
        vocab
    }

    /// prompt 中的 Available actions 段落
    pub fn describe_all(&self) -> String {
        self.ordered()
            .map(|h| {
                let params = h
                    .params()
                    .iter()
                    .map(|p| {
                        let req = if p.required { "required" } else { "optional" };
                        format!("- {} ({req})", p.name)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let usage = h
                    .params()
                    .iter()
                    .map(|p| format!("<{0}>...</{0}>", p.name))
                    .collect::<String>();
                format!(
                    "## {id}\nDescription: {desc}\nParameters:\n{params}\nUsage:\n<{id}>{usage}</{id}>",
                    id = h.id(),
                    desc = h.description(),
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<dyn ActionHandler>> {
        self.order.iter().filter_map(|id| self.handlers.get(id))
    }
}
