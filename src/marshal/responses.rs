//! 回传给模型的固定文本

pub const DENIED: &str = "The user denied this operation.";

pub const PLAN_MODE_DENIED: &str =
    "This action is not available in planning mode. Switch to act mode to modify files.";

pub const INTERRUPTED: &str =
    "The task was interrupted before this tool call could be completed.";

pub const APPROVAL_TIMED_OUT: &str =
    "The approval request timed out, so this operation was not performed.";

pub const TASK_RESUMPTION: &str = "[TASK RESUMPTION] This task was interrupted. It may or may not be complete, so please reassess the task context.";

pub fn skipped(describe: &str) -> String {
    format!("Skipping tool {describe} due to an earlier rejection or failure in this turn.")
}

pub fn feedback(text: &str) -> String {
    format!(
        "The user approved this operation and provided the following feedback:\n<feedback>\n{text}\n</feedback>"
    )
}

pub fn denied_with_reason(reason: &str) -> String {
    format!("{DENIED} Reason: {reason}")
}

pub fn missing_param(name: &str) -> String {
    format!("Missing value for required parameter '{name}'. Please retry with complete response.")
}

pub fn unknown_action(id: &str) -> String {
    format!("Unknown action '{id}'.")
}

pub fn execution_error(describe: &str, error: &str) -> String {
    format!("Error executing {describe}: {error}")
}

pub fn too_many_mistakes(count: u32) -> String {
    format!(
        "The model has made {count} consecutive mistakes. The user should provide guidance before continuing."
    )
}

pub fn inline_header(describe: &str) -> String {
    format!("[{describe}] Result:")
}
