//! 局部性判断：目标在工作区内还是外
//!
//! 路径按词法规范化（不访问磁盘，目标文件可能尚不存在）后与每个工作区根比较；
//! URL 取主机名，与 local_hosts 比较。

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tools::ActionTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    Local,
    External,
}

impl Locality {
    pub fn is_local(&self) -> bool {
        matches!(self, Locality::Local)
    }
}

/// 词法规范化：去掉 `.`，`..` 回退一级（不跨越根）
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // 相对路径开头的 .. 保留
                    if !out.has_root() {
                        out.push("..");
                    }
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// 相对路径基于 cwd 解析为绝对路径后再规范化
pub fn resolve(path: &str, cwd: &Path) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        normalize(p)
    } else {
        normalize(&cwd.join(p))
    }
}

pub fn classify_path(path: &str, cwd: &Path, roots: &[PathBuf]) -> Locality {
    let target = resolve(path, cwd);
    let inside = roots.iter().any(|root| {
        let root = if root.is_absolute() {
            normalize(root)
        } else {
            normalize(&cwd.join(root))
        };
        target.starts_with(&root)
    });
    if inside {
        Locality::Local
    } else {
        Locality::External
    }
}

pub fn classify_url(url: &str, local_hosts: &[String]) -> Locality {
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_ascii_lowercase()));
    match host {
        Some(h) if local_hosts.iter().any(|l| l.eq_ignore_ascii_case(&h)) => Locality::Local,
        _ => Locality::External,
    }
}

pub fn classify(
    target: &ActionTarget,
    cwd: &Path,
    roots: &[PathBuf],
    local_hosts: &[String],
) -> Locality {
    match target {
        ActionTarget::Path(p) => classify_path(p, cwd, roots),
        ActionTarget::Url(u) => classify_url(u, local_hosts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_locality() {
        let root = PathBuf::from("/work/project");
        let roots = vec![root.clone()];
        assert_eq!(classify_path("src/main.rs", &root, &roots), Locality::Local);
        assert_eq!(classify_path("/work/project/a/../b.txt", &root, &roots), Locality::Local);
        assert_eq!(classify_path("../other/x", &root, &roots), Locality::External);
        assert_eq!(classify_path("/etc/passwd", &root, &roots), Locality::External);
        // 前缀相同但不是子目录
        assert_eq!(classify_path("/work/project2/x", &root, &roots), Locality::External);
    }

    #[test]
    fn test_multiple_roots() {
        let roots = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        assert_eq!(classify_path("/b/x", Path::new("/a"), &roots), Locality::Local);
    }

    #[test]
    fn test_url_locality() {
        let hosts = vec!["localhost".to_string(), "::1".to_string()];
        assert_eq!(classify_url("http://localhost:3000/x", &hosts), Locality::Local);
        assert_eq!(classify_url("http://[::1]:8080/", &hosts), Locality::Local);
        assert_eq!(classify_url("https://docs.rs/tokio", &hosts), Locality::External);
        assert_eq!(classify_url("not a url", &hosts), Locality::External);
    }
}
