//! 会话持久化
//!
//! SessionStore：每轮结束时 save 一次，恢复时 load；写入必须原子，加载方不会看到写了一半的状态。
//! JsonFileSessionStore 先写同目录临时文件再 rename；MemorySessionStore 用于测试与一次性会话。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::HiveError;
use crate::memory::session::SessionState;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 加载会话；不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, HiveError>;

    async fn save(&self, state: &SessionState) -> Result<(), HiveError>;

    /// 显式关闭会话时删除
    async fn delete(&self, session_id: &str) -> Result<(), HiveError>;

    async fn list(&self) -> Result<Vec<String>, HiveError>;
}

/// 单会话单文件 JSON：`<dir>/<session_id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    dir: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, HiveError> {
        if session_id.is_empty()
            || session_id.contains(['/', '\\'])
            || session_id.starts_with('.')
        {
            return Err(HiveError::Store(format!("invalid session id: {session_id}")));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, HiveError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &SessionState) -> Result<(), HiveError> {
        let path = self.path_for(&state.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_string_pretty(state)?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", state.id, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(session = %state.id, path = %path.display(), "session saved");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), HiveError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, HiveError> {
        let mut out = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                if !id.starts_with('.') {
                    out.push(id.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// 内存会话存储
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, HiveError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, state: &SessionState) -> Result<(), HiveError> {
        self.sessions
            .write()
            .await
            .insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), HiveError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, HiveError> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_store_save_load_delete() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSessionStore::new(dir.path().join("sessions"));
        assert!(store.load("abc").await.unwrap().is_none());

        let mut state = SessionState::with_id("abc", "refactor parser");
        state.begin_turn();
        store.save(&state).await.unwrap();
        let loaded = store.load("abc").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.list().await.unwrap(), vec!["abc".to_string()]);

        // 覆盖写入后不留临时文件
        store.save(&state).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path().join("sessions"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["abc.json".to_string()]);

        store.delete("abc").await.unwrap();
        assert!(store.load("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSessionStore::new(dir.path());
        assert!(store.load("../etc").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        let state = SessionState::with_id("m1", "t");
        store.save(&state).await.unwrap();
        assert_eq!(store.load("m1").await.unwrap(), Some(state));
        store.delete("m1").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
