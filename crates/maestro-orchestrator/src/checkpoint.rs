use crate::types::OrchestrationState;
use async_trait::async_trait;
use maestro_core::{
    CheckpointChannel, CheckpointRequest, CheckpointResponse, MaestroError, MaestroResult,
    Resumption,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tracing::debug;

/// Persists orchestration state across suspensions, keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, state: &OrchestrationState) -> MaestroResult<()>;
    async fn load(&self, thread_id: &str) -> MaestroResult<Option<OrchestrationState>>;
    async fn remove(&self, thread_id: &str) -> MaestroResult<()>;
    async fn list(&self) -> MaestroResult<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<String, OrchestrationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &OrchestrationState) -> MaestroResult<()> {
        self.states
            .lock()
            .insert(state.thread_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> MaestroResult<Option<OrchestrationState>> {
        Ok(self.states.lock().get(thread_id).cloned())
    }

    async fn remove(&self, thread_id: &str) -> MaestroResult<()> {
        self.states.lock().remove(thread_id);
        Ok(())
    }

    async fn list(&self) -> MaestroResult<Vec<String>> {
        let mut ids: Vec<String> = self.states.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One pretty-printed JSON file per thread.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub async fn new(dir: PathBuf) -> MaestroResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn state_path(&self, thread_id: &str) -> MaestroResult<PathBuf> {
        let valid = !thread_id.is_empty()
            && thread_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(MaestroError::Checkpoint(format!(
                "invalid thread id '{thread_id}'"
            )));
        }
        Ok(self.dir.join(format!("{thread_id}.json")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &OrchestrationState) -> MaestroResult<()> {
        let path = self.state_path(&state.thread_id)?;
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&path, json).await?;
        debug!(thread_id = %state.thread_id, stage = %state.stage, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> MaestroResult<Option<OrchestrationState>> {
        let path = self.state_path(thread_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let state = serde_json::from_str(&data).map_err(|e| {
            MaestroError::Checkpoint(format!("Failed to parse checkpoint {thread_id}: {e}"))
        })?;
        Ok(Some(state))
    }

    async fn remove(&self, thread_id: &str) -> MaestroResult<()> {
        let path = self.state_path(thread_id)?;
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> MaestroResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Answers checkpoints from a queue of prepared replies.
///
/// When the queue runs dry the channel detaches, leaving the request parked.
#[derive(Default)]
pub struct ScriptedChannel {
    replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<CheckpointRequest>>,
}

impl ScriptedChannel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(reply.into());
    }

    /// Every checkpoint presented so far, in order.
    pub fn requests(&self) -> Vec<CheckpointRequest> {
        self.seen.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl CheckpointChannel for ScriptedChannel {
    async fn suspend(&self, request: CheckpointRequest) -> MaestroResult<Resumption> {
        self.seen.lock().push(request);
        Ok(match self.replies.lock().pop_front() {
            Some(text) => Resumption::Resume(CheckpointResponse::new(text)),
            None => Resumption::Detach,
        })
    }
}

/// Always parks the request; answers arrive through `Orchestrator::resume`.
pub struct DetachedChannel;

#[async_trait]
impl CheckpointChannel for DetachedChannel {
    async fn suspend(&self, request: CheckpointRequest) -> MaestroResult<Resumption> {
        debug!(thread_id = %request.thread_id, kind = %request.kind, "Detaching at checkpoint");
        Ok(Resumption::Detach)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Stage;
    use maestro_core::CheckpointKind;
    use uuid::Uuid;

    fn request(kind: CheckpointKind) -> CheckpointRequest {
        CheckpointRequest {
            thread_id: "t-1".into(),
            execution_id: Uuid::new_v4(),
            kind,
            prompt: "?".into(),
            context: String::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        let mut state = OrchestrationState::new("t-1").with_input("hello");
        state.stage = Stage::AwaitingSatisfaction;
        store.save(&state).await.unwrap();

        assert_eq!(store.load("t-1").await.unwrap(), Some(state));
        assert_eq!(store.list().await.unwrap(), vec!["t-1".to_string()]);
        store.remove("t-1").await.unwrap();
        assert!(store.load("t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path().join("checkpoints"))
            .await
            .unwrap();
        let mut state = OrchestrationState::new("thread_42");
        state.results.insert("writer".into(), "draft".into());
        store.save(&state).await.unwrap();

        let loaded = store.load("thread_42").await.unwrap().unwrap();
        assert_eq!(loaded.results["writer"], "draft");
        assert_eq!(loaded.execution_id, state.execution_id);
        assert_eq!(store.list().await.unwrap(), vec!["thread_42".to_string()]);

        store.remove("thread_42").await.unwrap();
        store.remove("thread_42").await.unwrap();
        assert!(store.load("thread_42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path().to_path_buf()).await.unwrap();
        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, MaestroError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn test_scripted_channel_detaches_when_empty() {
        let channel = ScriptedChannel::new(["first"]);
        let reply = channel.suspend(request(CheckpointKind::Input)).await.unwrap();
        assert_eq!(reply, Resumption::Resume(CheckpointResponse::new("first")));
        let reply = channel
            .suspend(request(CheckpointKind::Satisfaction))
            .await
            .unwrap();
        assert_eq!(reply, Resumption::Detach);
        assert_eq!(channel.requests().len(), 2);
        assert_eq!(channel.remaining(), 0);
    }

    #[tokio::test]
    async fn test_detached_channel() {
        let reply = DetachedChannel
            .suspend(request(CheckpointKind::Input))
            .await
            .unwrap();
        assert_eq!(reply, Resumption::Detach);
    }
}
