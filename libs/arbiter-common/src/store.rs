//! Read-only access to challenge content.
//!
//! The challenge store is an external collaborator: the service never
//! writes to it while evaluating. Two backings exist, an in-memory table
//! loaded from JSON files and Redis.

use crate::config::StoreLocation;
use crate::error::{EngineError, EngineResult};
use crate::redis as keys;
use crate::types::Challenge;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Fetch a challenge, failing with `ChallengeNotFound` when absent
    async fn get(&self, challenge_id: &str) -> EngineResult<Challenge>;
}

/// Challenges held in memory, typically loaded from disk at startup
#[derive(Debug, Default, Clone)]
pub struct MemoryChallengeStore {
    challenges: HashMap<String, Challenge>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChallengeFile {
    Many { challenges: Vec<Challenge> },
    List(Vec<Challenge>),
    One(Challenge),
}

impl ChallengeFile {
    fn into_vec(self) -> Vec<Challenge> {
        match self {
            ChallengeFile::Many { challenges } | ChallengeFile::List(challenges) => challenges,
            ChallengeFile::One(challenge) => vec![challenge],
        }
    }
}

impl MemoryChallengeStore {
    pub fn from_challenges(challenges: impl IntoIterator<Item = Challenge>) -> Self {
        Self {
            challenges: challenges.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    /// Load from a JSON file or a directory of `*.json` files
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Challenge store path not found: {}", path.display());
        }

        let mut challenges = Vec::new();
        if path.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(path)
                .with_context(|| format!("Failed to read {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            entries.sort();
            for file in entries {
                challenges.extend(Self::read_file(&file)?);
            }
        } else {
            challenges.extend(Self::read_file(path)?);
        }

        let mut store = Self::default();
        for challenge in challenges {
            if store.challenges.contains_key(&challenge.id) {
                bail!("Duplicate challenge id '{}' in {}", challenge.id, path.display());
            }
            store.challenges.insert(challenge.id.clone(), challenge);
        }

        info!(path = %path.display(), challenges = store.len(), "Loaded challenge store");
        Ok(store)
    }

    fn read_file(path: &Path) -> Result<Vec<Challenge>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: ChallengeFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(file.into_vec())
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    /// Challenges sorted by id
    pub fn challenges(&self) -> Vec<&Challenge> {
        let mut all: Vec<&Challenge> = self.challenges.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn get(&self, challenge_id: &str) -> EngineResult<Challenge> {
        self.challenges
            .get(challenge_id)
            .cloned()
            .ok_or_else(|| EngineError::ChallengeNotFound(challenge_id.to_string()))
    }
}

/// Challenges read from Redis on every lookup
#[derive(Clone)]
pub struct RedisChallengeStore {
    conn: ConnectionManager,
}

impl RedisChallengeStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis challenge store: {}", url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn get(&self, challenge_id: &str) -> EngineResult<Challenge> {
        let mut conn = self.conn.clone();
        keys::get_challenge(&mut conn, challenge_id)
            .await?
            .ok_or_else(|| EngineError::ChallengeNotFound(challenge_id.to_string()))
    }
}

/// Open the store named by the configuration
pub async fn open_store(location: &StoreLocation) -> Result<Arc<dyn ChallengeStore>> {
    match location {
        StoreLocation::File(path) => Ok(Arc::new(MemoryChallengeStore::load(path)?)),
        StoreLocation::Redis(url) => Ok(Arc::new(RedisChallengeStore::connect(url).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_SUM: &str = r#"{
        "id": "two-sum",
        "title": "Two Sum",
        "description": "Print a + b",
        "boilerplateCode": "",
        "testCases": [{"input": "1 2", "expectedOutput": "3"}]
    }"#;

    #[tokio::test]
    async fn test_load_single_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", TWO_SUM).unwrap();

        let store = MemoryChallengeStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 1);
        let challenge = store.get("two-sum").await.unwrap();
        assert_eq!(challenge.title, "Two Sum");
    }

    #[tokio::test]
    async fn test_load_directory_and_wrapped_list() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), TWO_SUM).unwrap();
        fs::write(
            dir.path().join("b.json"),
            r#"{"challenges": [{"id": "echo"}, {"id": "reverse"}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = MemoryChallengeStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 3);
        assert!(store.get("reverse").await.is_ok());
        let ids: Vec<&str> = store.challenges().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["echo", "reverse", "two-sum"]);
    }

    #[tokio::test]
    async fn test_missing_challenge() {
        let store = MemoryChallengeStore::default();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::ChallengeNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), TWO_SUM).unwrap();
        fs::write(dir.path().join("b.json"), TWO_SUM).unwrap();

        assert!(MemoryChallengeStore::load(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_shipped_sample_challenges() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/challenges");
        let store = MemoryChallengeStore::load(&dir).unwrap();

        let reverse = store.get("reverse-string").await.unwrap();
        assert_eq!(reverse.visible_test_cases().len(), 2);
        assert_eq!(reverse.hidden_test_cases().len(), 2);

        let sum = store.get("sum-two-numbers").await.unwrap();
        assert_eq!(sum.hidden_test_cases().len(), 3);
    }

    #[test]
    fn test_missing_path() {
        assert!(MemoryChallengeStore::load(Path::new("/definitely/not/here.json")).is_err());
    }
}
