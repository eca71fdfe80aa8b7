//! In-memory result library.

use std::{
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use optimizer_core::{
    OptimizationResult, SessionId,
    traits::{EntryId, LibraryEntry, LibraryError, LibraryFilter, ResultLibrary},
};
use uuid::Uuid;

/// In-memory library implementation.
///
/// Useful for development and tests. Data is lost on restart.
pub struct MemoryLibrary {
    /// Oldest first, in save order.
    entries: RwLock<Vec<LibraryEntry>>,
}

impl MemoryLibrary {
    /// Create an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryLibrary {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[async_trait]
impl ResultLibrary for MemoryLibrary {
    async fn save(
        &self,
        session_id: &SessionId,
        result: Arc<OptimizationResult>,
    ) -> Result<LibraryEntry, LibraryError> {
        let entry = LibraryEntry {
            id: Uuid::new_v4(),
            session_id: session_id.clone(),
            result,
            saved_at: now_millis(),
        };

        self.entries
            .write()
            .map_err(|e| LibraryError::Internal(e.to_string()))?
            .push(entry.clone());

        Ok(entry)
    }

    async fn get(&self, id: EntryId) -> Result<Option<LibraryEntry>, LibraryError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| LibraryError::Internal(e.to_string()))?
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list(&self, filter: LibraryFilter) -> Result<Vec<LibraryEntry>, LibraryError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| LibraryError::Internal(e.to_string()))?;

        // Save order decides, not `saved_at`, which can repeat.
        let result = entries
            .iter()
            .rev()
            .filter(|e| {
                filter
                    .session_id
                    .as_ref()
                    .is_none_or(|session_id| e.session_id == *session_id)
            })
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(prompt: &str) -> Arc<OptimizationResult> {
        Arc::new(OptimizationResult {
            optimized_prompt: prompt.to_string(),
            original_score: 3.0,
            optimized_score: 7.0,
            improvements: vec![],
            tips: None,
            parameters: None,
            reasoning: None,
        })
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let library = MemoryLibrary::new();
        let entry = library
            .save(&SessionId::from("s1"), result("fox"))
            .await
            .unwrap();

        let loaded = library.get(entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.session_id.as_str(), "s1");
        assert_eq!(loaded.result.optimized_prompt, "fox");
        assert!(library.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_session() {
        let library = MemoryLibrary::new();
        library.save(&SessionId::from("s1"), result("a")).await.unwrap();
        library.save(&SessionId::from("s2"), result("b")).await.unwrap();
        library.save(&SessionId::from("s1"), result("c")).await.unwrap();

        let filter = LibraryFilter {
            session_id: Some(SessionId::from("s1")),
            limit: None,
        };
        assert_eq!(library.list(filter).await.unwrap().len(), 2);

        let limited = LibraryFilter {
            session_id: None,
            limit: Some(1),
        };
        assert_eq!(library.list(limited).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_newest_first_within_same_instant() {
        let library = MemoryLibrary::new();
        let session = SessionId::from("s1");
        for prompt in ["first", "second", "third", "fourth"] {
            library.save(&session, result(prompt)).await.unwrap();
        }

        let prompts: Vec<_> = library
            .list(LibraryFilter::default())
            .await
            .unwrap()
            .iter()
            .map(|e| e.result.optimized_prompt.clone())
            .collect();
        assert_eq!(prompts, ["fourth", "third", "second", "first"]);

        let newest = LibraryFilter {
            session_id: None,
            limit: Some(2),
        };
        let prompts: Vec<_> = library
            .list(newest)
            .await
            .unwrap()
            .iter()
            .map(|e| e.result.optimized_prompt.clone())
            .collect();
        assert_eq!(prompts, ["fourth", "third"]);
    }
}
