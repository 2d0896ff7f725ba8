//! Best-effort cache of conversation metadata, keyed by thread id.
//!
//! Nothing in the request path depends on an entry being present: a restart
//! or a redis outage only loses diagnostics, never a conversation.

use crate::models::Recommendations;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

const KEY_PREFIX: &str = "buildlist:session:";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Live,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub thread_id: String,
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub turns: u32,
    #[serde(default)]
    pub last_recommendations: Option<Recommendations>,
}

#[derive(Clone)]
pub struct SessionStore {
    memory: Arc<Mutex<HashMap<String, SessionRecord>>>,
    redis: Option<redis::Client>,
    ttl_secs: u64,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self {
            memory: Arc::new(Mutex::new(HashMap::new())),
            redis: None,
            ttl_secs: 0,
        }
    }

    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok());
        let ttl_secs = std::env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(86_400);
        Self {
            memory: Arc::new(Mutex::new(HashMap::new())),
            redis,
            ttl_secs,
        }
    }

    pub async fn open(&self, thread_id: &str, mode: SessionMode) {
        let now = Utc::now();
        let record = SessionRecord {
            thread_id: thread_id.to_string(),
            mode,
            created_at: now,
            last_active: now,
            turns: 0,
            last_recommendations: None,
        };
        self.put(record).await;
    }

    /// Counts one more turn on the thread, opening a record if none is cached.
    pub async fn touch(&self, thread_id: &str, mode: SessionMode) {
        let mut record = self.get(thread_id).await.unwrap_or_else(|| {
            let now = Utc::now();
            SessionRecord {
                thread_id: thread_id.to_string(),
                mode,
                created_at: now,
                last_active: now,
                turns: 0,
                last_recommendations: None,
            }
        });
        record.turns += 1;
        record.last_active = Utc::now();
        self.put(record).await;
    }

    pub async fn remember_recommendations(
        &self,
        thread_id: &str,
        recommendations: &Recommendations,
    ) {
        if let Some(mut record) = self.get(thread_id).await {
            record.last_recommendations = Some(recommendations.clone());
            record.last_active = Utc::now();
            self.put(record).await;
        }
    }

    pub async fn get(&self, thread_id: &str) -> Option<SessionRecord> {
        if let Some(record) = self.memory.lock().await.get(thread_id).cloned() {
            return Some(record);
        }
        let client = self.redis.as_ref()?;
        let record = redis_get(client, thread_id).await?;
        self.memory
            .lock()
            .await
            .insert(thread_id.to_string(), record.clone());
        Some(record)
    }

    pub async fn count(&self) -> usize {
        self.memory.lock().await.len()
    }

    async fn put(&self, record: SessionRecord) {
        if let Some(client) = &self.redis {
            redis_set(client, &record, self.ttl_secs).await;
        }
        self.memory
            .lock()
            .await
            .insert(record.thread_id.clone(), record);
    }
}

async fn redis_get(client: &redis::Client, thread_id: &str) -> Option<SessionRecord> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            debug!(target = "buildlist.sessions", error = %err, "redis_unavailable");
            return None;
        }
    };
    let raw: Option<String> = conn.get(format!("{KEY_PREFIX}{thread_id}")).await.ok();
    raw.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, record: &SessionRecord, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(record)
    {
        let key = format!("{KEY_PREFIX}{}", record.thread_id);
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductItem;

    #[tokio::test]
    async fn touch_counts_turns_and_tolerates_missing_entries() {
        let store = SessionStore::in_memory();
        store.touch("thread_a", SessionMode::Live).await;
        store.touch("thread_a", SessionMode::Live).await;
        let record = store.get("thread_a").await.expect("record");
        assert_eq!(record.turns, 2);
        assert_eq!(record.mode, SessionMode::Live);
        assert!(store.get("thread_b").await.is_none());
    }

    #[tokio::test]
    async fn recommendations_only_attach_to_known_threads() {
        let store = SessionStore::in_memory();
        let recs = Recommendations {
            materials: vec![ProductItem::named("Grout")],
            tools: vec![],
        };
        store.remember_recommendations("ghost", &recs).await;
        assert_eq!(store.count().await, 0);

        store.open("thread_a", SessionMode::Mock).await;
        store.remember_recommendations("thread_a", &recs).await;
        let record = store.get("thread_a").await.unwrap();
        assert_eq!(record.last_recommendations, Some(recs));
        assert_eq!(record.turns, 0);
    }
}
