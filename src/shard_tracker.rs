//! Shard Tracker - 테이블별 샤드 → 커서 매핑 관리
//!
//! ShardMap 의 유일한 소유자. 구독 시작(initialize), 커서 무효화 후 재구성
//! (refresh), 닫힌 샤드의 자식 발견(discover) 모두 여기서 일어나며, 같은
//! 샤드가 두 번 등록되지 않도록 등록은 락 안에서 한 번에 처리한다.

use crate::cursor::{Cursor, SequenceNumber, ShardEntry, ShardId, ShardKey, ShardMap};
use crate::error::{Result, StreamError};
use crate::stream_api::StreamApi;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct TrackerState {
    shards: ShardMap,
    /// 끝까지 읽은 샤드. 다시 등록하지 않는다
    drained: HashSet<ShardKey>,
}

pub struct ShardTracker {
    api: Arc<dyn StreamApi>,
    state: RwLock<TrackerState>,
}

impl ShardTracker {
    pub fn new(api: Arc<dyn StreamApi>) -> Self {
        ShardTracker {
            api,
            state: RwLock::new(TrackerState::default()),
        }
    }

    /// 변경 로그를 켜고 현재 샤드마다 trim-horizon 커서를 발급
    ///
    /// 이미 켜진 로그는 성공으로 취급한다. 테이블이나 로그가 없으면 에러를
    /// 그대로 돌려준다 (설정 오류).
    pub async fn initialize(&self, table: &str) -> Result<Vec<ShardEntry>> {
        match self.api.enable_stream(table).await {
            Ok(()) => info!("Enabled change log on {}", table),
            Err(StreamError::StreamAlreadyEnabled(_)) => {
                debug!("Change log already enabled on {}", table)
            }
            Err(e) => return Err(e),
        }

        let entries = self.discover(table).await?;
        info!("Tracking {} shard(s) of {}", entries.len(), table);
        Ok(entries)
    }

    /// 아직 추적하지 않는 샤드를 찾아 등록
    pub async fn discover(&self, table: &str) -> Result<Vec<ShardEntry>> {
        let description = self.api.describe_stream(table).await?;

        let mut entries = Vec::new();
        for shard in &description.shards {
            let key = ShardKey::new(table, shard.shard_id.clone());
            if self.is_known(&key) {
                continue;
            }
            let cursor = self.api.open_cursor(table, &shard.shard_id).await?;
            if let Some(entry) = self.claim(ShardEntry::new(key, cursor)) {
                debug!("Discovered shard {}", entry.key);
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// 커서 무효화 후 샤드 엔트리 재구성
    ///
    /// 기존 엔트리는 먼저 제거된다. 샤드가 사라졌으면 자식 샤드로 넘어가고,
    /// 둘 다 없거나 자식을 이미 다른 루프가 맡고 있으면 `None`.
    pub async fn refresh(&self, table: &str, shard: &ShardId) -> Result<Option<ShardEntry>> {
        let old_key = ShardKey::new(table, shard.clone());
        let previous = self.state.write().shards.remove(&old_key);
        let last_sequence = previous.and_then(|e| e.last_sequence);

        let description = self.api.describe_stream(table).await?;
        let target = if description.shard(shard).is_some() {
            shard.clone()
        } else if let Some(successor) = description.successor_of(shard) {
            info!(
                "Shard {} is gone, continuing with successor {}",
                old_key, successor.shard_id
            );
            successor.shard_id.clone()
        } else {
            warn!("Shard {} is gone and has no successor", old_key);
            self.state.write().drained.insert(old_key);
            return Ok(None);
        };

        let cursor = self.api.open_cursor(table, &target).await?;
        let mut entry = ShardEntry::new(ShardKey::new(table, target.clone()), cursor);
        if &target == shard {
            entry.last_sequence = last_sequence;
        } else {
            self.state.write().drained.insert(old_key);
        }

        let claimed = self.claim(entry);
        if let Some(ref entry) = claimed {
            info!("Refreshed cursor for {} at trim horizon", entry.key);
        }
        Ok(claimed)
    }

    /// fetch 성공 후 다음 커서 저장
    pub fn advance(
        &self,
        key: &ShardKey,
        next: Cursor,
        delivered: Option<SequenceNumber>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let entry = state
            .shards
            .get_mut(key)
            .ok_or_else(|| StreamError::InvalidState(format!("shard {} is not tracked", key)))?;
        entry.cursor = next;
        if let Some(sequence) = delivered {
            entry.last_sequence = Some(entry.last_sequence.map_or(sequence, |s| s.max(sequence)));
        }
        Ok(())
    }

    /// 끝까지 읽은 샤드를 추적 대상에서 제외
    pub fn retire(&self, key: &ShardKey) {
        let mut state = self.state.write();
        state.shards.remove(key);
        state.drained.insert(key.clone());
        debug!("Retired shard {}", key);
    }

    /// `table` 의 샤드를 하나라도 추적 중인지 여부
    pub fn is_tracking(&self, table: &str) -> bool {
        self.state.read().shards.keys().any(|key| key.table == table)
    }

    pub fn entry(&self, key: &ShardKey) -> Option<ShardEntry> {
        self.state.read().shards.get(key).cloned()
    }

    /// 현재 ShardMap 사본 (키 순 정렬)
    pub fn snapshot(&self) -> Vec<ShardEntry> {
        let mut entries: Vec<ShardEntry> = self.state.read().shards.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    fn is_known(&self, key: &ShardKey) -> bool {
        let state = self.state.read();
        state.shards.contains_key(key) || state.drained.contains(key)
    }

    /// 샤드 하나에는 엔트리 하나만. 이미 있으면 `None`
    fn claim(&self, entry: ShardEntry) -> Option<ShardEntry> {
        let mut state = self.state.write();
        if state.shards.contains_key(&entry.key) || state.drained.contains(&entry.key) {
            return None;
        }
        state.shards.insert(entry.key.clone(), entry.clone());
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::marshall_item;
    use crate::memory_store::MemoryStore;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, ShardTracker) {
        let store = Arc::new(MemoryStore::new());
        store.create_table("orders", "id");
        let tracker = ShardTracker::new(store.clone());
        (store, tracker)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_store, tracker) = setup();
        let first = tracker.initialize("orders").await.unwrap();
        assert_eq!(first.len(), 1);

        // 두 번째 호출은 이미 켜진 로그를 그대로 쓰고, 이미 추적 중인 샤드는 건너뜀
        let second = tracker.initialize("orders").await.unwrap();
        assert!(second.is_empty());
        assert_eq!(tracker.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_unknown_table_fails() {
        let (_store, tracker) = setup();
        let err = tracker.initialize("nope").await.unwrap_err();
        assert!(matches!(err, StreamError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_refresh_replaces_cursor_and_keeps_progress() {
        let (_store, tracker) = setup();
        let entry = tracker.initialize("orders").await.unwrap().remove(0);

        tracker
            .advance(&entry.key, Cursor::new("continuation"), Some(SequenceNumber(7)))
            .unwrap();
        let refreshed = tracker
            .refresh("orders", &entry.key.shard)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(refreshed.key, entry.key);
        assert_ne!(refreshed.cursor, Cursor::new("continuation"));
        assert_eq!(refreshed.last_sequence, Some(SequenceNumber(7)));
        assert_eq!(tracker.entry(&entry.key), Some(refreshed));
    }

    #[tokio::test]
    async fn test_refresh_moves_to_successor() {
        let (store, tracker) = setup();
        let entry = tracker.initialize("orders").await.unwrap().remove(0);
        store
            .put_item("orders", marshall_item(&json!({"id": "a"})).unwrap())
            .unwrap();
        let child = store.rotate_shard("orders").unwrap();
        store.trim("orders", SequenceNumber(2)).unwrap();

        let refreshed = tracker
            .refresh("orders", &entry.key.shard)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.key.shard, child);
        assert_eq!(refreshed.last_sequence, None);
        assert!(tracker.entry(&entry.key).is_none());
    }

    #[tokio::test]
    async fn test_discover_skips_drained_and_tracked() {
        let (store, tracker) = setup();
        let entry = tracker.initialize("orders").await.unwrap().remove(0);
        let child = store.rotate_shard("orders").unwrap();

        tracker.retire(&entry.key);
        let found = tracker.discover("orders").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.shard, child);

        assert!(tracker.discover("orders").await.unwrap().is_empty());
    }

    #[test]
    fn test_advance_untracked_shard() {
        let (_store, tracker) = setup();
        let key = ShardKey::new("orders", ShardId::new("ghost"));
        let err = tracker.advance(&key, Cursor::new("c"), None).unwrap_err();
        assert!(matches!(err, StreamError::InvalidState(_)));
    }
}
