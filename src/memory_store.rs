//! 에뮬레이션 테이블 저장소
//!
//! 로컬 개발용 인메모리 백엔드. 아이템 쓰기가 일어나면 변경 로그가 켜진
//! 테이블에 한해 열린 샤드 끝에 레코드를 덧붙인다. 커서 만료, 보존 기간
//! 트림, 샤드 교체를 재현하는 훅을 함께 제공한다.

use crate::cursor::{Cursor, SequenceNumber, ShardId};
use crate::error::{Result, StreamError};
use crate::events::{AttributeValue, ChangeRecord, Item, OperationType};
use crate::stream_api::{
    RecordPage, ShardDescription, StreamApi, StreamDescription, TableWriter, BATCH_WRITE_LIMIT,
    STREAM_VIEW_TYPE,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// 발급된 커서의 유효 시간 (플랫폼 기본값 15분)
pub const DEFAULT_CURSOR_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
struct ShardState {
    id: ShardId,
    parent: Option<ShardId>,
    records: Vec<ChangeRecord>,
    closed: bool,
    /// 이 순번 미만은 잘려나감
    trim_horizon: u64,
}

#[derive(Debug)]
struct StreamState {
    label: String,
    shards: Vec<ShardState>,
}

impl StreamState {
    fn open_shard(&mut self) -> Option<&mut ShardState> {
        self.shards.iter_mut().find(|s| !s.closed)
    }

    fn shard(&self, id: &ShardId) -> Option<&ShardState> {
        self.shards.iter().find(|s| &s.id == id)
    }
}

#[derive(Debug)]
struct TableState {
    partition_key: String,
    items: BTreeMap<String, Item>,
    stream: Option<StreamState>,
}

#[derive(Debug, Clone)]
struct CursorState {
    table: String,
    shard: ShardId,
    /// 다음에 읽을 최소 순번
    from: u64,
    issued_at: Instant,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, TableState>,
    cursors: HashMap<String, CursorState>,
    next_sequence: u64,
    shard_counter: u64,
    unavailable: bool,
}

impl StoreState {
    fn table(&self, name: &str) -> Result<&TableState> {
        self.tables
            .get(name)
            .ok_or_else(|| StreamError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableState> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StreamError::TableNotFound(name.to_string()))
    }

    fn new_shard(&mut self, parent: Option<ShardId>) -> ShardState {
        self.shard_counter += 1;
        let suffix = Uuid::new_v4().simple().to_string();
        ShardState {
            id: ShardId::new(format!("shardId-{:08}-{}", self.shard_counter, &suffix[..8])),
            parent,
            records: Vec::new(),
            closed: false,
            trim_horizon: 0,
        }
    }

    fn issue_cursor(&mut self, table: &str, shard: ShardId, from: u64, ttl: Duration) -> Cursor {
        self.cursors.retain(|_, c| c.issued_at.elapsed() <= ttl);
        let token = Uuid::new_v4().to_string();
        self.cursors.insert(
            token.clone(),
            CursorState {
                table: table.to_string(),
                shard,
                from,
                issued_at: Instant::now(),
            },
        );
        Cursor::new(token)
    }

    /// 변경 로그가 켜져 있으면 열린 샤드에 레코드 추가
    fn append_record(
        &mut self,
        table: &str,
        op: OperationType,
        keys: Item,
        old_image: Option<Item>,
        new_image: Option<Item>,
    ) {
        let sequence = self.next_sequence;
        let Some(shard) = self
            .tables
            .get_mut(table)
            .and_then(|t| t.stream.as_mut())
            .and_then(|s| s.open_shard())
        else {
            return;
        };

        shard.records.push(ChangeRecord {
            event_id: Uuid::new_v4().to_string(),
            event_name: op,
            table: table.to_string(),
            shard_id: shard.id.clone(),
            sequence_number: SequenceNumber(sequence),
            approximate_creation: Utc::now(),
            keys,
            old_image,
            new_image,
        });
        self.next_sequence += 1;
        debug!("Appended {} record #{} to {}", op.as_str(), sequence, table);
    }
}

/// 인메모리 테이블 저장소
pub struct MemoryStore {
    state: RwLock<StoreState>,
    cursor_ttl: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::with_cursor_ttl(DEFAULT_CURSOR_TTL)
    }

    pub fn with_cursor_ttl(cursor_ttl: Duration) -> Self {
        MemoryStore {
            state: RwLock::new(StoreState {
                next_sequence: 1,
                ..Default::default()
            }),
            cursor_ttl,
        }
    }

    /// 테이블 생성. 이미 있으면 그대로 둔다
    pub fn create_table(&self, name: &str, partition_key: &str) {
        let mut state = self.state.write();
        state.tables.entry(name.to_string()).or_insert_with(|| {
            info!("Created table {} (partition key: {})", name, partition_key);
            TableState {
                partition_key: partition_key.to_string(),
                items: BTreeMap::new(),
                stream: None,
            }
        });
    }

    /// 아이템 쓰기 (있으면 교체)
    pub fn put_item(&self, table: &str, item: Item) -> Result<()> {
        let mut state = self.state.write();
        let table_state = state.table_mut(table)?;
        let (key, keys) = key_of(&table_state.partition_key, &item)?;
        let old = table_state.items.insert(key, item.clone());

        let op = if old.is_some() {
            OperationType::Modify
        } else {
            OperationType::Insert
        };
        state.append_record(table, op, keys, old, Some(item));
        Ok(())
    }

    /// 기존 아이템에 속성 덮어쓰기
    pub fn update_item(&self, table: &str, key: &AttributeValue, updates: Item) -> Result<()> {
        let mut state = self.state.write();
        let table_state = state.table_mut(table)?;
        let key_str = key_string(key)?;
        let old = table_state
            .items
            .get(&key_str)
            .cloned()
            .ok_or_else(|| StreamError::Validation(format!("no item with key {}", key_str)))?;

        let mut new = old.clone();
        new.extend(updates);
        table_state.items.insert(key_str, new.clone());

        let mut keys = Item::new();
        keys.insert(table_state.partition_key.clone(), key.clone());
        state.append_record(table, OperationType::Modify, keys, Some(old), Some(new));
        Ok(())
    }

    pub fn delete_item(&self, table: &str, key: &AttributeValue) -> Result<Option<Item>> {
        let mut state = self.state.write();
        let table_state = state.table_mut(table)?;
        let key_str = key_string(key)?;
        let old = table_state.items.remove(&key_str);

        if let Some(ref old_item) = old {
            let mut keys = Item::new();
            keys.insert(table_state.partition_key.clone(), key.clone());
            state.append_record(table, OperationType::Remove, keys, Some(old_item.clone()), None);
        }
        Ok(old)
    }

    pub fn get_item(&self, table: &str, key: &AttributeValue) -> Result<Option<Item>> {
        let state = self.state.read();
        let key_str = key_string(key)?;
        Ok(state.table(table)?.items.get(&key_str).cloned())
    }

    pub fn scan(&self, table: &str) -> Result<Vec<Item>> {
        let state = self.state.read();
        Ok(state.table(table)?.items.values().cloned().collect())
    }

    /// 발급된 모든 커서를 무효화 (만료 재현)
    pub fn expire_cursors(&self) {
        let mut state = self.state.write();
        let count = state.cursors.len();
        state.cursors.clear();
        debug!("Expired {} cursors", count);
    }

    /// `before` 미만 순번의 레코드를 모두 잘라냄. 비어버린 닫힌 샤드는 제거
    ///
    /// 아직 발급되지 않은 순번까지 잘라내지는 않는다.
    pub fn trim(&self, table: &str, before: SequenceNumber) -> Result<()> {
        let mut state = self.state.write();
        let horizon = before.0.min(state.next_sequence);
        let stream = state
            .table_mut(table)?
            .stream
            .as_mut()
            .ok_or_else(|| StreamError::StreamNotEnabled(table.to_string()))?;

        for shard in stream.shards.iter_mut() {
            shard.records.retain(|r| r.sequence_number.0 >= horizon);
            shard.trim_horizon = shard.trim_horizon.max(horizon);
        }
        stream.shards.retain(|s| !(s.closed && s.records.is_empty()));
        info!("Trimmed {} before {}", table, SequenceNumber(horizon));
        Ok(())
    }

    /// 열린 샤드를 닫고 자식 샤드를 새로 연다
    pub fn rotate_shard(&self, table: &str) -> Result<ShardId> {
        let mut state = self.state.write();
        let parent = {
            let stream = state
                .table_mut(table)?
                .stream
                .as_mut()
                .ok_or_else(|| StreamError::StreamNotEnabled(table.to_string()))?;
            let open = stream
                .open_shard()
                .ok_or_else(|| StreamError::Validation(format!("{} has no open shard", table)))?;
            open.closed = true;
            open.id.clone()
        };

        let child = state.new_shard(Some(parent.clone()));
        let child_id = child.id.clone();
        if let Some(stream) = state.table_mut(table)?.stream.as_mut() {
            stream.shards.push(child);
        }
        info!("Rotated {}: {} -> {}", table, parent, child_id);
        Ok(child_id)
    }

    /// 백엔드 장애 재현. `false` 면 모든 API 호출이 연결 에러
    pub fn set_available(&self, available: bool) {
        self.state.write().unavailable = !available;
    }

    fn check_available(&self) -> Result<()> {
        if self.state.read().unavailable {
            return Err(StreamError::Connection(
                "table store is not accepting connections".to_string(),
            ));
        }
        Ok(())
    }
}

fn key_string(value: &AttributeValue) -> Result<String> {
    value
        .as_string()
        .ok_or_else(|| StreamError::Validation("key must be a scalar attribute".to_string()))
}

fn key_of(partition_key: &str, item: &Item) -> Result<(String, Item)> {
    let value = item.get(partition_key).ok_or_else(|| {
        StreamError::Validation(format!("item is missing partition key {}", partition_key))
    })?;
    let mut keys = Item::new();
    keys.insert(partition_key.to_string(), value.clone());
    Ok((key_string(value)?, keys))
}

#[async_trait]
impl StreamApi for MemoryStore {
    async fn list_tables(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let mut names: Vec<String> = self.state.read().tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn enable_stream(&self, table: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write();
        if state.table(table)?.stream.is_some() {
            return Err(StreamError::StreamAlreadyEnabled(table.to_string()));
        }

        let shard = state.new_shard(None);
        let label = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();
        state.table_mut(table)?.stream = Some(StreamState {
            label,
            shards: vec![shard],
        });
        info!("Enabled change stream on {} ({})", table, STREAM_VIEW_TYPE);
        Ok(())
    }

    async fn describe_stream(&self, table: &str) -> Result<StreamDescription> {
        self.check_available()?;
        let state = self.state.read();
        let stream = state
            .table(table)?
            .stream
            .as_ref()
            .ok_or_else(|| StreamError::StreamNotEnabled(table.to_string()))?;

        Ok(StreamDescription {
            table: table.to_string(),
            stream_label: stream.label.clone(),
            shards: stream
                .shards
                .iter()
                .map(|s| ShardDescription {
                    shard_id: s.id.clone(),
                    parent_shard_id: s.parent.clone(),
                    closed: s.closed,
                })
                .collect(),
        })
    }

    async fn open_cursor(&self, table: &str, shard: &ShardId) -> Result<Cursor> {
        self.check_available()?;
        let mut state = self.state.write();
        let from = {
            let stream = state
                .table(table)?
                .stream
                .as_ref()
                .ok_or_else(|| StreamError::StreamNotEnabled(table.to_string()))?;
            let shard_state = stream.shard(shard).ok_or_else(|| {
                StreamError::Validation(format!("shard {} not found in {}", shard, table))
            })?;
            shard_state.trim_horizon
        };
        Ok(state.issue_cursor(table, shard.clone(), from, self.cursor_ttl))
    }

    async fn get_records(&self, cursor: &Cursor, limit: u32) -> Result<RecordPage> {
        self.check_available()?;
        let mut state = self.state.write();
        let cursor_state = state
            .cursors
            .get(cursor.as_str())
            .filter(|c| c.issued_at.elapsed() <= self.cursor_ttl)
            .cloned()
            .ok_or_else(|| StreamError::ExpiredCursor(cursor.to_string()))?;

        let (records, next_from, drained) = {
            let stream = state
                .table(&cursor_state.table)?
                .stream
                .as_ref()
                .ok_or_else(|| StreamError::StreamNotEnabled(cursor_state.table.clone()))?;
            let shard = stream
                .shard(&cursor_state.shard)
                .ok_or_else(|| StreamError::TrimmedData(cursor.to_string()))?;
            if cursor_state.from < shard.trim_horizon {
                return Err(StreamError::TrimmedData(cursor.to_string()));
            }

            let pending: Vec<&ChangeRecord> = shard
                .records
                .iter()
                .filter(|r| r.sequence_number.0 >= cursor_state.from)
                .collect();
            let taken: Vec<ChangeRecord> = pending
                .iter()
                .take(limit as usize)
                .map(|r| (*r).clone())
                .collect();
            let next_from = taken
                .last()
                .map(|r| r.sequence_number.0 + 1)
                .unwrap_or(cursor_state.from);
            let drained = shard.closed && taken.len() == pending.len();
            (taken, next_from, drained)
        };

        let next_cursor = if drained {
            None
        } else {
            Some(state.issue_cursor(
                &cursor_state.table,
                cursor_state.shard.clone(),
                next_from,
                self.cursor_ttl,
            ))
        };

        Ok(RecordPage {
            records,
            next_cursor,
        })
    }
}

#[async_trait]
impl TableWriter for MemoryStore {
    async fn batch_write(&self, table: &str, items: Vec<Item>) -> Result<()> {
        self.check_available()?;
        if items.len() > BATCH_WRITE_LIMIT {
            return Err(StreamError::Validation(format!(
                "batch of {} items exceeds the limit of {}",
                items.len(),
                BATCH_WRITE_LIMIT
            )));
        }
        for item in items {
            self.put_item(table, item)?;
        }
        Ok(())
    }
}
