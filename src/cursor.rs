//! 샤드 위치 추적 (Cursor 및 ShardMap 엔트리)
//!
//! 변경 로그는 테이블별로 여러 샤드로 나뉘며, 각 샤드마다 다음 읽기 위치를
//! 나타내는 불투명 토큰(Cursor)을 하나씩 유지합니다.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 샤드 식별자 (e.g., "shardId-00000001-6f1c0b2e")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 샤드 내 레코드 순번. 한 샤드 안에서는 전순서를 가짐
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:021}", self.0)
    }
}

/// 샤드 읽기 위치 토큰
///
/// trim-horizon 요청으로 받은 것이든 fetch 결과로 받은 continuation 이든
/// 컨슈머 입장에서는 구분 없이 다음 fetch 에 그대로 넘긴다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 토큰은 길어서 앞부분만
        let shown: String = self.0.chars().take(16).collect();
        if shown.len() < self.0.len() {
            write!(f, "{}…", shown)
        } else {
            f.write_str(&self.0)
        }
    }
}

/// ShardMap 키: (테이블, 샤드)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    pub table: String,
    pub shard: ShardId,
}

impl ShardKey {
    pub fn new(table: impl Into<String>, shard: ShardId) -> Self {
        ShardKey {
            table: table.into(),
            shard,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.shard)
    }
}

/// 샤드 하나의 현재 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEntry {
    pub key: ShardKey,
    /// 다음 fetch 에 사용할 커서
    pub cursor: Cursor,
    /// 마지막으로 핸들러에 전달한 레코드 순번
    pub last_sequence: Option<SequenceNumber>,
}

impl ShardEntry {
    pub fn new(key: ShardKey, cursor: Cursor) -> Self {
        ShardEntry {
            key,
            cursor,
            last_sequence: None,
        }
    }

    /// 이미 전달한 레코드인지 여부
    pub fn already_delivered(&self, sequence: SequenceNumber) -> bool {
        self.last_sequence.is_some_and(|last| sequence <= last)
    }
}

/// (테이블, 샤드) → 엔트리. Shard Tracker 만 변경한다
pub type ShardMap = HashMap<ShardKey, ShardEntry>;

/// 컨슈머 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}
