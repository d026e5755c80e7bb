//! 변경 로그 관리 API
//!
//! 컨슈머가 의존하는 백엔드 표면:
//! 1. 테이블의 변경 로그 활성화
//! 2. 로그 describe (샤드 목록 + 최신 로그 식별자)
//! 3. trim-horizon 위치로 커서 열기
//! 4. 커서로 레코드 읽기

use crate::cursor::{Cursor, ShardId};
use crate::error::Result;
use crate::events::{ChangeRecord, Item};
use async_trait::async_trait;

/// 레코드 보기 방식. 로컬 하네스는 변경 전후 이미지를 모두 기록한다
pub const STREAM_VIEW_TYPE: &str = "NEW_AND_OLD_IMAGES";

/// 한 번에 쓸 수 있는 최대 아이템 수 (플랫폼 제한)
pub const BATCH_WRITE_LIMIT: usize = 25;

/// 한 번의 읽기로 받을 수 있는 최대 레코드 수 (플랫폼 제한)
pub const MAX_RECORDS_PER_READ: u32 = 1000;

/// describe 로 얻은 샤드 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescription {
    pub shard_id: ShardId,
    /// 이 샤드가 이어받은 부모 샤드
    pub parent_shard_id: Option<ShardId>,
    /// 닫힌 샤드는 더 이상 레코드가 추가되지 않음
    pub closed: bool,
}

/// 변경 로그 describe 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub table: String,
    /// 최신 로그 식별자 (로그가 재생성되면 바뀜)
    pub stream_label: String,
    pub shards: Vec<ShardDescription>,
}

impl StreamDescription {
    pub fn shard(&self, shard_id: &ShardId) -> Option<&ShardDescription> {
        self.shards.iter().find(|s| &s.shard_id == shard_id)
    }

    /// `parent` 를 이어받은 첫 번째 자식 샤드. 갈라진 나머지 자식은 discover 가 맡는다
    pub fn successor_of(&self, parent: &ShardId) -> Option<&ShardDescription> {
        self.shards
            .iter()
            .find(|s| s.parent_shard_id.as_ref() == Some(parent))
    }
}

/// 한 번의 읽기 결과
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<ChangeRecord>,
    /// 샤드가 닫히고 모두 읽었으면 `None`
    pub next_cursor: Option<Cursor>,
}

/// 변경 로그 관리 API
///
/// 만료된 커서는 `StreamError::ExpiredCursor`, 보존 기간 밖 위치는
/// `StreamError::TrimmedData` 로 알려야 한다.
#[async_trait]
pub trait StreamApi: Send + Sync {
    /// 테이블 목록 조회 (준비 상태 확인용 메타데이터 쿼리)
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// 변경 로그 활성화. 이미 켜져 있으면 `StreamAlreadyEnabled`
    async fn enable_stream(&self, table: &str) -> Result<()>;

    async fn describe_stream(&self, table: &str) -> Result<StreamDescription>;

    /// 샤드의 가장 이른 보존 위치(trim-horizon)를 가리키는 커서
    async fn open_cursor(&self, table: &str, shard: &ShardId) -> Result<Cursor>;

    async fn get_records(&self, cursor: &Cursor, limit: u32) -> Result<RecordPage>;
}

/// 아이템 일괄 쓰기 대상 (Seeder 가 사용)
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// 최대 `BATCH_WRITE_LIMIT` 개 아이템 쓰기
    async fn batch_write(&self, table: &str, items: Vec<Item>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description() -> StreamDescription {
        StreamDescription {
            table: "orders".to_string(),
            stream_label: "2026-10-16T00:00:00.000".to_string(),
            shards: vec![
                ShardDescription {
                    shard_id: ShardId::new("shard-1"),
                    parent_shard_id: None,
                    closed: true,
                },
                ShardDescription {
                    shard_id: ShardId::new("shard-2"),
                    parent_shard_id: Some(ShardId::new("shard-1")),
                    closed: false,
                },
            ],
        }
    }

    #[test]
    fn test_successor_lookup() {
        let desc = description();
        let child = desc.successor_of(&ShardId::new("shard-1")).unwrap();
        assert_eq!(child.shard_id, ShardId::new("shard-2"));
        assert!(desc.successor_of(&ShardId::new("shard-2")).is_none());
        assert!(desc.shard(&ShardId::new("shard-1")).unwrap().closed);
    }
}
