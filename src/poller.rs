//! Stream Poller - 커서 하나를 한 단계 전진
//!
//! 호출 사이에 상태를 갖지 않는다. 커서 만료/트림은 에러가 아니라
//! `FetchOutcome` 값으로 돌려주고, 그 밖의 에러는 손대지 않고 전파한다.
//! 재시도는 하지 않는다 (스케줄러 주기가 재시도 역할).

use crate::cursor::Cursor;
use crate::error::{Result, StreamError};
use crate::events::ChangeRecord;
use crate::stream_api::{StreamApi, MAX_RECORDS_PER_READ};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// fetch 이후 이어갈 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextCursor {
    Continue(Cursor),
    /// 샤드가 닫히고 모두 읽힘
    End,
}

/// fetch 결과
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Batch {
        records: Vec<ChangeRecord>,
        next: NextCursor,
    },
    /// 새 데이터 없음. 그래도 `next` 는 저장해야 함
    Empty { next: NextCursor },
    Expired,
    Trimmed,
}

#[derive(Clone)]
pub struct StreamPoller {
    api: Arc<dyn StreamApi>,
    batch_limit: u32,
    fetch_timeout: Duration,
}

impl StreamPoller {
    pub fn new(api: Arc<dyn StreamApi>, batch_limit: u32, fetch_timeout: Duration) -> Self {
        StreamPoller {
            api,
            batch_limit: batch_limit.clamp(1, MAX_RECORDS_PER_READ),
            fetch_timeout,
        }
    }

    pub async fn fetch(&self, cursor: &Cursor) -> Result<FetchOutcome> {
        let read = self.api.get_records(cursor, self.batch_limit);
        let page = match tokio::time::timeout(self.fetch_timeout, read).await {
            Err(_) => return Err(StreamError::Timeout),
            Ok(Err(StreamError::ExpiredCursor(_))) => {
                debug!("Cursor {} expired", cursor);
                return Ok(FetchOutcome::Expired);
            }
            Ok(Err(StreamError::TrimmedData(_))) => {
                debug!("Cursor {} points before the trim horizon", cursor);
                return Ok(FetchOutcome::Trimmed);
            }
            Ok(result) => result?,
        };

        let next = match page.next_cursor {
            Some(next) => NextCursor::Continue(next),
            None => NextCursor::End,
        };
        if page.records.is_empty() {
            Ok(FetchOutcome::Empty { next })
        } else {
            debug!("Fetched {} record(s) with {}", page.records.len(), cursor);
            Ok(FetchOutcome::Batch {
                records: page.records,
                next,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ShardId;
    use crate::events::marshall_item;
    use crate::memory_store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryStore>, StreamPoller, Cursor) {
        let store = Arc::new(MemoryStore::new());
        store.create_table("orders", "id");
        store.enable_stream("orders").await.unwrap();
        let shard: ShardId = store.describe_stream("orders").await.unwrap().shards[0]
            .shard_id
            .clone();
        let cursor = store.open_cursor("orders", &shard).await.unwrap();
        let poller = StreamPoller::new(store.clone(), 100, Duration::from_secs(5));
        (store, poller, cursor)
    }

    #[tokio::test]
    async fn test_empty_read_still_returns_next() {
        let (_store, poller, cursor) = setup().await;
        match poller.fetch(&cursor).await.unwrap() {
            FetchOutcome::Empty {
                next: NextCursor::Continue(next),
            } => assert_ne!(next, cursor),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch() {
        let (store, poller, cursor) = setup().await;
        store
            .put_item("orders", marshall_item(&json!({"id": "1"})).unwrap())
            .unwrap();

        match poller.fetch(&cursor).await.unwrap() {
            FetchOutcome::Batch { records, next } => {
                assert_eq!(records.len(), 1);
                assert!(matches!(next, NextCursor::Continue(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_is_an_outcome() {
        let (store, poller, cursor) = setup().await;
        store.expire_cursors();
        assert!(matches!(
            poller.fetch(&cursor).await.unwrap(),
            FetchOutcome::Expired
        ));
    }

    #[tokio::test]
    async fn test_transient_error_propagates() {
        let (store, poller, cursor) = setup().await;
        store.set_available(false);
        let err = poller.fetch(&cursor).await.unwrap_err();
        assert!(matches!(err, StreamError::Connection(_)));
    }

    #[tokio::test]
    async fn test_drained_shard_ends() {
        let (store, poller, cursor) = setup().await;
        store.rotate_shard("orders").unwrap();
        assert!(matches!(
            poller.fetch(&cursor).await.unwrap(),
            FetchOutcome::Empty {
                next: NextCursor::End
            }
        ));
    }
}
