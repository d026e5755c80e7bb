//! 백엔드 저장소 수명 관리
//!
//! `start` 는 저장소가 메타데이터 쿼리에 응답할 때까지 기다린 뒤에 반환한다.

use crate::config::TableDefinition;
use crate::error::{Result, StreamError};
use crate::memory_store::MemoryStore;
use crate::stream_api::StreamApi;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// 준비 확인 재시도 간격
const READY_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// 백엔드 접속 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub port: u16,
}

#[async_trait]
pub trait BackingStore: Send {
    async fn start(&mut self, port: u16) -> Result<Endpoint>;
    async fn stop(&mut self) -> Result<()>;
}

/// 테이블 목록 조회가 성공할 때까지 대기
pub async fn wait_until_ready(api: &dyn StreamApi, timeout: Duration) -> Result<usize> {
    let deadline = Instant::now() + timeout;
    loop {
        match api.list_tables().await {
            Ok(tables) => return Ok(tables.len()),
            Err(e) if Instant::now() + READY_RETRY_INTERVAL <= deadline => {
                warn!("{}, table connection not ready, trying again", e);
                sleep(READY_RETRY_INTERVAL).await;
            }
            Err(e) => {
                return Err(StreamError::Connection(format!(
                    "table store did not become ready: {}",
                    e
                )))
            }
        }
    }
}

/// 프로세스 내부에서 도는 에뮬레이션 저장소
pub struct EmbeddedStore {
    tables: Vec<TableDefinition>,
    ready_timeout: Duration,
    store: Option<Arc<MemoryStore>>,
}

impl EmbeddedStore {
    pub fn new(tables: Vec<TableDefinition>) -> Self {
        EmbeddedStore {
            tables,
            ready_timeout: Duration::from_secs(30),
            store: None,
        }
    }

    /// 실행 중인 저장소. `start` 전이면 `None`
    pub fn store(&self) -> Option<Arc<MemoryStore>> {
        self.store.clone()
    }
}

#[async_trait]
impl BackingStore for EmbeddedStore {
    async fn start(&mut self, port: u16) -> Result<Endpoint> {
        if self.store.is_some() {
            return Err(StreamError::InvalidState(
                "table store is already running".to_string(),
            ));
        }
        info!("Launching embedded table store");

        let store = Arc::new(MemoryStore::new());
        for table in &self.tables {
            store.create_table(&table.name, &table.partition_key);
        }
        let count = wait_until_ready(&*store, self.ready_timeout).await?;
        self.store = Some(store);

        let endpoint = Endpoint {
            url: format!("http://localhost:{}", port),
            port,
        };
        info!("Table store ready at {} ({} table(s))", endpoint.url, count);
        Ok(endpoint)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.store.take().is_some() {
            info!("Embedded table store stopped");
        }
        Ok(())
    }
}
