//! 시드 파일로 테이블 초기 데이터 적재
//!
//! 파일 형식: `{ "<테이블명>": [ {아이템}, ... ], ... }`
//! 아이템은 일반 JSON 으로 적고, 적재 시 타입 태그가 붙은 형식으로 변환된다.

use crate::error::{Result, StreamError};
use crate::events::{marshall_item, Item};
use crate::stream_api::{TableWriter, BATCH_WRITE_LIMIT};
use serde_json::Value;
use std::path::Path;
use tracing::{error, info, warn};

/// 호스트 프레임워크가 자체 시딩에 쓰는 파일명. 이 이름이면 건너뛴다
pub const RESERVED_SEED_FILES: [&str; 2] = ["sandbox-seed.json", "sandbox-seed.js"];

/// 적재 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub tables: usize,
    pub items: usize,
    pub batches: usize,
}

pub struct Seeder;

impl Seeder {
    /// 시드 파일을 읽어 배치 단위로 쓴다
    ///
    /// 예약된 파일명이거나 파일이 없으면 아무것도 쓰지 않는다.
    pub async fn seed(path: &Path, writer: &dyn TableWriter) -> Result<SeedReport> {
        if Self::is_reserved(path) {
            warn!(
                "The seed file {} matches the host framework's default seed pattern and will be \
                 seeded by it instead, which may trigger many stream handler invocations. \
                 Rename the file to use this seeder.",
                path.display()
            );
            return Ok(SeedReport::default());
        }

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Seed file {} not found, skipping", path.display());
                return Ok(SeedReport::default());
            }
            Err(e) => return Err(e.into()),
        };

        let data: Value = serde_json::from_str(&raw)?;
        let tables = parse_seed(&data)?;

        let mut report = SeedReport::default();
        for (table, items) in tables {
            report.tables += 1;
            report.items += items.len();
            for chunk in items.chunks(BATCH_WRITE_LIMIT) {
                writer.batch_write(&table, chunk.to_vec()).await?;
                report.batches += 1;
            }
        }

        info!(
            "Seeded {} item(s) into {} table(s) from {}",
            report.items,
            report.tables,
            path.display()
        );
        Ok(report)
    }

    /// `seed` 와 같지만 실패해도 에러를 기록만 하고 빈 결과를 돌려준다
    pub async fn seed_or_log(path: &Path, writer: &dyn TableWriter) -> SeedReport {
        match Self::seed(path, writer).await {
            Ok(report) => report,
            Err(e) => {
                error!("Error seeding data from {}: {}", path.display(), e);
                SeedReport::default()
            }
        }
    }

    pub fn is_reserved(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| RESERVED_SEED_FILES.contains(&name))
    }
}

fn parse_seed(data: &Value) -> Result<Vec<(String, Vec<Item>)>> {
    let tables = data
        .as_object()
        .ok_or_else(|| StreamError::Validation("seed file must be a JSON object".to_string()))?;

    tables
        .iter()
        .map(|(table, items)| {
            let items = items.as_array().ok_or_else(|| {
                StreamError::Validation(format!("seed data for {} must be an array", table))
            })?;
            let items = items.iter().map(marshall_item).collect::<Result<Vec<_>>>()?;
            Ok((table.clone(), items))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingWriter {
        batches: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl TableWriter for RecordingWriter {
        async fn batch_write(&self, table: &str, items: Vec<Item>) -> Result<()> {
            self.batches.lock().push((table.to_string(), items.len()));
            Ok(())
        }
    }

    fn temp_seed(name: &str, content: &Value) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("seed-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string(content).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_chunks_into_batches_of_25() {
        let items: Vec<Value> = (0..60).map(|i| json!({"id": i})).collect();
        let path = temp_seed("seed.json", &json!({"products": items}));
        let writer = RecordingWriter::default();

        let report = Seeder::seed(&path, &writer).await.unwrap();

        assert_eq!(report, SeedReport { tables: 1, items: 60, batches: 3 });
        let sizes: Vec<usize> = writer.batches.lock().iter().map(|(_, n)| *n).collect();
        assert_eq!(sizes, vec![25, 25, 10]);
    }

    #[tokio::test]
    async fn test_reserved_file_is_skipped() {
        let path = temp_seed("sandbox-seed.json", &json!({"products": [{"id": 1}]}));
        let writer = RecordingWriter::default();

        let report = Seeder::seed(&path, &writer).await.unwrap();
        assert_eq!(report, SeedReport::default());
        assert!(writer.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let writer = RecordingWriter::default();
        let report = Seeder::seed(Path::new("/nonexistent/seed.json"), &writer)
            .await
            .unwrap();
        assert_eq!(report.items, 0);
    }

    #[tokio::test]
    async fn test_malformed_seed() {
        let path = temp_seed("seed.json", &json!({"products": {"id": 1}}));
        let writer = RecordingWriter::default();
        assert!(Seeder::seed(&path, &writer).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_failure_is_logged_not_raised() {
        let path = temp_seed("seed.json", &json!(["not", "a", "table", "map"]));
        let writer = RecordingWriter::default();

        let report = Seeder::seed_or_log(&path, &writer).await;
        assert_eq!(report, SeedReport::default());
        assert!(writer.batches.lock().is_empty());
    }
}
