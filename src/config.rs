//! 하네스 설정
//!
//! JSON 설정 파일을 읽은 뒤 환경 변수로 덮어쓴다.
//! - `ARC_DB_EXTERNAL`: 외부 저장소 모드 on/off
//! - `ARC_TABLES_PORT`: 백엔드 포트
//! - `STREAM_POLL_INTERVAL_MS`: 폴링 주기
//! - `SEED_FILE`: 시드 파일 경로

use crate::error::{Result, StreamError};
use crate::stream_api::MAX_RECORDS_PER_READ;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// 설정 파일 경로 기본값
pub const DEFAULT_CONFIG_FILE: &str = "harness.json";

/// 테이블 하나에 등록된 핸들러
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerBinding {
    pub name: String,
    /// 전달 채널 구분용 태그
    #[serde(default)]
    pub tag: Option<String>,
}

impl HandlerBinding {
    pub fn new(name: impl Into<String>) -> Self {
        HandlerBinding {
            name: name.into(),
            tag: None,
        }
    }
}

/// 변경을 감시할 테이블
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTable {
    pub table: String,
    #[serde(default)]
    pub handlers: Vec<HandlerBinding>,
}

impl MonitoredTable {
    pub fn new(table: impl Into<String>, handlers: Vec<HandlerBinding>) -> Self {
        MonitoredTable {
            table: table.into(),
            handlers,
        }
    }
}

/// 에뮬레이션 저장소에 만들 테이블
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub partition_key: String,
}

/// 컨슈머 설정
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub batch_limit: u32,
    pub tables: Vec<MonitoredTable>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            poll_interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(10),
            batch_limit: MAX_RECORDS_PER_READ,
            tables: Vec::new(),
        }
    }
}

/// 하네스 전체 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub enabled: bool,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub batch_limit: u32,
    pub seed_file: Option<PathBuf>,
    pub tables: Vec<TableDefinition>,
    pub streams: Vec<MonitoredTable>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            enabled: false,
            port: 8000,
            poll_interval_ms: 1000,
            fetch_timeout_ms: 10_000,
            batch_limit: MAX_RECORDS_PER_READ,
            seed_file: None,
            tables: Vec::new(),
            streams: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// 설정 파일 로드. 파일이 없으면 기본값
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Ok(HarnessConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: HarnessConfig = serde_json::from_str(&raw)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// 프로세스 환경 변수로 덮어쓰기
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ARC_DB_EXTERNAL") {
            self.enabled = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        if let Some(value) = lookup("ARC_TABLES_PORT") {
            self.port = parse_env("ARC_TABLES_PORT", &value)?;
        }
        if let Some(value) = lookup("STREAM_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env("STREAM_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("SEED_FILE") {
            self.seed_file = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let pattern = Regex::new(r"^[a-zA-Z0-9_.-]{3,255}$")
            .map_err(|e| StreamError::Config(e.to_string()))?;

        let names = self
            .tables
            .iter()
            .map(|t| &t.name)
            .chain(self.streams.iter().map(|s| &s.table));
        for name in names {
            if !pattern.is_match(name) {
                return Err(StreamError::Config(format!("invalid table name: {:?}", name)));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(StreamError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            batch_limit: self.batch_limit,
            tables: self.streams.clone(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StreamError::Config(format!("{} has an invalid value: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.port, 8000);
        assert_eq!(config.consumer_config().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_partial_json() {
        let config: HarnessConfig = serde_json::from_str(
            r#"{
                "tables": [{"name": "products", "partition_key": "productName"}],
                "streams": [{"table": "products", "handlers": [{"name": "products-stream"}]}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.streams[0].handlers, vec![HandlerBinding::new("products-stream")]);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ARC_DB_EXTERNAL", "true"),
            ("ARC_TABLES_PORT", "8111"),
            ("SEED_FILE", "seed.json"),
        ]
        .into_iter()
        .collect();

        let mut config = HarnessConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(config.enabled);
        assert_eq!(config.port, 8111);
        assert_eq!(config.seed_file, Some(PathBuf::from("seed.json")));
    }

    #[test]
    fn test_bad_port() {
        let mut config = HarnessConfig::default();
        let err = config
            .apply_env_from(|key| (key == "ARC_TABLES_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));
    }

    #[test]
    fn test_invalid_table_name() {
        let config = HarnessConfig {
            streams: vec![MonitoredTable::new("a!", Vec::new())],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
