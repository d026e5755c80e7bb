//! 로컬 테이블 변경 스트림 하네스
//!
//! 에뮬레이션 저장소의 변경 로그를 읽어 실제 서비스에서 온 것처럼
//! 등록된 핸들러에 전달합니다.
//! 주요 기능:
//! - 샤드 발견 및 샤드별 커서 관리
//! - 고정 주기 폴링과 배치 전달
//! - 커서 만료/트림 시 자동 재구성
//! - 취소 신호 기반 정상 종료
//! - 시드 파일 적재

pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod memory_store;
pub mod poller;
pub mod scheduler;
pub mod seeder;
pub mod shard_tracker;
pub mod stream_api;
pub mod supervisor;

pub use config::{ConsumerConfig, HandlerBinding, HarnessConfig, MonitoredTable};
pub use cursor::{ConsumerState, Cursor, ShardId};
pub use dispatcher::{Dispatcher, HandlerInvoker};
pub use error::{Result, StreamError};
pub use events::{AttributeValue, ChangeRecord, OperationType, StreamEvent};
pub use memory_store::MemoryStore;
pub use scheduler::StreamConsumer;
pub use seeder::Seeder;
pub use stream_api::StreamApi;
