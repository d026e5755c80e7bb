//! 스트림 컨슈머 관련 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("테이블을 찾을 수 없음: {0}")]
    TableNotFound(String),

    #[error("스트림이 활성화되지 않음: {0}")]
    StreamNotEnabled(String),

    #[error("이미 스트림이 활성화됨: {0}")]
    StreamAlreadyEnabled(String),

    #[error("커서 만료: {0}")]
    ExpiredCursor(String),

    #[error("보존 기간 밖의 데이터 요청: {0}")]
    TrimmedData(String),

    #[error("읽을 수 있는 샤드가 없음: {0}")]
    NoActiveShard(String),

    #[error("백엔드 연결 에러: {0}")]
    Connection(String),

    #[error("유효성 검사 에러: {0}")]
    Validation(String),

    #[error("설정 에러: {0}")]
    Config(String),

    #[error("핸들러 {handler} 실행 실패: {message}")]
    Handler { handler: String, message: String },

    #[error("잘못된 상태 전이: {0}")]
    InvalidState(String),

    #[error("I/O 에러: {0}")]
    Io(String),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout 에러")]
    Timeout,

    #[error("채널이 닫혔습니다")]
    ChannelClosed,
}

impl StreamError {
    /// 커서 재발급으로 복구 가능한 에러인지 여부
    pub fn is_cursor_invalid(&self) -> bool {
        matches!(
            self,
            StreamError::ExpiredCursor(_) | StreamError::TrimmedData(_)
        )
    }

    /// 다음 폴링 주기에 다시 시도하면 되는 일시적 에러인지 여부
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::Connection(_) | StreamError::Timeout | StreamError::Io(_)
        )
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
