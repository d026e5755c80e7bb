//! 테이블 변경 레코드 및 속성 값 데이터 구조 정의

use crate::cursor::{SequenceNumber, ShardId};
use crate::error::{Result, StreamError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// 테이블 아이템: 속성 이름 → 값
pub type Item = BTreeMap<String, AttributeValue>;

/// 타입 태그가 붙은 속성 값 (JSON 표현: `{"S": "abc"}`, `{"N": "1.5"}` ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    /// 숫자는 정밀도 손실을 막기 위해 문자열로 보관
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "B")]
    B(Bytes),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
}

impl AttributeValue {
    pub fn as_string(&self) -> Option<String> {
        match self {
            AttributeValue::S(s) => Some(s.clone()),
            AttributeValue::N(n) => Some(n.clone()),
            AttributeValue::Bool(b) => Some(b.to_string()),
            AttributeValue::Null(_) => Some("NULL".to_string()),
            _ => None,
        }
    }
}

/// 일반 JSON 값을 속성 값으로 변환
pub fn marshall(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(marshall).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), marshall(v)))
                .collect(),
        ),
    }
}

/// JSON 객체를 아이템으로 변환. 객체가 아니면 에러
pub fn marshall_item(value: &Value) -> Result<Item> {
    match value {
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), marshall(v)))
            .collect()),
        other => Err(StreamError::Validation(format!(
            "item must be a JSON object, got {}",
            other
        ))),
    }
}

/// 속성 값을 일반 JSON 값으로 되돌림
pub fn unmarshall(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_value(n),
        AttributeValue::B(bytes) => {
            Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
        }
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(values) => Value::Array(values.iter().map(unmarshall).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), unmarshall(v)))
                .collect::<Map<String, Value>>(),
        ),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(values) => Value::Array(values.iter().map(|n| number_value(n)).collect()),
    }
}

pub fn unmarshall_item(item: &Item) -> Value {
    Value::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), unmarshall(v)))
            .collect(),
    )
}

fn number_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// 변경 연산 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Insert,
    Modify,
    Remove,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "INSERT",
            OperationType::Modify => "MODIFY",
            OperationType::Remove => "REMOVE",
        }
    }
}

/// 변경 로그 레코드 하나 (샤드 내 로그 순서를 가짐)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// 레코드 고유 ID
    pub event_id: String,
    /// 연산 타입 (INSERT, MODIFY, REMOVE)
    pub event_name: OperationType,
    /// 테이블명
    pub table: String,
    /// 레코드가 기록된 샤드
    pub shard_id: ShardId,
    /// 샤드 내 순번
    pub sequence_number: SequenceNumber,
    pub approximate_creation: DateTime<Utc>,
    /// 키 속성
    pub keys: Item,
    /// 변경 전 데이터 (MODIFY/REMOVE 의 경우)
    pub old_image: Option<Item>,
    /// 변경 후 데이터 (INSERT/MODIFY 의 경우)
    pub new_image: Option<Item>,
}

/// 핸들러에 전달되는 페이로드. fetch 로 받은 배치를 그대로 담는다
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records")]
    pub records: Vec<ChangeRecord>,
}

impl StreamEvent {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        StreamEvent { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 레코드별 변경 후 이미지
    pub fn new_images(&self) -> Vec<Option<&Item>> {
        self.records.iter().map(|r| r.new_image.as_ref()).collect()
    }
}
