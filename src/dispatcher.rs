//! Dispatcher - 변경 배치를 등록된 핸들러들에게 전달
//!
//! 핸들러는 등록 순서대로 호출되고, 한 핸들러의 실패는 로그만 남긴 채
//! 나머지 핸들러 호출을 막지 않는다. 실패한 호출은 재시도하지 않는다
//! (핸들러당 배치당 최대 한 번).

use crate::config::HandlerBinding;
use crate::error::{Result, StreamError};
use crate::events::{unmarshall_item, ChangeRecord, StreamEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 외부 핸들러 호출 채널
#[async_trait]
pub trait HandlerInvoker: Send + Sync {
    async fn invoke(&self, table: &str, handler: &str, payload: &StreamEvent) -> Result<()>;
}

/// 채널로 넘어가는 호출 한 건
#[derive(Debug, Clone)]
pub struct Invocation {
    pub table: String,
    pub handler: String,
    pub payload: StreamEvent,
}

/// 호출 수신자
pub type InvocationReceiver = mpsc::UnboundedReceiver<Invocation>;

/// mpsc 채널로 호출을 넘기는 invoker
pub struct ChannelInvoker {
    tx: mpsc::UnboundedSender<Invocation>,
}

impl ChannelInvoker {
    pub fn new() -> (Self, InvocationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelInvoker { tx }, rx)
    }
}

#[async_trait]
impl HandlerInvoker for ChannelInvoker {
    async fn invoke(&self, table: &str, handler: &str, payload: &StreamEvent) -> Result<()> {
        self.tx
            .send(Invocation {
                table: table.to_string(),
                handler: handler.to_string(),
                payload: payload.clone(),
            })
            .map_err(|_| StreamError::ChannelClosed)
    }
}

/// 클로저를 invoker 로 사용
pub struct FnInvoker<F>(pub F);

#[async_trait]
impl<F> HandlerInvoker for FnInvoker<F>
where
    F: Fn(&str, &str, &StreamEvent) -> Result<()> + Send + Sync,
{
    async fn invoke(&self, table: &str, handler: &str, payload: &StreamEvent) -> Result<()> {
        (self.0)(table, handler, payload)
    }
}

/// 변경 후 이미지를 로그로만 출력
pub struct TracingInvoker;

#[async_trait]
impl HandlerInvoker for TracingInvoker {
    async fn invoke(&self, table: &str, handler: &str, payload: &StreamEvent) -> Result<()> {
        for record in &payload.records {
            let image = record.new_image.as_ref().map(unmarshall_item);
            info!(
                "[{}] {} {} {:?}",
                handler,
                table,
                record.event_name.as_str(),
                image
            );
        }
        Ok(())
    }
}

/// 배치 하나의 전달 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    invoker: Arc<dyn HandlerInvoker>,
}

impl Dispatcher {
    pub fn new(invoker: Arc<dyn HandlerInvoker>) -> Self {
        Dispatcher { invoker }
    }

    /// 배치를 모든 바인딩에 등록 순서대로 전달
    pub async fn deliver(
        &self,
        table: &str,
        bindings: &[HandlerBinding],
        records: Vec<ChangeRecord>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if records.is_empty() {
            return report;
        }

        let payload = StreamEvent::new(records);
        for binding in bindings {
            match self.invoker.invoke(table, &binding.name, &payload).await {
                Ok(()) => {
                    debug!(
                        "Delivered {} record(s) of {} to {}",
                        payload.len(),
                        table,
                        binding.name
                    );
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!("Handler {} failed on {}: {}", binding.name, table, e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{SequenceNumber, ShardId};
    use crate::events::{Item, OperationType};
    use chrono::Utc;
    use parking_lot::Mutex;

    fn record(seq: u64) -> ChangeRecord {
        ChangeRecord {
            event_id: format!("evt-{}", seq),
            event_name: OperationType::Insert,
            table: "orders".to_string(),
            shard_id: ShardId::new("shard-1"),
            sequence_number: SequenceNumber(seq),
            approximate_creation: Utc::now(),
            keys: Item::new(),
            old_image: None,
            new_image: Some(Item::new()),
        }
    }

    fn bindings(names: &[&str]) -> Vec<HandlerBinding> {
        names.iter().map(|n| HandlerBinding::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let invoker = FnInvoker(move |_table: &str, handler: &str, payload: &StreamEvent| {
            seen.lock().push((handler.to_string(), payload.len()));
            if handler == "broken" {
                Err(StreamError::Handler {
                    handler: handler.to_string(),
                    message: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        });
        let dispatcher = Dispatcher::new(Arc::new(invoker));

        let report = dispatcher
            .deliver("orders", &bindings(&["broken", "audit"]), vec![record(1), record(2)])
            .await;

        assert_eq!(report, DeliveryReport { delivered: 1, failed: 1 });
        assert_eq!(
            *calls.lock(),
            vec![("broken".to_string(), 2), ("audit".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_invokes_nothing() {
        let (invoker, mut rx) = ChannelInvoker::new();
        let dispatcher = Dispatcher::new(Arc::new(invoker));
        let report = dispatcher
            .deliver("orders", &bindings(&["audit"]), Vec::new())
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_invoker_preserves_order() {
        let (invoker, mut rx) = ChannelInvoker::new();
        let dispatcher = Dispatcher::new(Arc::new(invoker));
        dispatcher
            .deliver("orders", &bindings(&["audit"]), vec![record(3), record(4)])
            .await;

        let invocation = rx.recv().await.unwrap();
        assert_eq!(invocation.handler, "audit");
        let sequences: Vec<u64> = invocation
            .payload
            .records
            .iter()
            .map(|r| r.sequence_number.0)
            .collect();
        assert_eq!(sequences, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_closed_channel_counts_as_failure() {
        let (invoker, rx) = ChannelInvoker::new();
        drop(rx);
        let dispatcher = Dispatcher::new(Arc::new(invoker));
        let report = dispatcher
            .deliver("orders", &bindings(&["audit"]), vec![record(1)])
            .await;
        assert_eq!(report.failed, 1);
    }
}
