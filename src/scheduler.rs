//! Consumer Scheduler - 샤드별 폴링 루프 구동
//!
//! 생명주기: Idle → Running → Stopping → Stopped
//! 1. start: 감시 테이블마다 Shard Tracker 초기화 후 (테이블, 샤드) 별 루프 시작
//! 2. 루프: 고정 주기로 fetch → 전달 → 커서 저장, 커서 무효화 시 refresh 후
//!    새로 생긴 샤드까지 발견
//! 3. stop: 취소 신호 후 모든 루프가 스스로 끝날 때까지 대기
//!
//! 루프마다 독립된 tokio task 이므로 느린 샤드가 다른 샤드를 막지 않는다.
//! 한 샤드에는 루프가 하나뿐이라 같은 커서로 동시에 fetch 하는 일은 없다.

use crate::config::{ConsumerConfig, HandlerBinding};
use crate::cursor::{ConsumerState, SequenceNumber, ShardEntry, ShardId, ShardKey};
use crate::dispatcher::{Dispatcher, HandlerInvoker};
use crate::error::{Result, StreamError};
use crate::poller::{FetchOutcome, NextCursor, StreamPoller};
use crate::shard_tracker::ShardTracker;
use crate::stream_api::StreamApi;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// interval 은 0 주기를 허용하지 않음
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 특정 테이블(또는 샤드)의 소비가 치명적으로 중단됨
#[derive(Debug)]
pub struct ConsumerFailure {
    pub table: String,
    /// 초기화 단계 실패면 `None`
    pub shard: Option<ShardId>,
    pub error: StreamError,
}

/// 실패 보고 수신자
pub type FailureReceiver = mpsc::UnboundedReceiver<ConsumerFailure>;

/// 루프들이 공유하는 실행 컨텍스트
struct LoopContext {
    tracker: ShardTracker,
    poller: StreamPoller,
    dispatcher: Dispatcher,
    bindings: HashMap<String, Vec<HandlerBinding>>,
    poll_interval: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
    failures: mpsc::UnboundedSender<ConsumerFailure>,
}

impl LoopContext {
    fn report(&self, table: &str, shard: Option<ShardId>, error: StreamError) {
        // 수신자가 없어도 로그는 이미 남았으므로 무시
        let _ = self.failures.send(ConsumerFailure {
            table: table.to_string(),
            shard,
            error,
        });
    }
}

/// tick 한 번의 결과
#[derive(Debug)]
enum Step {
    Continue,
    /// refresh 로 후속 샤드로 넘어감
    Moved(ShardKey),
    Finished,
}

/// 변경 스트림 컨슈머
pub struct StreamConsumer {
    ctx: Arc<LoopContext>,
    state: ConsumerState,
    failures_rx: Option<FailureReceiver>,
}

impl StreamConsumer {
    pub fn new(
        api: Arc<dyn StreamApi>,
        invoker: Arc<dyn HandlerInvoker>,
        config: ConsumerConfig,
    ) -> Self {
        let mut bindings: HashMap<String, Vec<HandlerBinding>> = HashMap::new();
        for monitored in config.tables {
            bindings
                .entry(monitored.table)
                .or_default()
                .extend(monitored.handlers);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = LoopContext {
            tracker: ShardTracker::new(api.clone()),
            poller: StreamPoller::new(api, config.batch_limit, config.fetch_timeout),
            dispatcher: Dispatcher::new(invoker),
            bindings,
            poll_interval: config.poll_interval,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            failures: tx,
        };

        StreamConsumer {
            ctx: Arc::new(ctx),
            state: ConsumerState::Idle,
            failures_rx: Some(rx),
        }
    }

    /// 실패 보고 채널. 한 번만 꺼낼 수 있다
    pub fn take_failures(&mut self) -> Option<FailureReceiver> {
        self.failures_rx.take()
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// 현재 추적 중인 샤드와 커서
    pub fn shard_entries(&self) -> Vec<ShardEntry> {
        self.ctx.tracker.snapshot()
    }

    /// 감시 테이블 초기화 및 폴링 시작
    ///
    /// 초기화에 실패한 테이블은 실패 채널로 보고하고 건너뛴다.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ConsumerState::Idle {
            return Err(StreamError::InvalidState(format!(
                "cannot start a consumer in state {:?}",
                self.state
            )));
        }
        info!("Starting stream consumer");
        self.state = ConsumerState::Running;

        let mut tables: Vec<&String> = self.ctx.bindings.keys().collect();
        tables.sort();

        for table in tables {
            match self.ctx.tracker.initialize(table).await {
                Ok(entries) => {
                    for entry in entries {
                        spawn_shard_loop(&self.ctx, entry.key);
                    }
                }
                Err(e) => {
                    error!("Failed to initialize change log consumer for {}: {}", table, e);
                    self.ctx.report(table, None, e);
                }
            }
        }

        info!(
            "Stream consumer running ({} shard loop(s))",
            self.ctx.tasks.len()
        );
        Ok(())
    }

    /// 취소 신호를 올리고 모든 루프가 끝날 때까지 대기
    ///
    /// 진행 중인 fetch 는 중단하지 않고 끝나기를 기다린다.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            ConsumerState::Stopped => return Ok(()),
            ConsumerState::Idle => {
                self.state = ConsumerState::Stopped;
                return Ok(());
            }
            ConsumerState::Running | ConsumerState::Stopping => {}
        }

        info!("Stopping stream consumer");
        self.state = ConsumerState::Stopping;
        self.ctx.cancel.cancel();
        self.ctx.tasks.close();
        self.ctx.tasks.wait().await;

        self.state = ConsumerState::Stopped;
        info!("Stream consumer stopped");
        Ok(())
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        // stop 없이 버려져도 루프가 남지 않도록
        self.ctx.cancel.cancel();
    }
}

fn spawn_shard_loop(ctx: &Arc<LoopContext>, key: ShardKey) {
    let loop_ctx = ctx.clone();
    ctx.tasks.spawn(async move {
        let table = key.table.clone();
        let shard = key.shard.clone();
        if let Err(e) = run_shard_loop(&loop_ctx, key).await {
            error!("Consumer loop for {}/{} terminated: {}", table, shard, e);
            loop_ctx.report(&table, Some(shard), e);
        }
    });
}

async fn run_shard_loop(ctx: &Arc<LoopContext>, mut key: ShardKey) -> Result<()> {
    debug!("Polling {}", key);
    // 첫 tick 은 즉시. 이후 fetch 시간과 무관하게 poll_interval 주기
    let mut ticker = tokio::time::interval(ctx.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match tick(ctx, &key).await? {
            Step::Continue => {}
            Step::Moved(next) => key = next,
            Step::Finished => break,
        }
    }
    debug!("Stopped polling {}", key);
    Ok(())
}

async fn tick(ctx: &Arc<LoopContext>, key: &ShardKey) -> Result<Step> {
    let entry = ctx
        .tracker
        .entry(key)
        .ok_or_else(|| StreamError::InvalidState(format!("shard {} is not tracked", key)))?;

    match ctx.poller.fetch(&entry.cursor).await? {
        FetchOutcome::Batch { records, next } => {
            // trim-horizon 재조회로 다시 읽힌 레코드는 건너뜀
            let fresh: Vec<_> = records
                .into_iter()
                .filter(|r| !entry.already_delivered(r.sequence_number))
                .collect();
            let last = fresh.last().map(|r| r.sequence_number);

            if !fresh.is_empty() {
                let bindings = ctx
                    .bindings
                    .get(&key.table)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let report = ctx.dispatcher.deliver(&key.table, bindings, fresh).await;
                if report.failed > 0 {
                    warn!(
                        "{} of {} handler(s) failed for a batch from {}",
                        report.failed,
                        bindings.len(),
                        key
                    );
                }
            }
            store_next(ctx, key, next, last).await
        }
        FetchOutcome::Empty { next } => store_next(ctx, key, next, None).await,
        FetchOutcome::Expired | FetchOutcome::Trimmed => {
            info!("Cursor for {} is no longer valid, rebuilding", key);
            let step = match ctx.tracker.refresh(&key.table, &key.shard).await? {
                Some(entry) if &entry.key == key => return Ok(Step::Continue),
                Some(entry) => Step::Moved(entry.key),
                None => Step::Finished,
            };

            // 샤드 구성이 바뀌었으므로 형제나 손자 샤드도 찾아서 맡긴다
            adopt_new_shards(ctx, &key.table).await?;
            if !ctx.tracker.is_tracking(&key.table) {
                error!("No readable shard left for {} after losing {}", key.table, key);
                ctx.report(
                    &key.table,
                    Some(key.shard.clone()),
                    StreamError::NoActiveShard(key.table.clone()),
                );
            }
            Ok(step)
        }
    }
}

/// 아직 아무 루프도 맡지 않은 샤드마다 루프 시작
async fn adopt_new_shards(ctx: &Arc<LoopContext>, table: &str) -> Result<()> {
    for entry in ctx.tracker.discover(table).await? {
        spawn_shard_loop(ctx, entry.key);
    }
    Ok(())
}

async fn store_next(
    ctx: &Arc<LoopContext>,
    key: &ShardKey,
    next: NextCursor,
    delivered: Option<SequenceNumber>,
) -> Result<Step> {
    match next {
        NextCursor::Continue(cursor) => {
            ctx.tracker.advance(key, cursor, delivered)?;
            Ok(Step::Continue)
        }
        NextCursor::End => {
            info!("Shard {} is drained", key);
            ctx.tracker.retire(key);
            adopt_new_shards(ctx, &key.table).await?;
            Ok(Step::Finished)
        }
    }
}
