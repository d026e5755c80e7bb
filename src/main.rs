/// 로컬 테이블 스트림 하네스 실행
///
/// 에뮬레이션 저장소를 띄우고 시드를 적재한 뒤, 변경 로그를 폴링해서
/// 핸들러 호출을 로그로 출력합니다. ctrl-c 로 종료합니다.
use std::env;
use std::sync::Arc;
use table_stream_local::config::{HarnessConfig, DEFAULT_CONFIG_FILE};
use table_stream_local::dispatcher::TracingInvoker;
use table_stream_local::supervisor::{BackingStore, EmbeddedStore};
use table_stream_local::{Seeder, StreamConsumer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt::init();

    let config_path =
        env::var("HARNESS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let mut config = HarnessConfig::from_file(&config_path)?;
    config.apply_env()?;
    config.validate()?;

    if !config.enabled {
        info!(
            "ARC_DB_EXTERNAL is not set. To use the local table store and stream consumer, \
             set this value to true in your .env file."
        );
        return Ok(());
    }

    // 저장소 시작
    let mut supervisor = EmbeddedStore::new(config.tables.clone());
    let endpoint = supervisor.start(config.port).await?;
    let store = supervisor
        .store()
        .ok_or("table store is not running after start")?;
    info!("Table store endpoint: {}", endpoint.url);

    // 시드 적재
    // 시드 적재 (실패해도 계속 진행)
    if let Some(ref seed_file) = config.seed_file {
        Seeder::seed_or_log(seed_file, &*store).await;
    }

    // 컨슈머 시작
    let mut consumer = StreamConsumer::new(
        store.clone(),
        Arc::new(TracingInvoker),
        config.consumer_config(),
    );
    let mut failures = consumer.take_failures().ok_or("failure channel already taken")?;
    consumer.start().await?;

    let reporter = tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            match failure.shard {
                Some(shard) => error!(
                    "Stream consumption stopped for {}/{}: {}",
                    failure.table, shard, failure.error
                ),
                None => error!(
                    "Stream consumption unavailable for {}: {}",
                    failure.table, failure.error
                ),
            }
        }
    });

    info!("Listening for table changes, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    consumer.stop().await?;
    reporter.abort();
    supervisor.stop().await?;

    Ok(())
}
