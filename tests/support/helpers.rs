use chainflow::exceptions::{ExceptionRecorder, MemoryExceptionSink};
use chainflow::executor::BatchExecutor;
use chainflow::multicall::{MulticallEngine, MulticallSettings};
use chainflow::pipeline::jobs::{BlocksJob, LogsJob, TokenBalancesJob, TokenTransfersJob};
use chainflow::pipeline::{Dispatcher, Job};
use chainflow::records::RecordKind;
use chainflow::rpc::EvmRpcClient;
use chainflow::runtime::Telemetry;
use chainflow::storage::MemoryStore;
use chainflow::sync::StoreExporter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Fully wired pipeline over in-memory collaborators, with every seam
/// exposed for assertions.
pub struct Harness {
    pub client: Arc<EvmRpcClient>,
    pub executor: BatchExecutor,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<MemoryExceptionSink>,
    pub exceptions: Arc<ExceptionRecorder>,
    pub telemetry: Arc<Telemetry>,
    pub engine: Arc<MulticallEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn harness(
    url: &str,
    multicall: MulticallSettings,
    requested: Vec<RecordKind>,
) -> Harness {
    let client = Arc::new(EvmRpcClient::new(url).expect("rpc client"));
    let executor = BatchExecutor::new(10, 4);
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemoryExceptionSink::default());
    let exceptions = ExceptionRecorder::new(sink.clone());
    let telemetry = Arc::new(Telemetry::default());

    let engine = Arc::new(MulticallEngine::new(
        client.clone(),
        executor.clone(),
        multicall,
        exceptions.clone(),
        telemetry.clone(),
    ));

    let jobs: Vec<Arc<dyn Job>> = vec![
        Arc::new(BlocksJob::new(client.clone(), executor.clone())),
        Arc::new(LogsJob::new(client.clone(), executor.clone())),
        Arc::new(TokenTransfersJob::new(exceptions.clone())),
        Arc::new(TokenBalancesJob::new(engine.clone())),
    ];
    let dispatcher = Arc::new(
        Dispatcher::new(
            jobs,
            requested,
            Arc::new(StoreExporter::new(store.clone())),
            telemetry.clone(),
        )
        .expect("dispatcher"),
    );

    Harness {
        client,
        executor,
        store,
        sink,
        exceptions,
        telemetry,
        engine,
        dispatcher,
    }
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
