use crate::exceptions::{ExceptionRecorder, ExceptionSink, MemoryExceptionSink};
use crate::executor::BatchExecutor;
use crate::multicall::{MulticallEngine, MulticallSettings};
use crate::pipeline::jobs::{BlocksJob, LogsJob, TokenBalancesJob, TokenTransfersJob};
use crate::pipeline::{Dispatcher, Job};
use crate::rpc::{EvmRpcClient, RpcClientOptions};
use crate::runtime::config::SyncConfig;
use crate::runtime::telemetry::{self, spawn_metrics_reporter, Telemetry};
use crate::storage::{MemoryStore, RecordStore};
use crate::sync::{
    ControllerSettings, CursorStore, FileCursorStore, MemoryCursorStore, StoreExporter,
    SyncController,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Wires the whole engine from a validated [`SyncConfig`] and handles OS
/// signals for graceful shutdowns.
pub struct Runner {
    controller: Arc<SyncController>,
    client: Arc<EvmRpcClient>,
    telemetry: Arc<Telemetry>,
    metrics_interval: Duration,
    shutdown: CancellationToken,
}

impl Runner {
    /// Builds the full pipeline against the given record store and exception
    /// sink. Configuration problems (bad graph, bad values) surface here,
    /// before any batch runs.
    pub fn from_config(
        config: &SyncConfig,
        store: Arc<dyn RecordStore>,
        exception_sink: Arc<dyn ExceptionSink>,
    ) -> Result<Self> {
        telemetry::init_tracing();

        let options = RpcClientOptions {
            request_timeout: config.rpc_timeout(),
            max_request_body_bytes: config.rpc_max_request_body_bytes(),
            max_response_body_bytes: config.rpc_max_response_body_bytes(),
            ..RpcClientOptions::default()
        };
        let client = Arc::new(EvmRpcClient::with_options(config.rpc_url(), options)?);

        let shutdown = CancellationToken::new();
        let executor = BatchExecutor::new(config.rpc_batch_size(), config.worker_count())
            .with_cancellation(shutdown.clone());
        let telemetry = Arc::new(Telemetry::default());
        let exceptions = ExceptionRecorder::new(exception_sink);

        let engine = Arc::new(MulticallEngine::new(
            client.clone(),
            executor.clone(),
            MulticallSettings {
                contract_address: config.multicall_address(),
                deploy_block: config.multicall_deploy_block(),
                enabled: config.multicall_enabled(),
                max_chunk_bytes: config.multicall_max_chunk_bytes(),
            },
            exceptions.clone(),
            telemetry.clone(),
        ));

        let jobs: Vec<Arc<dyn Job>> = vec![
            Arc::new(BlocksJob::new(client.clone(), executor.clone())),
            Arc::new(LogsJob::new(client.clone(), executor.clone())),
            Arc::new(TokenTransfersJob::new(exceptions.clone())),
            Arc::new(TokenBalancesJob::new(engine)),
        ];
        let dispatcher = Arc::new(Dispatcher::new(
            jobs,
            config.requested_kinds().to_vec(),
            Arc::new(StoreExporter::new(store.clone())),
            telemetry.clone(),
        )?);

        let cursor_store: Arc<dyn CursorStore> = match config.cursor_path() {
            Some(path) => Arc::new(FileCursorStore::new(path)),
            None => Arc::new(MemoryCursorStore::default()),
        };

        let controller = Arc::new(SyncController::new(
            client.clone(),
            dispatcher,
            store,
            cursor_store,
            exceptions,
            telemetry.clone(),
            ControllerSettings {
                start_block: config.start_block(),
                block_batch_size: config.block_batch_size(),
                poll_interval: config.poll_interval(),
                reorg_check: config.reorg_check(),
                reorg_window: config.reorg_window(),
            },
            shutdown.clone(),
        ));

        Ok(Self {
            controller,
            client,
            telemetry,
            metrics_interval: config.metrics_interval(),
            shutdown,
        })
    }

    /// Convenience wiring over in-memory collaborators.
    pub fn in_memory(config: &SyncConfig) -> Result<Self> {
        Self::from_config(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryExceptionSink::default()),
        )
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the controller until the shutdown token is cancelled.
    pub async fn run(&self) -> Result<()> {
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            self.client.clone(),
            self.shutdown.clone(),
            self.metrics_interval,
        );

        let result = self.controller.run().await;
        let _ = reporter.await;
        result
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere. The in-flight batch always completes before the
    /// controller stops.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            self.client.clone(),
            self.shutdown.clone(),
            self.metrics_interval,
        );

        let controller = self.controller.clone();
        let mut run = tokio::spawn(async move { controller.run().await });

        select! {
            result = &mut run => {
                self.shutdown.cancel();
                let _ = reporter.await;
                return result.context("controller task panicked")?;
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("shutdown token cancelled");
            }
        }

        self.shutdown.cancel();
        let result = run.await.context("controller task panicked")?;
        let _ = reporter.await;
        result
    }
}
