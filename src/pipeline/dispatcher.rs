use crate::buffer::SyncBuffer;
use crate::pipeline::job::{BatchContext, Job};
use crate::records::RecordKind;
use crate::runtime::telemetry::Telemetry;
use crate::sync::export::Exporter;
use alloy_primitives::B256;
use anyhow::{bail, ensure, Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one dispatched batch, handed back to the sync controller.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub first_block: u64,
    pub last_block: u64,
    pub exported_records: usize,
    /// Number and hash of the highest block collected, used to seed the
    /// reorg check. `None` when the plan does not produce block records.
    pub last_block_hash: Option<(u64, B256)>,
}

/// Orders and runs the minimal set of jobs whose outputs cover the
/// requested record kinds. All graph validation happens at construction,
/// so a misconfigured pipeline fails before the first batch runs.
pub struct Dispatcher {
    plan: Vec<Arc<dyn Job>>,
    requested: Vec<RecordKind>,
    exporter: Arc<dyn Exporter>,
    telemetry: Arc<Telemetry>,
}

impl Dispatcher {
    pub fn new(
        jobs: Vec<Arc<dyn Job>>,
        requested: Vec<RecordKind>,
        exporter: Arc<dyn Exporter>,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        ensure!(!jobs.is_empty(), "dispatcher needs at least one job");
        ensure!(
            !requested.is_empty(),
            "at least one output record kind must be requested"
        );

        let mut producers: HashMap<RecordKind, usize> = HashMap::new();
        for (index, job) in jobs.iter().enumerate() {
            ensure!(
                !job.outputs().is_empty(),
                "job '{}' declares no outputs",
                job.name()
            );
            for kind in job.outputs() {
                if let Some(&existing) = producers.get(kind) {
                    bail!(
                        "record kind '{kind}' has two producers: '{}' and '{}'",
                        jobs[existing].name(),
                        job.name()
                    );
                }
                producers.insert(*kind, index);
            }
        }

        for job in &jobs {
            for kind in job.dependencies() {
                ensure!(
                    producers.contains_key(kind),
                    "job '{}' depends on '{kind}', which no job produces",
                    job.name()
                );
            }
        }

        let order = topological_order(&jobs, &producers)?;

        // Minimal closure: producers of the requested kinds plus everything
        // they transitively depend on.
        let mut needed: HashSet<usize> = HashSet::new();
        let mut frontier: Vec<usize> = Vec::new();
        for kind in &requested {
            let &producer = producers
                .get(kind)
                .with_context(|| format!("requested record kind '{kind}' has no producer"))?;
            if needed.insert(producer) {
                frontier.push(producer);
            }
        }
        while let Some(index) = frontier.pop() {
            for kind in jobs[index].dependencies() {
                let producer = producers[kind];
                if needed.insert(producer) {
                    frontier.push(producer);
                }
            }
        }

        let plan: Vec<Arc<dyn Job>> = order
            .into_iter()
            .filter(|index| needed.contains(index))
            .map(|index| jobs[index].clone())
            .collect();

        tracing::info!(
            jobs = plan.len(),
            plan = ?plan.iter().map(|job| job.name()).collect::<Vec<_>>(),
            "dispatcher plan computed"
        );

        Ok(Self {
            plan,
            requested,
            exporter,
            telemetry,
        })
    }

    pub fn planned_jobs(&self) -> Vec<&'static str> {
        self.plan.iter().map(|job| job.name()).collect()
    }

    pub fn requested_kinds(&self) -> &[RecordKind] {
        &self.requested
    }

    /// Runs the plan's four-phase lifecycle over one block range, then hands
    /// the requested slice of the buffer to the exporter. The cursor must
    /// only advance after this returns `Ok`.
    pub async fn run(&self, ctx: BatchContext) -> Result<BatchSummary> {
        ensure!(
            ctx.first_block <= ctx.last_block,
            "malformed range [{}, {}]",
            ctx.first_block,
            ctx.last_block
        );

        let started = Instant::now();
        let mut buffer = SyncBuffer::new();

        for job in &self.plan {
            if ctx.reorg && !job.able_to_reorg() {
                tracing::debug!(job = job.name(), "skipping job during reorg re-derivation");
                continue;
            }

            let job_started = Instant::now();
            job.start(&ctx)
                .with_context(|| format!("job '{}' failed in start", job.name()))?;
            job.collect(&ctx, &mut buffer)
                .await
                .with_context(|| format!("job '{}' failed in collect", job.name()))?;
            job.process(&ctx, &mut buffer)
                .with_context(|| format!("job '{}' failed in process", job.name()))?;
            job.end(&ctx)
                .with_context(|| format!("job '{}' failed in end", job.name()))?;

            tracing::debug!(
                job = job.name(),
                elapsed_ms = job_started.elapsed().as_millis() as u64,
                records = buffer.total_records(),
                "job completed"
            );
        }

        let last_block_hash = buffer.last_block_hash();
        let records = buffer.drain_records(&self.requested);
        let exported_records = records.len();
        self.exporter
            .export(&records)
            .await
            .context("exporter failed; cursor will not advance")?;

        self.telemetry.record_synced_blocks(ctx.block_count());
        self.telemetry.record_upserted_records(exported_records as u64);
        self.telemetry.record_completed_batch();

        tracing::info!(
            first_block = ctx.first_block,
            last_block = ctx.last_block,
            reorg = ctx.reorg,
            exported_records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );

        Ok(BatchSummary {
            first_block: ctx.first_block,
            last_block: ctx.last_block,
            exported_records,
            last_block_hash,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("plan", &self.planned_jobs())
            .field("requested", &self.requested)
            .finish()
    }
}

/// Kahn's algorithm over the kind-mediated dependency edges. Preserves
/// declaration order among jobs that are not ordered by a dependency.
fn topological_order(
    jobs: &[Arc<dyn Job>],
    producers: &HashMap<RecordKind, usize>,
) -> Result<Vec<usize>> {
    let mut indegree = vec![0usize; jobs.len()];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); jobs.len()];

    for (index, job) in jobs.iter().enumerate() {
        for kind in job.dependencies() {
            let producer = producers[kind];
            if producer != index {
                consumers[producer].push(index);
                indegree[index] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..jobs.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(jobs.len());
    let mut cursor = 0;
    while cursor < ready.len() {
        let index = ready[cursor];
        cursor += 1;
        order.push(index);
        for &consumer in &consumers[index] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.push(consumer);
            }
        }
    }

    if order.len() != jobs.len() {
        let stuck: Vec<&str> = (0..jobs.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| jobs[i].name())
            .collect();
        bail!("dependency cycle among jobs: {stuck:?}");
    }

    Ok(order)
}
