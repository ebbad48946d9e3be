//! Background promotion of working memory into long-term memory
//!
//! Writes never wait for persistence. The dispatcher hands work to a
//! [`PromotionScheduler`], which owns an mpsc queue and a single worker task.
//! Three kinds of job run on it (see [`PromotionJob`]):
//!
//! - **Promote**: re-read a session's working memory, run its extraction
//!   strategy over the pending messages, and create the pending memories plus
//!   the extracted candidates with dedup on
//! - **Index**: create records submitted directly by a caller
//! - **TouchLastAccessed**: bump `last_accessed` on records returned to a caller
//!
//! Promote jobs are coalesced while queued: if a job for the same session key is
//! already waiting, a new enqueue is dropped since the waiting job will read the
//! latest state anyway. Once the job starts, the next write enqueues again.
//!
//! A failed job is logged and dropped. Pending items stay pending in working
//! memory and are retried by the next write-triggered job; id dedup in the
//! gateway keeps repeated promotion from creating duplicates.

use crate::error::{MemoryError, MemoryResult};
use crate::extraction::StrategyRegistry;
use crate::long_term::LongTermMemory;
use crate::model::{MemoryMessage, MemoryRecord};
use crate::working::WorkingMemoryStore;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Identifies one session's working memory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Session id
    pub session_id: String,

    /// Namespace, if scoped
    pub namespace: Option<String>,

    /// User, if scoped
    pub user_id: Option<String>,
}

impl SessionKey {
    /// Create a session key
    pub fn new(
        session_id: impl Into<String>,
        namespace: Option<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            namespace,
            user_id,
        }
    }
}

/// Background job
#[derive(Debug, Clone)]
pub enum PromotionJob {
    /// Promote a session's pending memories and messages
    Promote(SessionKey),

    /// Create records in long-term memory
    Index {
        /// Records to create
        records: Vec<MemoryRecord>,
        /// Skip duplicates
        deduplicate: bool,
    },

    /// Bump `last_accessed` on records
    TouchLastAccessed {
        /// Record ids
        ids: Vec<String>,
    },
}

impl PromotionJob {
    fn kind(&self) -> &'static str {
        match self {
            PromotionJob::Promote(_) => "promote",
            PromotionJob::Index { .. } => "index",
            PromotionJob::TouchLastAccessed { .. } => "touch_last_accessed",
        }
    }
}

/// Owner of the promotion queue and its worker
pub struct PromotionScheduler {
    /// Queue sender; `None` after shutdown
    sender: Mutex<Option<mpsc::UnboundedSender<PromotionJob>>>,

    /// Promote jobs waiting in the queue
    queued: Arc<DashSet<SessionKey>>,

    /// Jobs queued or running
    outstanding: Arc<watch::Sender<usize>>,

    /// Worker task
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PromotionScheduler {
    /// Spawn the worker on the current tokio runtime
    pub fn start(
        working: WorkingMemoryStore,
        long_term: LongTermMemory,
        strategies: StrategyRegistry,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queued = Arc::new(DashSet::new());
        let (outstanding, _) = watch::channel(0usize);
        let outstanding = Arc::new(outstanding);

        let worker = PromotionWorker {
            working,
            long_term,
            strategies,
            queued: queued.clone(),
            outstanding: outstanding.clone(),
        };
        let handle = tokio::spawn(worker.run(receiver));

        tracing::info!("promotion scheduler started");

        Self {
            sender: Mutex::new(Some(sender)),
            queued,
            outstanding,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a job; returns whether it was accepted
    ///
    /// A promote job for a session that already has one waiting is coalesced
    /// and reported as not accepted.
    pub fn enqueue(&self, job: PromotionJob) -> bool {
        if let PromotionJob::Promote(key) = &job {
            if !self.queued.insert(key.clone()) {
                tracing::debug!(session_id = %key.session_id, "promotion already queued, coalescing");
                return false;
            }
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::warn!(job = job.kind(), "promotion scheduler is shut down, dropping job");
            self.forget(&job);
            return false;
        };

        self.outstanding.send_modify(|n| *n += 1);
        let kind = job.kind();
        match sender.send(job) {
            Ok(()) => {
                tracing::debug!(job = kind, "job queued");
                true
            }
            Err(mpsc::error::SendError(job)) => {
                tracing::warn!(job = kind, "promotion worker stopped, dropping job");
                self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                self.forget(&job);
                false
            }
        }
    }

    /// Queue promotion of a session
    pub fn promote(&self, key: SessionKey) -> bool {
        self.enqueue(PromotionJob::Promote(key))
    }

    /// Queue creation of records
    pub fn index(&self, records: Vec<MemoryRecord>, deduplicate: bool) -> bool {
        self.enqueue(PromotionJob::Index {
            records,
            deduplicate,
        })
    }

    /// Queue a `last_accessed` bump
    pub fn touch_last_accessed(&self, ids: Vec<String>) -> bool {
        if ids.is_empty() {
            return false;
        }
        self.enqueue(PromotionJob::TouchLastAccessed { ids })
    }

    /// Number of jobs queued or running
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Resolve once no job is queued or running
    pub async fn wait_idle(&self) {
        let mut receiver = self.outstanding.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = receiver.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting jobs, drain the queue and wait for the worker to exit
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "promotion worker terminated abnormally");
            }
        }

        tracing::info!("promotion scheduler stopped");
    }

    fn forget(&self, job: &PromotionJob) {
        if let PromotionJob::Promote(key) = job {
            self.queued.remove(key);
        }
    }
}

impl Drop for PromotionScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

struct PromotionWorker {
    working: WorkingMemoryStore,
    long_term: LongTermMemory,
    strategies: StrategyRegistry,
    queued: Arc<DashSet<SessionKey>>,
    outstanding: Arc<watch::Sender<usize>>,
}

impl PromotionWorker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<PromotionJob>) {
        while let Some(job) = receiver.recv().await {
            let kind = job.kind();
            if let Err(e) = self.execute(job).await {
                tracing::error!(job = kind, error = %e, "background job failed");
            }
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }

        tracing::debug!("promotion queue closed, worker exiting");
    }

    async fn execute(&self, job: PromotionJob) -> MemoryResult<()> {
        match job {
            PromotionJob::Promote(key) => {
                self.queued.remove(&key);
                self.promote(&key).await
            }
            PromotionJob::Index {
                records,
                deduplicate,
            } => {
                let requested = records.len();
                let inserted = self.long_term.create(records, deduplicate).await?;
                tracing::debug!(requested, inserted, "indexed records");
                Ok(())
            }
            PromotionJob::TouchLastAccessed { ids } => {
                self.long_term.touch_last_accessed(&ids).await;
                Ok(())
            }
        }
    }

    async fn promote(&self, key: &SessionKey) -> MemoryResult<()> {
        let memory = self
            .working
            .get(
                &key.session_id,
                key.namespace.as_deref(),
                key.user_id.as_deref(),
                None,
            )
            .await?;

        let memories: Vec<MemoryRecord> = memory
            .memories
            .iter()
            .filter(|m| m.is_pending())
            .cloned()
            .collect();
        let messages: Vec<MemoryMessage> = memory
            .messages
            .iter()
            .filter(|m| m.is_pending())
            .cloned()
            .collect();

        if memories.is_empty() && messages.is_empty() {
            tracing::debug!(session_id = %key.session_id, "nothing to promote");
            return Ok(());
        }

        let strategy_name = &memory.long_term_memory_strategy.strategy;

        let mut candidates: Vec<MemoryRecord> = memories
            .into_iter()
            .map(|mut record| {
                if record.session_id.is_none() {
                    record.session_id = Some(memory.session_id.clone());
                }
                if record.namespace.is_none() {
                    record.namespace = memory.namespace.clone();
                }
                if record.user_id.is_none() {
                    record.user_id = memory.user_id.clone();
                }
                record
            })
            .collect();

        // A failed extraction still lets the structured memories through; the
        // messages stay pending for the next job
        let extraction_error = if messages.is_empty() {
            None
        } else {
            let extracted = match self.strategies.get(strategy_name) {
                Some(strategy) => strategy.extract(&memory, &messages).await,
                None => Err(MemoryError::extraction(
                    strategy_name.clone(),
                    "strategy is not registered",
                )),
            };
            match extracted {
                Ok(records) => {
                    candidates.extend(records);
                    None
                }
                Err(e) => Some(e),
            }
        };

        let candidate_count = candidates.len();
        let inserted = self.long_term.create(candidates, true).await?;

        tracing::info!(
            session_id = %key.session_id,
            strategy = %strategy_name,
            candidates = candidate_count,
            inserted,
            "promoted working memory"
        );

        match extraction_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
