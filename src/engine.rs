//! The batching driver loop.
//!
//! `BatchEngine` pulls records into bins, migrates completed bins to a ready
//! queue, and processes one ready bin per tick with a two-phase multi-session
//! commit sequence. The engine handles:
//! - Admission of records into bins by group key
//! - Age/size/count-based eviction and starvation avoidance
//! - The redundancy-biased commit ordering on the success path
//! - Failure routing and rollback on the two failure paths

use crate::binning::{Bin, BinEntry, BinManager};
use crate::record::Destination;
use crate::traits::{BinnedRecordProcessor, ProcessOutcome, SessionFactory};
use crate::{EngineConfig, EngineMetrics, EngineResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What one tick accomplished.
///
/// A report with no progress at all is the signal for the hosting scheduler to
/// back off before the next tick instead of busy-spinning on an empty upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    /// Records admitted into bins during the fill phase
    pub records_binned: usize,
    /// Bins moved to the ready queue during the migrate phase
    pub bins_migrated: usize,
    /// Bins handed to the processing hook (0 or 1)
    pub bins_processed: usize,
}

impl TickReport {
    /// False when the tick accomplished nothing and the caller should yield
    pub fn made_progress(&self) -> bool {
        self.records_binned > 0 || self.bins_migrated > 0 || self.bins_processed > 0
    }
}

/// Point-in-time view of the engine, readable concurrently with a tick
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub engine_name: String,
    pub active_bins: usize,
    pub active_groups: usize,
    pub ready_bins: usize,
    pub running: bool,
}

impl EngineStatus {
    /// JSON rendering for status endpoints and log payloads
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The per-instance batching engine.
///
/// One engine owns one [`BinManager`] and one ready queue. Ticks are
/// non-reentrant by construction: an instance-level mutex is taken at tick
/// start, so at most one tick mutates the bins at any moment regardless of
/// what the hosting scheduler guarantees. Status reads stay concurrent.
pub struct BatchEngine<P: BinnedRecordProcessor> {
    processor: P,
    sessions: Arc<dyn SessionFactory>,
    config: EngineConfig,
    bin_manager: BinManager,
    ready_bins: Mutex<VecDeque<Bin>>,
    running: Arc<AtomicBool>,
    tick_guard: tokio::sync::Mutex<()>,
    metrics: EngineMetrics,
}

impl<P: BinnedRecordProcessor> BatchEngine<P> {
    /// Create a new engine
    pub fn new(
        processor: P,
        sessions: Arc<dyn SessionFactory>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        // Validate configuration
        config.validate()?;

        // Initialize tracing
        Self::init_tracing(&config);

        info!("Initializing batching engine");
        info!("Engine: {}", config.engine_name);

        let bin_manager = BinManager::new();
        bin_manager.set_minimum_size(config.binning.minimum_group_size);
        bin_manager.set_maximum_size(config.binning.maximum_group_size);
        bin_manager.set_minimum_entries(config.binning.minimum_entries);
        bin_manager.set_maximum_entries(config.binning.maximum_entries);
        bin_manager.set_max_bin_count(config.binning.max_bin_count);
        bin_manager.set_max_bin_age(config.binning.max_bin_age());

        let metrics = EngineMetrics::new(&config.engine_name);
        metrics.set_health(true);

        Ok(Self {
            processor,
            sessions,
            config,
            bin_manager,
            ready_bins: Mutex::new(VecDeque::new()),
            running: Arc::new(AtomicBool::new(true)),
            tick_guard: tokio::sync::Mutex::new(()),
            metrics,
        })
    }

    /// Run the engine until stopped.
    ///
    /// Installs a ctrl-c handler, then ticks repeatedly, sleeping for the
    /// configured tick interval whenever a tick made no progress. On exit the
    /// engine is reset: active bins are purged and ready-bin sessions rolled
    /// back.
    pub async fn run(&self) -> EngineResult<()> {
        info!("Starting batching engine");
        self.setup_shutdown_handler();

        let idle_sleep = self.config.processing.tick_interval();
        while self.running.load(Ordering::Relaxed) {
            match self.tick().await {
                Ok(report) if report.made_progress() => {}
                Ok(_) => tokio::time::sleep(idle_sleep).await,
                Err(e) => {
                    // a failed tick never stops the engine; rolled-back
                    // records redeliver on a later cycle
                    error!("Tick failed: {}", e);
                    tokio::time::sleep(idle_sleep).await;
                }
            }
        }

        self.reset().await;
        self.metrics.set_health(false);
        info!("Batching engine stopped");
        Ok(())
    }

    /// Setup shutdown signal handler
    fn setup_shutdown_handler(&self) {
        let running = self.running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    /// Request a stop.
    ///
    /// Prevents new fill-phase admissions; a tick already in its commit
    /// sequence finishes normally (partial commit is safe under the
    /// redundancy-biased ordering).
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Whether the engine is accepting new work
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Execute one scheduling tick: fill, migrate, process.
    pub async fn tick(&self) -> EngineResult<TickReport> {
        // ticks are never reentrant, whatever the caller does
        let _guard = self.tick_guard.lock().await;

        let records_binned = self.fill().await?;
        debug!("Binned {} records", records_binned);

        if !self.running.load(Ordering::Relaxed) {
            return Ok(TickReport {
                records_binned,
                ..TickReport::default()
            });
        }

        let bins_migrated = self.migrate();
        let bins_processed = self.process_one().await?;

        self.metrics.set_active_bins(self.bin_manager.bin_count());
        self.metrics.set_ready_bins(self.ready_bins.lock().len());

        Ok(TickReport {
            records_binned,
            bins_migrated,
            bins_processed,
        })
    }

    /// Fill phase: pull records into bins, one fresh session per record.
    async fn fill(&self) -> EngineResult<usize> {
        let mut binned = 0;
        let max_bin_count = self.config.binning.max_bin_count;

        while self.bin_manager.bin_count() <= max_bin_count {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            let mut session = self.sessions.create_session().await?;
            let record = match session.next().await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    session.rollback().await?;
                    break;
                }
                Err(e) => {
                    let _ = session.rollback().await;
                    return Err(e);
                }
            };

            let record = match self.processor.preprocess(record).await {
                Ok(record) => record,
                Err(e) => {
                    let _ = session.rollback().await;
                    return Err(e);
                }
            };

            let group_key = self.processor.group_key(&record);
            let entry = BinEntry::new(record, session);

            if let Err(rejected) = self.bin_manager.offer(&group_key, entry) {
                // no bin can take it: give the record a bin of its own so an
                // oversized input never loops on admission failure
                warn!(
                    group_key,
                    record_id = rejected.record.id(),
                    size = rejected.record.size(),
                    "Record fits no configured bin, creating dedicated bin"
                );
                let mut dedicated = Bin::unbounded();
                if let Err(entry) = dedicated.offer(rejected) {
                    // an unbounded bin accepts anything; reaching this is a bug
                    return Err(crate::EngineError::session_violation(format!(
                        "unbounded bin rejected record {}",
                        entry.record.id()
                    )));
                }
                dedicated.seal();
                self.ready_bins.lock().push_back(dedicated);
                self.metrics.record_oversized();
            }

            binned += 1;
        }

        self.metrics.record_binned(binned);
        Ok(binned)
    }

    /// Migrate phase: move completed bins to the ready queue, force-evicting
    /// the oldest bin when the manager is saturated and nothing became ready.
    fn migrate(&self) -> usize {
        let ready = self.bin_manager.remove_ready_bins(true);
        let mut migrated = ready.len();

        let mut queue = self.ready_bins.lock();
        for bin in ready {
            queue.push_back(bin);
        }

        if migrated == 0 && self.bin_manager.bin_count() >= self.config.binning.max_bin_count {
            if let Some(bin) = self.bin_manager.remove_oldest_bin() {
                queue.push_back(bin);
                migrated += 1;
                self.metrics.record_force_eviction();
            }
        }

        migrated
    }

    /// Process phase: dequeue at most one ready bin and run the two-phase
    /// commit sequence around the processing hook.
    async fn process_one(&self) -> EngineResult<usize> {
        let bin = self.ready_bins.lock().pop_front();
        let mut bin = match bin {
            Some(bin) => bin,
            None => return Ok(0),
        };

        let entry_count = bin.len();
        let bin_size = bin.size();
        let mut bin_session = self.sessions.create_session().await?;

        let started = Instant::now();
        let outcome = self
            .processor
            .process_bin(bin.contents_mut(), bin_session.as_mut())
            .await;
        self.metrics.record_process_duration(started.elapsed());
        self.metrics.record_bin_processed(entry_count, bin_size);

        match outcome {
            ProcessOutcome::Completed { already_committed } => {
                // Commit the bundle's session before the originals' sessions:
                // with no cross-session atomicity, a crash between the commits
                // must cause redundant reprocessing, never data loss.
                if let Err(e) = bin_session.commit().await {
                    error!("Failed to commit bin session: {}", e);
                    Self::rollback_entries(bin.contents_mut()).await;
                    if let Err(err) = bin_session.rollback().await {
                        error!("Failed to roll back bin session: {}", err);
                    }
                    return Err(e);
                }

                if !already_committed {
                    let contents = bin.contents_mut();
                    for i in 0..contents.len() {
                        let settled = {
                            let entry = &mut contents[i];
                            match entry
                                .session
                                .transfer(&entry.record, Destination::Original)
                                .await
                            {
                                Ok(()) => entry.session.commit().await,
                                Err(e) => Err(e),
                            }
                        };
                        if let Err(e) = settled {
                            error!(
                                record_id = contents[i].record.id(),
                                "Failed to settle originating session: {}", e
                            );
                            // every remaining session is rolled back so no
                            // record is left neither routed nor redelivered
                            Self::rollback_entries(&mut contents[i..]).await;
                            return Err(e);
                        }
                    }
                }
                debug!(entries = entry_count, size = bin_size, "Bin processed");
            }
            ProcessOutcome::RecoverableFailure { reason } => {
                warn!(
                    entries = entry_count,
                    reason, "Failed to process bin, routing records to failure"
                );
                self.metrics.record_process_failure("recoverable");

                // each input is failed independently so one bad record never
                // blocks the others from being routed
                for entry in bin.contents_mut() {
                    if let Err(e) = entry
                        .session
                        .transfer(&entry.record, Destination::Failure)
                        .await
                    {
                        error!(record_id = entry.record.id(), "Failed to route record: {}", e);
                        continue;
                    }
                    if let Err(e) = entry.session.commit().await {
                        error!(
                            record_id = entry.record.id(),
                            "Failed to commit failure routing: {}", e
                        );
                    }
                }
                if let Err(e) = bin_session.rollback().await {
                    error!("Failed to roll back bin session: {}", e);
                }
            }
            ProcessOutcome::UnrecoverableFailure { source } => {
                error!(
                    entries = entry_count,
                    "Failed to process bin, rolling back sessions: {}", source
                );
                self.metrics.record_process_failure("unrecoverable");

                Self::rollback_entries(bin.contents_mut()).await;
                if let Err(e) = bin_session.rollback().await {
                    error!("Failed to roll back bin session: {}", e);
                }
            }
        }

        Ok(1)
    }

    /// Best-effort rollback of every entry's originating session
    async fn rollback_entries(entries: &mut [BinEntry]) {
        for entry in entries {
            if let Err(e) = entry.session.rollback().await {
                error!(record_id = entry.record.id(), "Failed to roll back: {}", e);
            }
        }
    }

    /// Discard all in-memory state: purge active bins and roll back every
    /// session still referenced by the ready queue.
    pub async fn reset(&self) {
        self.bin_manager.purge();

        let drained: Vec<Bin> = self.ready_bins.lock().drain(..).collect();
        for bin in drained {
            for mut entry in bin.into_contents() {
                if let Err(e) = entry.session.rollback().await {
                    error!(record_id = entry.record.id(), "Rollback during reset failed: {}", e);
                }
            }
        }
    }

    /// Snapshot of the engine state, safe to call concurrently with a tick
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            engine_name: self.config.engine_name.clone(),
            active_bins: self.bin_manager.bin_count(),
            active_groups: self.bin_manager.group_count(),
            ready_bins: self.ready_bins.lock().len(),
            running: self.running.load(Ordering::Relaxed),
        }
    }

    /// Initialize tracing/logging
    fn init_tracing(config: &EngineConfig) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.processing.log_level));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok(); // Ignore if already initialized
    }
}
