//! Batch ingestion pipeline.
//!
//! Segmentation is a read-modify-write over per-device state, so batches for
//! one device must be applied one at a time, in arrival order. The pipeline
//! gives every device its own single-consumer queue and worker task: batches
//! for different devices proceed fully in parallel, batches for the same
//! device are serialized through its queue. Metrics computation is read-only
//! over already-tagged samples and runs as a detached task so it never blocks
//! the ingestion path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;
use crate::segmenter::FlightSegmenter;
use crate::store::{SessionRepository, StateStore, TelemetryStore};
use crate::telemetry::{validate_batch, TelemetrySample};

/// Queue depth of each per-device worker.
const WORKER_QUEUE_DEPTH: usize = 64;

/// Acknowledgement returned to the ingestion caller.
///
/// Acceptance means the batch passed validation, was persisted, and was
/// queued for segmentation; segmentation itself is asynchronous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReceipt {
    /// The device the batch belongs to.
    pub device_id: Uuid,
    /// Number of samples accepted.
    pub accepted: usize,
}

/// The ingestion pipeline: validation, per-device serialization, and
/// background analytics over the configured stores.
pub struct IngestPipeline {
    inner: Arc<PipelineInner>,
    workers: Mutex<HashMap<Uuid, mpsc::Sender<Vec<TelemetrySample>>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

struct PipelineInner {
    segmenter: FlightSegmenter,
    states: Arc<dyn StateStore>,
    telemetry: Arc<dyn TelemetryStore>,
    sessions: Arc<dyn SessionRepository>,
    max_batch_size: usize,
    analytics: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("max_batch_size", &self.inner.max_batch_size)
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    /// Create a pipeline over the given stores.
    #[must_use]
    pub fn new(
        segmenter: FlightSegmenter,
        states: Arc<dyn StateStore>,
        telemetry: Arc<dyn TelemetryStore>,
        sessions: Arc<dyn SessionRepository>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                segmenter,
                states,
                telemetry,
                sessions,
                max_batch_size,
                analytics: Mutex::new(Vec::new()),
            }),
            workers: Mutex::new(HashMap::new()),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// Ingest one batch of samples for one device.
    ///
    /// The batch is validated and persisted synchronously, then queued for
    /// segmentation on the device's worker; this method returns as soon as
    /// the batch is queued. An empty batch is a no-op. Segmentation failures
    /// inside the worker are logged and the batch dropped; they are never
    /// re-raised here.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch exceeds the size cap, a sample fails
    /// validation, raw persistence fails, or the pipeline has shut down.
    pub async fn ingest(
        &self,
        device_id: Uuid,
        batch: Vec<TelemetrySample>,
    ) -> Result<IngestReceipt> {
        if batch.is_empty() {
            debug!(device_id = %device_id, "empty batch, nothing to do");
            return Ok(IngestReceipt {
                device_id,
                accepted: 0,
            });
        }
        validate_batch(&batch, self.inner.max_batch_size)?;

        let accepted = self.inner.telemetry.insert(device_id, &batch).await?;

        let sender = self.worker_sender(device_id).await;
        sender
            .send(batch)
            .await
            .map_err(|_| Error::PipelineClosed)?;

        Ok(IngestReceipt {
            device_id,
            accepted,
        })
    }

    /// Get the worker queue for a device, spawning the worker on first use.
    async fn worker_sender(&self, device_id: Uuid) -> mpsc::Sender<Vec<TelemetrySample>> {
        let mut workers = self.workers.lock().await;
        if let Some(sender) = workers.get(&device_id) {
            return sender.clone();
        }

        let (tx, mut rx) = mpsc::channel::<Vec<TelemetrySample>>(WORKER_QUEUE_DEPTH);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                if let Err(e) = PipelineInner::process_batch(&inner, device_id, batch).await {
                    error!(device_id = %device_id, error = %e, "segmentation failed, dropping batch");
                }
            }
        });

        self.worker_handles.lock().await.push(handle);
        workers.insert(device_id, tx.clone());
        tx
    }

    /// Drain every worker queue and wait for in-flight analytics.
    ///
    /// Consumes the pipeline; batches already accepted are fully processed
    /// before this returns.
    pub async fn shutdown(self) {
        self.workers.lock().await.clear();

        let handles = std::mem::take(&mut *self.worker_handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }

        // Workers may have scheduled analytics while draining.
        loop {
            let handles = std::mem::take(&mut *self.inner.analytics.lock().await);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}

impl PipelineInner {
    /// Run segmentation for one batch. Called only from the device's worker,
    /// so state access is serialized per device.
    async fn process_batch(
        inner: &Arc<Self>,
        device_id: Uuid,
        mut batch: Vec<TelemetrySample>,
    ) -> Result<()> {
        let state = inner
            .states
            .get(device_id)
            .await
            .map_err(|e| Error::state_unavailable(device_id, e.to_string()))?
            .unwrap_or_default();

        let now = Utc::now();
        let segmentation = inner.segmenter.process(device_id, state, &mut batch, now);

        if let Some(session) = &segmentation.opened {
            inner.sessions.create(session).await?;
            info!(
                session_id = %session.id,
                device_id = %device_id,
                start_ts = %session.start_ts,
                "flight started"
            );
        }

        if let Some(session_id) = segmentation.tagged_session {
            let timestamps: Vec<_> = batch.iter().map(|s| s.ts).collect();
            inner
                .telemetry
                .assign_session(device_id, &timestamps, session_id)
                .await?;
        }

        if let Some(close) = segmentation.closed {
            inner
                .sessions
                .set_end(close.session_id, close.end_ts)
                .await?;
            info!(
                session_id = %close.session_id,
                device_id = %device_id,
                end_ts = %close.end_ts,
                "flight ended"
            );
        }

        inner
            .states
            .set(device_id, &segmentation.state)
            .await
            .map_err(|e| Error::state_unavailable(device_id, e.to_string()))?;

        if let Some(close) = segmentation.closed {
            Self::spawn_analytics(inner, device_id, close.session_id).await;
        }

        Ok(())
    }

    /// Schedule metrics computation for a closed session.
    ///
    /// Analytics runs detached from the worker: a failure is logged and the
    /// session's metrics stay empty, without blocking ingestion or other
    /// sessions.
    async fn spawn_analytics(inner: &Arc<Self>, device_id: Uuid, session_id: Uuid) {
        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            if let Err(e) = task_inner.run_analytics(device_id, session_id).await {
                error!(
                    session_id = %session_id,
                    error = %e,
                    "analytics failed, leaving metrics empty"
                );
            }
        });
        inner.analytics.lock().await.push(handle);
    }

    async fn run_analytics(&self, device_id: Uuid, session_id: Uuid) -> Result<()> {
        let samples = self.telemetry.session_samples(device_id, session_id).await?;
        if samples.is_empty() {
            debug!(session_id = %session_id, "no samples recorded, skipping analytics");
            return Ok(());
        }

        let metrics = metrics::compute(&samples);
        self.sessions.set_metrics(session_id, &metrics).await?;
        info!(
            session_id = %session_id,
            sample_count = samples.len(),
            "analytics complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSet;
    use crate::session::Session;
    use crate::store::{MemorySessionRepository, MemoryStateStore, MemoryTelemetryStore};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct Fixture {
        states: Arc<MemoryStateStore>,
        telemetry: Arc<MemoryTelemetryStore>,
        sessions: Arc<MemorySessionRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                states: Arc::new(MemoryStateStore::new()),
                telemetry: Arc::new(MemoryTelemetryStore::new()),
                sessions: Arc::new(MemorySessionRepository::new()),
            }
        }

        fn pipeline(&self) -> IngestPipeline {
            self.pipeline_with_max_batch(500)
        }

        fn pipeline_with_max_batch(&self, max: usize) -> IngestPipeline {
            IngestPipeline::new(
                FlightSegmenter::default(),
                self.states.clone(),
                self.telemetry.clone(),
                self.sessions.clone(),
                max,
            )
        }
    }

    fn high_batch(count: i64) -> Vec<TelemetrySample> {
        (0..count)
            .map(|i| TelemetrySample::new(ts(i), 0.6))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let device = Uuid::new_v4();

        let receipt = pipeline.ingest(device, Vec::new()).await.unwrap();
        assert_eq!(receipt.accepted, 0);

        pipeline.shutdown().await;
        assert!(fixture.states.get(device).await.unwrap().is_none());
        assert!(fixture
            .sessions
            .list_by_device(device, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline_with_max_batch(2);
        let device = Uuid::new_v4();

        let result = pipeline.ingest(device, high_batch(3)).await;
        assert!(matches!(result, Err(Error::BatchTooLarge { len: 3, max: 2 })));

        pipeline.shutdown().await;
        // Rejected before anything was stored.
        assert!(fixture
            .sessions
            .list_by_device(device, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_sample_is_rejected() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let device = Uuid::new_v4();

        let batch = vec![TelemetrySample::new(ts(0), 1.7)];
        let result = pipeline.ingest(device, batch).await;
        assert!(matches!(result, Err(Error::InvalidSample { .. })));

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_high_throttle_batch_opens_flight() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let device = Uuid::new_v4();

        let receipt = pipeline.ingest(device, high_batch(5)).await.unwrap();
        assert_eq!(receipt.accepted, 5);
        pipeline.shutdown().await;

        let sessions = fixture.sessions.list_by_device(device, 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.start_ts, ts(0));
        assert!(session.is_open());

        let state = fixture.states.get(device).await.unwrap().unwrap();
        assert_eq!(state.active_session_id, Some(session.id));

        let samples = fixture
            .telemetry
            .session_samples(device, session.id)
            .await
            .unwrap();
        assert_eq!(samples.len(), 5);
    }

    #[tokio::test]
    async fn test_low_throttle_batch_without_flight_is_inert() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let device = Uuid::new_v4();

        let batch: Vec<_> = (0..3).map(|i| TelemetrySample::new(ts(i), 0.02)).collect();
        pipeline.ingest(device, batch).await.unwrap();
        pipeline.shutdown().await;

        assert!(fixture
            .sessions
            .list_by_device(device, 10)
            .await
            .unwrap()
            .is_empty());
        let state = fixture.states.get(device).await.unwrap().unwrap();
        assert!(!state.is_active());
    }

    #[tokio::test]
    async fn test_flight_closes_and_metrics_are_computed() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let device = Uuid::new_v4();

        // Sample timestamps are fixed in the past, so once the closing batch
        // arrives the wall-clock idle gap has long since elapsed.
        let mut batch: Vec<_> = (0..15)
            .map(|i| {
                TelemetrySample::new(ts(i), 0.5)
                    .with_power(16.0, 10.0)
                    .with_attitude(50.0, 0.0, 0.0)
            })
            .collect();
        batch.push(TelemetrySample::new(ts(15), 0.02));

        pipeline.ingest(device, batch).await.unwrap();
        pipeline.shutdown().await;

        let sessions = fixture.sessions.list_by_device(device, 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert!(!session.is_open());
        assert!(session.end_ts.unwrap() >= session.start_ts);

        let metrics = &session.metrics;
        assert_eq!(metrics.flight_duration_s, Some(15.0));
        assert!(metrics.average_throttle.is_some());
        assert!(metrics.peak_power_w.is_some());
        assert!(metrics.freestyle_score.is_some());

        // Every sample of the batch carries the session tag, including the
        // low-throttle tail.
        let samples = fixture
            .telemetry
            .session_samples(device, session.id)
            .await
            .unwrap();
        assert_eq!(samples.len(), 16);

        let state = fixture.states.get(device).await.unwrap().unwrap();
        assert!(!state.is_active());
    }

    #[tokio::test]
    async fn test_flight_spans_multiple_batches() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let device = Uuid::new_v4();

        pipeline.ingest(device, high_batch(5)).await.unwrap();
        let tail = vec![TelemetrySample::new(ts(5), 0.01)];
        pipeline.ingest(device, tail).await.unwrap();
        pipeline.shutdown().await;

        let sessions = fixture.sessions.list_by_device(device, 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert!(!session.is_open());

        let samples = fixture
            .telemetry
            .session_samples(device, session.id)
            .await
            .unwrap();
        assert_eq!(samples.len(), 6);
        assert!(!session.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_pipeline_restart() {
        let fixture = Fixture::new();
        let device = Uuid::new_v4();

        let pipeline = fixture.pipeline();
        pipeline.ingest(device, high_batch(3)).await.unwrap();
        pipeline.shutdown().await;

        // A new pipeline over the same stores continues the open flight
        // instead of opening a second one.
        let pipeline = fixture.pipeline();
        let batch = vec![TelemetrySample::new(ts(3), 0.7)];
        pipeline.ingest(device, batch).await.unwrap();
        pipeline.shutdown().await;

        let sessions = fixture.sessions.list_by_device(device, 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_devices_are_independent() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline();
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();

        pipeline.ingest(device_a, high_batch(3)).await.unwrap();
        pipeline.ingest(device_b, high_batch(4)).await.unwrap();
        pipeline.shutdown().await;

        let sessions_a = fixture.sessions.list_by_device(device_a, 10).await.unwrap();
        let sessions_b = fixture.sessions.list_by_device(device_b, 10).await.unwrap();
        assert_eq!(sessions_a.len(), 1);
        assert_eq!(sessions_b.len(), 1);
        assert_ne!(sessions_a[0].id, sessions_b[0].id);
    }

    /// Repository whose metrics writes always fail, for isolation tests.
    struct FailingMetricsRepository {
        delegate: MemorySessionRepository,
    }

    #[async_trait]
    impl SessionRepository for FailingMetricsRepository {
        async fn create(&self, session: &Session) -> Result<()> {
            self.delegate.create(session).await
        }

        async fn set_end(&self, session_id: Uuid, end_ts: DateTime<Utc>) -> Result<()> {
            self.delegate.set_end(session_id, end_ts).await
        }

        async fn set_metrics(&self, _session_id: Uuid, _metrics: &MetricsSet) -> Result<()> {
            Err(Error::internal("metrics write refused"))
        }

        async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
            self.delegate.get(session_id).await
        }

        async fn list_by_device(&self, device_id: Uuid, limit: usize) -> Result<Vec<Session>> {
            self.delegate.list_by_device(device_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_analytics_failure_leaves_metrics_empty() {
        let states = Arc::new(MemoryStateStore::new());
        let telemetry = Arc::new(MemoryTelemetryStore::new());
        let sessions = Arc::new(FailingMetricsRepository {
            delegate: MemorySessionRepository::new(),
        });
        let pipeline = IngestPipeline::new(
            FlightSegmenter::default(),
            states,
            telemetry,
            sessions.clone(),
            500,
        );
        let device = Uuid::new_v4();

        let mut batch = high_batch(3);
        batch.push(TelemetrySample::new(ts(3), 0.01));
        // Ingestion succeeds even though analytics will fail.
        pipeline.ingest(device, batch).await.unwrap();
        pipeline.shutdown().await;

        let listed = sessions.list_by_device(device, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        // The session still closed; only its metrics stayed empty.
        assert!(!listed[0].is_open());
        assert!(listed[0].metrics.is_empty());
    }
}
