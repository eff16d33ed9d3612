// src/batch_inference.rs
// Splits a transcript into fixed-size batches and runs persona extraction on each,
// in parallel on a bounded rayon pool. Results are joined before anyone aggregates them.

use rand::Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{PipelineSettings, TaxonomyMode};
use crate::error::PipelineError;
use crate::persona::{BatchResult, PersonaRecord};
use crate::persona_extractor::{degrade_batch, PersonaExtractor};

/// Called with `(completed_batches, total_batches)` as batches finish.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Contiguous slices of at most `batch_size` messages, in original order.
pub fn partition(messages: &[String], batch_size: usize) -> Vec<&[String]> {
    if batch_size == 0 {
        return Vec::new();
    }
    messages.chunks(batch_size).collect()
}

pub struct BatchOrchestrator {
    extractor: Arc<PersonaExtractor>,
    max_concurrency: usize,
    batch_retries: u32,
    retry_backoff: Duration,
    progress: Option<Arc<ProgressFn>>,
}

impl BatchOrchestrator {
    pub fn new(extractor: Arc<PersonaExtractor>, settings: &PipelineSettings) -> Self {
        Self {
            extractor,
            max_concurrency: settings.max_concurrency.max(1),
            batch_retries: settings.batch_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run every batch and pool all personas they produced, in batch order.
    ///
    /// Batches that fail recoverably contribute nothing. A fatal gateway error stops
    /// scheduling further batches and is returned once in-flight ones drain.
    pub fn run(
        &self,
        messages: &[String],
        batch_size: usize,
        persona_count: usize,
        taxonomy: TaxonomyMode,
    ) -> Result<Vec<PersonaRecord>, PipelineError> {
        if batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        let batches = partition(messages, batch_size);
        let total = batches.len();
        if total == 0 {
            tracing::info!("No messages to analyze");
            return Ok(Vec::new());
        }

        tracing::info!(
            messages = messages.len(),
            batches = total,
            batch_size = batch_size,
            concurrency = self.max_concurrency,
            taxonomy = %taxonomy,
            "Starting batch extraction"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_concurrency)
            .thread_name(|i| format!("persona-batch-{}", i))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to build batch pool: {}", e)))?;

        let completed = AtomicUsize::new(0);

        let results: Result<Vec<BatchResult>, PipelineError> = pool.install(|| {
            batches
                .par_iter()
                .enumerate()
                .map(|(index, batch)| {
                    let result = self.run_batch(index, batch, persona_count, taxonomy);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = &self.progress {
                        progress(done, total);
                    }
                    result
                })
                .collect()
        });

        let pool_personas: Vec<PersonaRecord> = results?
            .into_iter()
            .flat_map(|batch| batch.personas)
            .collect();

        tracing::info!(batches = total, personas = pool_personas.len(), "Batch extraction complete");
        Ok(pool_personas)
    }

    fn run_batch(
        &self,
        index: usize,
        batch: &[String],
        persona_count: usize,
        taxonomy: TaxonomyMode,
    ) -> Result<BatchResult, PipelineError> {
        let mut attempt = 0;
        let outcome = loop {
            // The last attempt goes through the extractor's own degradation.
            if attempt >= self.batch_retries {
                break self.extractor.extract(batch, persona_count, taxonomy);
            }
            match self.extractor.try_extract(batch, persona_count, taxonomy) {
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        batch = index,
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying batch"
                    );
                    thread::sleep(delay);
                }
                other => break degrade_batch(other, batch.len()),
            }
        };

        match outcome {
            Ok(result) => {
                tracing::debug!(batch = index, personas = result.personas.len(), "Batch finished");
                Ok(result)
            }
            Err(e) => {
                tracing::error!(batch = index, error = %e, "Fatal model error, aborting analysis");
                Err(PipelineError::Gateway(e))
            }
        }
    }

    /// Exponential backoff with up to 50% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let base_ms = base.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
        Duration::from_millis(base_ms + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::testing::ScriptedGateway;
    use crate::persona_extractor::ExtractorSettings;
    use std::sync::Mutex;

    fn messages(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("message {}", i)).collect()
    }

    fn settings(concurrency: usize, retries: u32) -> PipelineSettings {
        PipelineSettings {
            max_concurrency: concurrency,
            batch_retries: retries,
            retry_backoff_ms: 0,
            ..PipelineSettings::default()
        }
    }

    fn orchestrator(gateway: Arc<ScriptedGateway>, settings: &PipelineSettings) -> BatchOrchestrator {
        let extractor = Arc::new(PersonaExtractor::new(gateway, ExtractorSettings::default()));
        BatchOrchestrator::new(extractor, settings)
    }

    fn three_personas(tag: &str) -> String {
        format!(
            r#"{{"personas": [
                {{"name": "{tag} A", "share": 50}},
                {{"name": "{tag} B", "share": 30}},
                {{"name": "{tag} C", "share": 20}}
            ]}}"#
        )
    }

    #[test]
    fn test_partition_covers_input_exactly_once() {
        for (n, size) in [(0, 3), (1, 3), (7, 3), (9, 3), (450, 200), (5, 10)] {
            let input = messages(n);
            let batches = partition(&input, size);
            assert!(batches.iter().all(|b| b.len() <= size && !b.is_empty()));
            let rejoined: Vec<String> = batches.concat();
            assert_eq!(rejoined, input);
        }
    }

    #[test]
    fn test_partition_sizes_for_450_messages() {
        let input = messages(450);
        let sizes: Vec<usize> = partition(&input, 200).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
    }

    #[test]
    fn test_run_pools_all_batches() {
        let gateway = Arc::new(ScriptedGateway::always(Ok(three_personas("Viewer"))));
        let orchestrator = orchestrator(gateway.clone(), &settings(2, 0));

        let pool = orchestrator.run(&messages(450), 200, 3, TaxonomyMode::Open).unwrap();
        assert_eq!(gateway.calls(), 3);
        assert_eq!(pool.len(), 9);
    }

    #[test]
    fn test_failed_batch_contributes_nothing() {
        let gateway = Arc::new(ScriptedGateway::sequence(vec![
            Ok(three_personas("First")),
            Ok("total nonsense".to_string()),
            Ok(three_personas("Third")),
        ]));
        // One worker keeps the scripted replies aligned with batch order.
        let orchestrator = orchestrator(gateway.clone(), &settings(1, 0));

        let pool = orchestrator.run(&messages(30), 10, 3, TaxonomyMode::Open).unwrap();
        assert_eq!(pool.len(), 6);
        assert!(pool.iter().all(|p| !p.name.starts_with("Second")));
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let gateway = Arc::new(ScriptedGateway::sequence(vec![
            Err(GatewayError::Unavailable("503".to_string())),
            Ok(three_personas("Retry")),
        ]));
        let orchestrator = orchestrator(gateway.clone(), &settings(1, 1));

        let pool = orchestrator.run(&messages(5), 10, 3, TaxonomyMode::Open).unwrap();
        assert_eq!(gateway.calls(), 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_exhausted_retries_degrade_to_empty() {
        let gateway = Arc::new(ScriptedGateway::always(Err(GatewayError::Unavailable(
            "503".to_string(),
        ))));
        let orchestrator = orchestrator(gateway.clone(), &settings(1, 2));

        let pool = orchestrator.run(&messages(5), 10, 3, TaxonomyMode::Open).unwrap();
        assert_eq!(gateway.calls(), 3);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_malformed_output_is_not_retried() {
        let gateway = Arc::new(ScriptedGateway::always(Ok("no json".to_string())));
        let orchestrator = orchestrator(gateway.clone(), &settings(1, 3));

        let pool = orchestrator.run(&messages(5), 10, 3, TaxonomyMode::Open).unwrap();
        assert_eq!(gateway.calls(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_unauthorized_aborts_run() {
        let gateway = Arc::new(ScriptedGateway::always(Err(GatewayError::Unauthorized(
            "bad key".to_string(),
        ))));
        let orchestrator = orchestrator(gateway, &settings(2, 2));

        let result = orchestrator.run(&messages(50), 10, 3, TaxonomyMode::Open);
        assert!(matches!(result, Err(PipelineError::Gateway(GatewayError::Unauthorized(_)))));
    }

    #[test]
    fn test_zero_batch_size_rejected_and_empty_input_skips_model() {
        let gateway = Arc::new(ScriptedGateway::always(Ok(three_personas("X"))));
        let orchestrator = orchestrator(gateway.clone(), &settings(1, 0));

        assert!(matches!(
            orchestrator.run(&messages(5), 0, 3, TaxonomyMode::Open),
            Err(PipelineError::Configuration(_))
        ));
        assert!(orchestrator.run(&[], 10, 3, TaxonomyMode::Open).unwrap().is_empty());
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn test_progress_reports_every_batch() {
        let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let gateway = Arc::new(ScriptedGateway::always(Ok(three_personas("P"))));
        let orchestrator = orchestrator(gateway, &settings(3, 0))
            .with_progress(Arc::new(move |done: usize, total: usize| sink.lock().unwrap().push((done, total))));

        orchestrator.run(&messages(25), 10, 3, TaxonomyMode::Open).unwrap();
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }
}
