//! Prediction runs: send each sample to a model and persist the parsed answers

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::analysis::EvaluationEngine;
use crate::config::RunnerSettings;
use crate::dataset::{
    build_messages, load_jsonl_lenient, write_jsonl, Dataset, LoadError, PredictionRecord, Sample,
};
use crate::providers::{CompletionRequest, LLMProvider, ProviderError, ProviderResult};

/// Configuration for a prediction run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Samples in flight at once
    pub workers: usize,
    /// Number of retries on failure
    pub retry_count: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    /// Keep records from an earlier run and skip samples they answered
    pub resume: bool,
    pub extra_params: IndexMap<String, Value>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&RunnerSettings::default())
    }
}

impl From<&RunnerSettings> for RunnerConfig {
    fn from(settings: &RunnerSettings) -> Self {
        Self {
            workers: settings.workers.max(1),
            retry_count: settings.retry_count,
            retry_delay_ms: settings.retry_delay_ms,
            max_retry_delay_ms: settings.max_retry_delay_ms,
            timeout_ms: settings.timeout_ms,
            temperature: Some(settings.temperature),
            max_tokens: settings.max_tokens,
            stream: settings.stream,
            resume: settings.resume,
            extra_params: settings.extra_params.clone(),
        }
    }
}

/// Outcome counts of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Samples in the selected slice
    pub selected: usize,
    /// Samples skipped because an earlier run answered them
    pub already_done: usize,
    /// Samples skipped because they have no id
    pub missing_id: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records in the rewritten output file
    pub records_written: usize,
}

/// Sends samples to a provider with bounded concurrency and retries
pub struct PredictionRunner {
    provider: Arc<dyn LLMProvider>,
    engine: Arc<EvaluationEngine>,
    config: RunnerConfig,
    semaphore: Arc<Semaphore>,
    progress: Arc<dyn ProgressCallback>,
}

impl PredictionRunner {
    pub fn new(provider: Arc<dyn LLMProvider>, engine: EvaluationEngine, config: RunnerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            provider,
            engine: Arc::new(engine),
            config,
            semaphore,
            progress: Arc::new(NoOpProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Predict every pending sample of `dataset` and rewrite `output`.
    ///
    /// Records are keyed by sample id. Earlier records keep their position;
    /// new ones follow in dataset order. Samples that still fail after all
    /// retries are not written, so the next resumed run picks them up.
    pub async fn run(&self, dataset: &Dataset, output: &Path) -> Result<RunSummary, LoadError> {
        let mut summary = RunSummary {
            selected: dataset.len(),
            ..Default::default()
        };

        let mut records: IndexMap<String, PredictionRecord> = IndexMap::new();
        if self.config.resume {
            for record in load_jsonl_lenient::<PredictionRecord>(output)? {
                if let Some(id) = record.id.clone() {
                    records.insert(id, record);
                }
            }
            let completed = records.values().filter(|r| r.has_response()).count();
            tracing::info!("Resume mode: found {} completed IDs", completed);
        }

        let mut pending = Vec::new();
        for sample in &dataset.samples {
            let Some(id) = sample.id.as_deref() else {
                tracing::warn!("Skipping sample without id");
                summary.missing_id += 1;
                continue;
            };
            if records.get(id).is_some_and(PredictionRecord::has_response) {
                summary.already_done += 1;
                continue;
            }
            pending.push(sample.clone());
        }

        if pending.is_empty() {
            tracing::info!("All samples already completed, nothing to do.");
            return Ok(summary);
        }

        tracing::info!(
            "Processing {} samples with {} worker(s) on {}",
            pending.len(),
            self.config.workers,
            self.provider.name()
        );

        let total = pending.len();
        let mut handles = Vec::with_capacity(total);
        for sample in pending {
            let worker = self.clone_for_sample();
            handles.push(tokio::spawn(async move {
                let result = worker.process_sample(&sample).await;
                (sample, result)
            }));
        }

        for (done, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((sample, Ok(record))) => {
                    summary.succeeded += 1;
                    let id = sample.id.unwrap_or_default();
                    self.progress.on_sample_complete(&id, true);
                    records.insert(id, record);
                }
                Ok((sample, Err(e))) => {
                    summary.failed += 1;
                    let id = sample.id.unwrap_or_default();
                    tracing::error!("Error processing sample {}: {}", id, e);
                    self.progress.on_sample_complete(&id, false);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!("Sample task panicked: {}", e);
                }
            }
            self.progress.on_progress(done + 1, total);
        }

        summary.records_written = write_jsonl(output, records.values())?;
        tracing::info!(
            "Wrote {} records to {} ({} new, {} failed)",
            summary.records_written,
            output.display(),
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    /// Ask the model about one sample and parse its answer
    async fn process_sample(&self, sample: &Sample) -> ProviderResult<PredictionRecord> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        let id = sample.id.as_deref().unwrap_or_default();
        self.progress.on_sample_start(id);

        let request = self.build_request(sample);
        let raw = self.complete_with_retry(id, &request).await?;
        Ok(self.engine.build_record(sample, raw))
    }

    fn build_request(&self, sample: &Sample) -> CompletionRequest {
        let messages = build_messages(self.engine.archetype(), self.engine.context(), sample);
        let mut request = CompletionRequest::new(messages)
            .with_max_tokens(self.config.max_tokens)
            .with_stream(self.config.stream)
            .with_extra_params(self.config.extra_params.clone());
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }

    async fn complete_with_retry(&self, id: &str, request: &CompletionRequest) -> ProviderResult<String> {
        let mut last_error = None;
        let mut delay = self.config.retry_delay_ms;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tracing::info!("Retry {} for sample {} on {}", attempt, id, self.provider.name());
                sleep(Duration::from_millis(delay)).await;
                delay = (delay * 2).min(self.config.max_retry_delay_ms);
            }

            match self.try_complete(request).await {
                Ok(response) => return Ok(response.content),
                Err(ProviderError::RateLimited { retry_after_ms }) => {
                    let wait = retry_after_ms.min(self.config.max_retry_delay_ms);
                    tracing::warn!("Rate limited on {}, waiting {}ms", self.provider.name(), wait);
                    sleep(Duration::from_millis(wait)).await;
                    last_error = Some(ProviderError::RateLimited { retry_after_ms });
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!("Error on {} for sample {}: {}", self.provider.name(), id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Parse("No attempts made".to_string())))
    }

    /// Single attempt bounded by the request timeout
    async fn try_complete(&self, request: &CompletionRequest) -> ProviderResult<crate::providers::CompletionResponse> {
        let timeout = Duration::from_millis(self.config.timeout_ms);

        match tokio::time::timeout(timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }

    fn clone_for_sample(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
            semaphore: self.semaphore.clone(),
            progress: self.progress.clone(),
        }
    }
}

/// Progress callback for tracking a run
pub trait ProgressCallback: Send + Sync {
    fn on_sample_start(&self, id: &str);
    fn on_sample_complete(&self, id: &str, success: bool);
    fn on_progress(&self, completed: usize, total: usize);
}

/// Default no-op progress callback
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_sample_start(&self, _id: &str) {}
    fn on_sample_complete(&self, _id: &str, _success: bool) {}
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Console progress callback
pub struct ConsoleProgress;

impl ProgressCallback for ConsoleProgress {
    fn on_sample_start(&self, _id: &str) {}

    fn on_sample_complete(&self, id: &str, success: bool) {
        if !success {
            eprintln!("  FAILED sample {}", id);
        }
    }

    fn on_progress(&self, completed: usize, total: usize) {
        if completed == total || completed % 10 == 0 {
            println!("Predicting answers: {}/{}", completed, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetContext, HistoryVariant, KnowledgeVariant, QuestionArchetype};
    use crate::providers::CompletionResponse;
    use crate::runner::RateLimiter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with the number of messages it was sent; fails for listed
    /// questions.
    struct MockProvider {
        calls: AtomicUsize,
        failing_question: Option<&'static str>,
        error: fn() -> ProviderError,
        limiter: Arc<RateLimiter>,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing_question: None,
                error: || ProviderError::Api {
                    status: 500,
                    message: "boom".into(),
                },
                limiter: Arc::new(RateLimiter::new(10_000, 0)),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let question = request.messages.last().and_then(|m| m.text()).unwrap_or_default();
            if Some(question) == self.failing_question {
                return Err((self.error)());
            }
            Ok(CompletionResponse {
                content: format!("Counting... <answer>{}</answer>", request.messages.len()),
                ..Default::default()
            })
        }

        fn rate_limiter(&self) -> &Arc<RateLimiter> {
            &self.limiter
        }
    }

    fn dataset() -> Dataset {
        let samples = ["a", "b", "c"]
            .iter()
            .map(|id| {
                serde_json::from_value(json!({
                    "id": id,
                    "sample_id": 1,
                    "round": 2,
                    "question_type": "Count Frequency(Tool)",
                    "question": format!("question {}", id),
                    "messages": [{"role": "user", "content": "guess"}],
                    "answer": 3,
                }))
                .unwrap()
            })
            .collect();
        Dataset::from_samples(
            samples,
            DatasetContext::new(KnowledgeVariant::KnowledgeIntensive, HistoryVariant::Concise),
        )
        .unwrap()
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            workers: 2,
            retry_count: 2,
            retry_delay_ms: 1,
            max_retry_delay_ms: 5,
            ..Default::default()
        }
    }

    fn runner(provider: Arc<MockProvider>, config: RunnerConfig) -> PredictionRunner {
        let ds = dataset();
        PredictionRunner::new(provider, EvaluationEngine::for_dataset(&ds), config)
    }

    #[tokio::test]
    async fn test_run_writes_parsed_records() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("preds/out.jsonl");
        let provider = Arc::new(MockProvider::new());

        let summary = runner(provider.clone(), config()).run(&dataset(), &output).await.unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.records_written, 3);

        let records: Vec<PredictionRecord> = crate::dataset::load_jsonl(&output).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        // system + transcript message + question
        assert_eq!(records[0].pred_answer, Some(json!(3)));
        assert_eq!(records[0].parse_kind.as_deref(), Some("number"));
        assert_eq!(records[0].extra["round"], json!(2));
    }

    #[tokio::test]
    async fn test_resume_skips_answered_samples() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");
        std::fs::write(
            &output,
            "{\"id\":\"b\",\"pred_answer\":9,\"raw_response\":\"<answer>9</answer>\"}\n\
             {\"id\":\"c\",\"pred_answer\":null,\"raw_response\":\"\"}\n",
        )
        .unwrap();
        let provider = Arc::new(MockProvider::new());

        let summary = runner(provider.clone(), config()).run(&dataset(), &output).await.unwrap();
        assert_eq!(summary.already_done, 1);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let records: Vec<PredictionRecord> = crate::dataset::load_jsonl(&output).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert_eq!(records[0].pred_answer, Some(json!(9)));
        assert_eq!(records[1].pred_answer, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_failed_samples_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");
        let mut mock = MockProvider::new();
        mock.failing_question = Some("question b");
        let provider = Arc::new(mock);

        let summary = runner(provider.clone(), config()).run(&dataset(), &output).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.records_written, 2);
        // two good samples plus the initial attempt and two retries
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_config_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");
        let mut mock = MockProvider::new();
        mock.failing_question = Some("question a");
        mock.error = || ProviderError::Config("bad key".into());
        let provider = Arc::new(mock);

        let summary = runner(provider.clone(), config()).run(&dataset(), &output).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_nothing_pending_leaves_output_alone() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");
        let existing = "{\"id\":\"a\",\"raw_response\":\"x\"}\n{\"id\":\"b\",\"raw_response\":\"x\"}\n{\"id\":\"c\",\"raw_response\":\"x\"}\n";
        std::fs::write(&output, existing).unwrap();
        let provider = Arc::new(MockProvider::new());

        let summary = runner(provider.clone(), config()).run(&dataset(), &output).await.unwrap();
        assert_eq!(summary.already_done, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), existing);
    }

    #[test]
    fn test_request_carries_settings() {
        let provider = Arc::new(MockProvider::new());
        let mut cfg = config();
        cfg.max_tokens = Some(256);
        cfg.stream = false;
        let runner = runner(provider, cfg);
        let ds = dataset();

        let request = runner.build_request(&ds.samples[0]);
        assert_eq!(request.max_tokens, Some(256));
        assert!(!request.stream);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(runner.engine.archetype(), QuestionArchetype::CountFrequencyTool);
    }
}
