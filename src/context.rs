//! Per-run analysis context.
//!
//! Everything the pipeline needs beyond the two sources travels here: the
//! validated configuration, the provider chain, the gate scorer, run counters
//! and the cancellation token. Files only ever see it by shared reference.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;

use crate::config::{validate, EngineConfig};
use crate::error::ConfigError;
use crate::interpret::{AiProvider, GateScorer, OpenAiCompatibleProvider, ProviderChain, WeightedGateScorer};

/// Caller-driven cancellation, checked between layers and raced against
/// provider calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Atomic counters shared by every file of a run.
#[derive(Debug, Default)]
pub struct RunCounters {
    files: AtomicUsize,
    events: AtomicUsize,
    cancelled_files: AtomicUsize,
    classification_failures: AtomicUsize,
    gate_skips: AtomicUsize,
    interpreter_runs: AtomicUsize,
    provider_failures: AtomicUsize,
    discarded_responses: AtomicUsize,
}

/// Plain copy of the counters for reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub files: usize,
    pub events: usize,
    pub cancelled_files: usize,
    pub classification_failures: usize,
    pub gate_skips: usize,
    pub interpreter_runs: usize,
    pub provider_calls: usize,
    pub provider_failures: usize,
    pub discarded_responses: usize,
}

impl RunCounters {
    pub(crate) fn file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn events(&self, n: usize) {
        self.events.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn cancelled_file(&self) {
        self.cancelled_files.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn classification_failures(&self, n: usize) {
        self.classification_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn gate_skip(&self) {
        self.gate_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn interpreter_run(&self) {
        self.interpreter_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discarded_response(&self) {
        self.discarded_responses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Configuration, collaborators and counters for one analysis run.
pub struct AnalysisContext {
    config: EngineConfig,
    providers: ProviderChain,
    scorer: Box<dyn GateScorer>,
    counters: RunCounters,
    cancel: CancelToken,
}

impl AnalysisContext {
    /// Validate the configuration up front. The context starts with no
    /// providers, so layer 5b stays silent until some are attached.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        validate(&config)?;
        let providers = ProviderChain::new(Vec::new(), &config.interpreter);
        let scorer = Box::new(WeightedGateScorer::new(config.gate.weights.clone()));
        Ok(Self {
            config,
            providers,
            scorer,
            counters: RunCounters::default(),
            cancel: CancelToken::new(),
        })
    }

    /// Build the configured `providers` list as OpenAI-compatible clients.
    pub fn with_configured_providers(self) -> Result<Self, ConfigError> {
        let providers = self
            .config
            .providers
            .iter()
            .map(|p| OpenAiCompatibleProvider::from_config(p).map(|p| Arc::new(p) as Arc<dyn AiProvider>))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.with_providers(providers))
    }

    /// Replace the provider chain; order is fallback order.
    pub fn with_providers(mut self, providers: Vec<Arc<dyn AiProvider>>) -> Self {
        self.providers = ProviderChain::new(providers, &self.config.interpreter);
        self
    }

    pub fn with_gate_scorer(mut self, scorer: Box<dyn GateScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderChain {
        &self.providers
    }

    pub fn scorer(&self) -> &dyn GateScorer {
        self.scorer.as_ref()
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let c = &self.counters;
        let load = |a: &AtomicUsize| a.load(Ordering::Relaxed);
        CounterSnapshot {
            files: load(&c.files),
            events: load(&c.events),
            cancelled_files: load(&c.cancelled_files),
            classification_failures: load(&c.classification_failures),
            gate_skips: load(&c.gate_skips),
            interpreter_runs: load(&c.interpreter_runs),
            provider_calls: self.providers.budget().used(),
            provider_failures: load(&c.provider_failures),
            discarded_responses: load(&c.discarded_responses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut config = EngineConfig::default();
        config.gate.threshold = f64::NAN;
        assert!(AnalysisContext::new(config).is_err());
    }

    #[test]
    fn test_counters_snapshot() {
        let ctx = AnalysisContext::new(EngineConfig::default()).unwrap();
        ctx.counters().file();
        ctx.counters().events(3);
        ctx.counters().gate_skip();
        let snap = ctx.snapshot();
        assert_eq!(snap.files, 1);
        assert_eq!(snap.events, 3);
        assert_eq!(snap.gate_skips, 1);
        assert_eq!(snap.provider_calls, 0);
        assert!(ctx.providers().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }
}
