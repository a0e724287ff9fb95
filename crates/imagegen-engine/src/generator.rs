use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use imagegen_contracts::events::{EventLog, EventLogError, GenerationEvent};
use imagegen_contracts::results::{handle_error_as, standardize_as, validation_failure};
use imagegen_contracts::{
    BatchEntry, CredentialSource, EnvCredentials, GenerateError, GenerationOptions,
    GenerationRequest, GenerationResult, ParameterValidator, ProviderError, ProviderRegistry,
    RateLimiter, RegistryError,
};
use uuid::Uuid;

use crate::providers::{ImageProvider, ImageProviderRegistry};
use crate::retry::{run_with_retry, RetryMode, RetryPolicy, Sleeper, ThreadSleeper};

/// Entry point for generation: validation, rate limiting, retries and
/// normalization around the registered provider clients.
pub struct ImageGenerator {
    registry: ProviderRegistry,
    clients: ImageProviderRegistry,
    limiters: BTreeMap<String, RateLimiter>,
    retry_mode: RetryMode,
    sleeper: Box<dyn Sleeper>,
    events: Option<EventLog>,
}

impl ImageGenerator {
    /// Builds clients for every provider whose credential is set in the environment.
    pub fn new(registry: ProviderRegistry) -> Result<Self, ProviderError> {
        Self::from_credentials(registry, &EnvCredentials)
    }

    pub fn from_credentials(
        registry: ProviderRegistry,
        credentials: &dyn CredentialSource,
    ) -> Result<Self, ProviderError> {
        let clients = ImageProviderRegistry::from_registry(&registry, credentials)?;
        Ok(Self::with_clients(registry, clients))
    }

    pub fn with_clients(registry: ProviderRegistry, clients: ImageProviderRegistry) -> Self {
        Self {
            registry,
            clients,
            limiters: BTreeMap::new(),
            retry_mode: RetryMode::default(),
            sleeper: Box::new(ThreadSleeper),
            events: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn with_retry_mode(mut self, mode: RetryMode) -> Self {
        self.retry_mode = mode;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Event log at `path` under a fresh session id.
    pub fn with_event_log(self, path: impl Into<PathBuf>) -> Result<Self, EventLogError> {
        let events = EventLog::open(path, Uuid::new_v4().to_string())?;
        Ok(self.with_events(events))
    }

    pub fn register_client<P: ImageProvider + 'static>(&mut self, client: P) {
        self.clients.register(client);
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Configured providers that have a client, in configuration order.
    pub fn available_providers(&self) -> Vec<String> {
        self.registry
            .ids()
            .into_iter()
            .filter(|id| self.clients.contains(id))
            .collect()
    }

    pub fn generate_request(
        &mut self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerateError> {
        self.generate(&request.provider, &request.prompt, &request.options)
    }

    /// Validation problems come back as a failed result; unknown or
    /// unavailable providers, rate limiting and exhausted retries are errors.
    pub fn generate(
        &mut self,
        provider: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, GenerateError> {
        self.registry.get_provider_config(provider)?;
        if !self.clients.contains(provider) {
            return Err(GenerateError::Unavailable {
                provider: provider.to_string(),
                available: self.available_providers(),
            });
        }

        let report =
            ParameterValidator::new(&self.registry).validate_request(provider, prompt, options)?;
        for warning in &report.warnings {
            tracing::warn!(provider, "{warning}");
        }
        if !report.valid {
            self.emit(GenerationEvent::ValidationFailed {
                provider: provider.to_string(),
                errors: report.errors.clone(),
            });
            return Ok(validation_failure(provider, &report));
        }

        self.admit(provider)?;

        let mut policy = RetryPolicy::from_settings(self.registry.global());
        policy.mode = self.retry_mode;
        if let Some(max_retries) = options.max_retries {
            policy.max_attempts = max_retries;
        }

        let Some(client) = self.clients.get(provider) else {
            return Err(GenerateError::Unavailable {
                provider: provider.to_string(),
                available: self.available_providers(),
            });
        };
        let outcome = run_with_retry(
            &policy,
            self.sleeper.as_ref(),
            |attempt| {
                tracing::debug!(provider, attempt = attempt + 1, "calling provider");
                self.emit(GenerationEvent::AttemptStarted {
                    provider: provider.to_string(),
                    attempt: attempt + 1,
                });
                client.generate(prompt, options)
            },
            |attempt, err, delay| {
                self.emit(GenerationEvent::AttemptFailed {
                    provider: provider.to_string(),
                    attempt: attempt + 1,
                    error: err.to_string(),
                    error_type: err.kind().to_string(),
                    retry_in_secs: delay.as_secs_f64(),
                });
            },
        );

        let raw = match outcome {
            Ok(raw) => raw,
            Err(err) => {
                self.emit(GenerationEvent::GenerationFailed {
                    provider: provider.to_string(),
                    error: err.to_string(),
                    error_type: err.kind().to_string(),
                });
                return Err(err);
            }
        };

        let mut result = standardize_as(provider, self.registry.family(provider), &raw);
        result.warnings = report.warnings;
        self.emit(GenerationEvent::GenerationSucceeded {
            provider: provider.to_string(),
            images: result.images.len(),
        });
        Ok(result)
    }

    /// One entry per prompt, in order. Failures are recorded, never raised.
    pub fn batch_generate<S: AsRef<str>>(
        &mut self,
        provider: &str,
        prompts: &[S],
        options: &GenerationOptions,
    ) -> Vec<BatchEntry> {
        prompts
            .iter()
            .map(|prompt| {
                let prompt = prompt.as_ref();
                match self.generate(provider, prompt, options) {
                    Ok(result) => BatchEntry::Generated(result),
                    Err(err) => {
                        tracing::warn!(provider, "batch item failed: {err}");
                        BatchEntry::Failed {
                            error: err.to_string(),
                            prompt: prompt.to_string(),
                        }
                    }
                }
            })
            .collect()
    }

    /// Same prompt against every available provider.
    pub fn compare(
        &mut self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Vec<(String, GenerationResult)> {
        self.available_providers()
            .into_iter()
            .map(|provider| {
                let result = self
                    .generate(&provider, prompt, options)
                    .unwrap_or_else(|err| {
                        handle_error_as(&provider, self.registry.family(&provider), &err)
                    });
                (provider, result)
            })
            .collect()
    }

    fn admit(&mut self, provider: &str) -> Result<(), GenerateError> {
        if !self.limiters.contains_key(provider) {
            let limiter = RateLimiter::for_provider(&self.registry, provider)?;
            self.limiters.insert(provider.to_string(), limiter);
        }
        let Some(limiter) = self.limiters.get_mut(provider) else {
            return Err(RegistryError::not_found(provider).into());
        };

        let now = Instant::now();
        if limiter.check_at(now) {
            limiter.record_at(now);
            return Ok(());
        }
        let retry_after_secs = limiter.wait_time_at(now).as_secs_f64();
        self.emit(GenerationEvent::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        });
        Err(GenerateError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        })
    }

    fn emit(&self, event: GenerationEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.record(&event) {
            tracing::warn!(provider = event.provider(), "could not record event: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use imagegen_contracts::{ProviderFamily, ProviderUpdate, RateLimitQuota};
    use serde_json::{json, Value};

    use super::*;

    /// Answers like an OpenAI endpoint, failing for prompts listed in `fail_on`.
    struct FakeClient {
        id: String,
        fail_on: Vec<String>,
        calls: Arc<AtomicU32>,
    }

    impl FakeClient {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                fail_on: Vec::new(),
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn failing_on(mut self, prompt: &str) -> Self {
            self.fail_on.push(prompt.to_string());
            self
        }
    }

    impl ImageProvider for FakeClient {
        fn name(&self) -> &str {
            &self.id
        }

        fn validate_params(&self, _prompt: &str, _options: &GenerationOptions) -> bool {
            true
        }

        fn generate(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<Value, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.iter().any(|item| item == prompt) {
                return Err(ProviderError::Transport {
                    provider: "OpenAI DALL-E".to_string(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(json!({
                "data": [{"url": format!("https://img.example/{prompt}.png")}]
            }))
        }
    }

    /// Always answers with an HTTP 429 carrying OpenAI's rate-limit wording.
    struct ThrottledClient {
        id: String,
    }

    impl ImageProvider for ThrottledClient {
        fn name(&self) -> &str {
            &self.id
        }

        fn validate_params(&self, _prompt: &str, _options: &GenerationOptions) -> bool {
            true
        }

        fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<Value, ProviderError> {
            Err(ProviderError::Http {
                provider: "DALL-E mirror".to_string(),
                status: 429,
                message: "Rate limit exceeded".to_string(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSleeper {
        slept: Rc<RefCell<Vec<Duration>>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }

    fn generator_with(client: FakeClient) -> (ImageGenerator, RecordingSleeper) {
        let sleeper = RecordingSleeper::default();
        let mut clients = ImageProviderRegistry::new();
        clients.register(client);
        let generator = ImageGenerator::with_clients(ProviderRegistry::with_defaults(), clients)
            .with_sleeper(sleeper.clone());
        (generator, sleeper)
    }

    #[test]
    fn generate_returns_standardized_result() -> anyhow::Result<()> {
        let (mut generator, _) = generator_with(FakeClient::new("openai"));
        let result = generator.generate("openai", "sunset", &GenerationOptions::default())?;
        assert!(result.success);
        assert_eq!(result.provider, "openai");
        assert_eq!(
            result.images[0].url.as_deref(),
            Some("https://img.example/sunset.png")
        );
        Ok(())
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let (mut generator, _) = generator_with(FakeClient::new("openai"));
        let err = generator
            .generate("midjourney", "x", &GenerationOptions::default())
            .err();
        assert!(matches!(err, Some(GenerateError::Registry(_))));
    }

    #[test]
    fn configured_provider_without_client_is_unavailable() {
        let (mut generator, _) = generator_with(FakeClient::new("openai"));
        let err = generator
            .generate("stability", "x", &GenerationOptions::default())
            .err();
        match err {
            Some(GenerateError::Unavailable {
                provider,
                available,
            }) => {
                assert_eq!(provider, "stability");
                assert_eq!(available, vec!["openai"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn credentials_decide_which_clients_exist() -> anyhow::Result<()> {
        let credentials: HashMap<String, String> = HashMap::from([
            ("JIMENG_API_KEY".to_string(), "jm".to_string()),
            ("STABILITY_API_KEY".to_string(), "  ".to_string()),
        ]);
        let generator =
            ImageGenerator::from_credentials(ProviderRegistry::with_defaults(), &credentials)?;
        assert_eq!(generator.available_providers(), vec!["jimeng"]);
        Ok(())
    }

    #[test]
    fn validation_failure_is_a_result_not_a_call() -> anyhow::Result<()> {
        let client = FakeClient::new("openai");
        let calls = client.calls.clone();
        let (mut generator, _) = generator_with(client);

        let options = GenerationOptions::default().with_size("512x512");
        let result = generator.generate("openai", "", &options)?;
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("ValidationError"));
        let error = result.error.unwrap_or_default();
        assert!(error.contains("Prompt cannot be empty"));
        assert!(error.contains("Size 512x512 not supported by provider openai"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn warnings_are_carried_into_successful_results() -> anyhow::Result<()> {
        let (mut generator, _) = generator_with(FakeClient::new("openai"));
        let result = generator.generate(
            "openai",
            "an adult fox in the snow",
            &GenerationOptions::default(),
        )?;
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        Ok(())
    }

    #[test]
    fn retries_three_times_then_reraises() {
        let client = FakeClient::new("openai").failing_on("boom");
        let calls = client.calls.clone();
        let (mut generator, sleeper) = generator_with(client);

        let err = generator
            .generate("openai", "boom", &GenerationOptions::default())
            .err();
        assert!(matches!(
            err,
            Some(GenerateError::Provider(ProviderError::Transport { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn per_call_max_retries_overrides_global() {
        let client = FakeClient::new("openai").failing_on("boom");
        let calls = client.calls.clone();
        let (mut generator, sleeper) = generator_with(client);

        let options = GenerationOptions::default().with_max_retries(1);
        assert!(generator.generate("openai", "boom", &options).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn rate_limit_rejects_without_calling_provider() -> anyhow::Result<()> {
        let mut registry = ProviderRegistry::with_defaults();
        registry.update_provider(
            "openai",
            ProviderUpdate {
                rate_limit: Some(RateLimitQuota {
                    requests_per_minute: 1,
                    tokens_per_minute: 0,
                }),
                ..ProviderUpdate::default()
            },
        )?;
        let client = FakeClient::new("openai");
        let calls = client.calls.clone();
        let mut clients = ImageProviderRegistry::new();
        clients.register(client);
        let mut generator = ImageGenerator::with_clients(registry, clients);

        generator.generate("openai", "first", &GenerationOptions::default())?;
        let err = generator
            .generate("openai", "second", &GenerationOptions::default())
            .err();
        match err {
            Some(GenerateError::RateLimited {
                provider,
                retry_after_secs,
            }) => {
                assert_eq!(provider, "openai");
                assert!(retry_after_secs > 0.0 && retry_after_secs <= 60.0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn batch_keeps_order_and_records_failures() {
        let client = FakeClient::new("openai").failing_on("B");
        let (mut generator, _) = generator_with(client);

        let entries =
            generator.batch_generate("openai", &["A", "B", "C"], &GenerationOptions::default());
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_success());
        assert_eq!(
            entries[1],
            BatchEntry::Failed {
                error: "OpenAI DALL-E API request failed: connection reset".to_string(),
                prompt: "B".to_string(),
            }
        );
        assert!(entries[2].is_success());
        assert_eq!(
            entries[2]
                .result()
                .and_then(|result| result.images[0].url.clone())
                .as_deref(),
            Some("https://img.example/C.png")
        );
    }

    #[test]
    fn compare_reports_every_available_provider() {
        let sleeper = RecordingSleeper::default();
        let mut clients = ImageProviderRegistry::new();
        clients.register(FakeClient::new("openai").failing_on("fox"));
        clients.register(FakeClient::new("jimeng"));
        let mut generator =
            ImageGenerator::with_clients(ProviderRegistry::with_defaults(), clients)
                .with_sleeper(sleeper);

        let results = generator.compare("fox", &GenerationOptions::default());
        let providers: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(providers, vec!["jimeng", "openai"]);
        assert!(results[0].1.success);
        assert!(!results[1].1.success);
        assert_eq!(results[1].1.error_type.as_deref(), Some("TransportError"));
    }

    #[test]
    fn configured_size_reaches_real_openai_client() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/images/generations")
            .match_body(mockito::Matcher::PartialJson(json!({"size": "512x512"})))
            .with_status(200)
            .with_body(r#"{"data": [{"url": "https://img.example/small.png"}]}"#)
            .expect(1)
            .create();
        let mut registry = ProviderRegistry::with_defaults();
        registry.update_provider(
            "openai",
            ProviderUpdate {
                endpoint: Some(format!("{}/v1/images/generations", server.url())),
                supported_sizes: Some(vec!["512x512".to_string()]),
                ..ProviderUpdate::default()
            },
        )?;
        let credentials: HashMap<String, String> =
            HashMap::from([("OPENAI_API_KEY".to_string(), "sk-o".to_string())]);
        let sleeper = RecordingSleeper::default();
        let mut generator = ImageGenerator::from_credentials(registry, &credentials)?
            .with_sleeper(sleeper.clone());

        let result = generator.generate(
            "openai",
            "cat",
            &GenerationOptions::default().with_size("512x512"),
        )?;
        assert!(result.success);
        assert_eq!(
            result.images[0].url.as_deref(),
            Some("https://img.example/small.png")
        );
        mock.assert();
        assert!(sleeper.slept.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn compare_uses_configured_family_for_error_hints() -> anyhow::Result<()> {
        let mut registry = ProviderRegistry::with_defaults();
        let mut mirror = registry.get_provider_config("openai")?.clone();
        mirror.family = Some(ProviderFamily::OpenAi);
        registry.add_provider("mirror", mirror)?;
        let mut clients = ImageProviderRegistry::new();
        clients.register(ThrottledClient {
            id: "mirror".to_string(),
        });
        let mut generator = ImageGenerator::with_clients(registry, clients)
            .with_sleeper(RecordingSleeper::default());

        let results = generator.compare("fox", &GenerationOptions::default());
        assert_eq!(results.len(), 1);
        let (provider, result) = &results[0];
        assert_eq!(provider, "mirror");
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("HttpError"));
        assert_eq!(result.retry_after, Some(60));
        Ok(())
    }

    #[test]
    fn events_trace_attempts_and_outcome() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let client = FakeClient::new("openai").failing_on("boom");
        let (generator, _) = generator_with(client);
        let mut generator = generator.with_event_log(&path)?;

        generator.generate("openai", "ok", &GenerationOptions::default())?;
        let _ = generator.generate(
            "openai",
            "boom",
            &GenerationOptions::default().with_max_retries(2),
        );

        let events = fs::read_to_string(&path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "attempt_started",
                "generation_succeeded",
                "attempt_started",
                "attempt_failed",
                "attempt_started",
                "generation_failed",
            ]
        );
        assert_eq!(events[3]["attempt"], 1);
        assert_eq!(events[3]["error_type"], "TransportError");
        assert_eq!(events[3]["retry_in_secs"], 1.0);
        assert_eq!(events[5]["error_type"], "TransportError");
        assert!(events
            .iter()
            .all(|event| event["session_id"] == events[0]["session_id"]));
        Ok(())
    }
}
