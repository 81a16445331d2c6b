//! Provider configuration read from environment variables.
//!
//! [`EnvLoader`] is the only place in the crate that looks at process
//! environment. Everything downstream receives an immutable
//! [`ProviderConfig`].

use std::fmt;
use std::ops::{RangeBounds, RangeFrom, RangeInclusive};
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::types::ModelId;

/// Variable prefix used when none is given
pub const DEFAULT_ENV_PREFIX: &str = "CUSTOM_LLM";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_STREAM_ENABLED: bool = true;

const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const MAX_TOKENS_RANGE: RangeInclusive<i64> = 1..=100_000;
const TOP_P_RANGE: RangeInclusive<f64> = 0.0..=1.0;
const TIMEOUT_RANGE: RangeFrom<i64> = 1000..;
const RETRIES_RANGE: RangeInclusive<i64> = 0..=10;

const TEMPERATURE_RULE: &str = "must be a number between 0 and 2";
const MAX_TOKENS_RULE: &str = "must be a number between 1 and 100000";
const TOP_P_RULE: &str = "must be a number between 0 and 1";
const TIMEOUT_RULE: &str = "must be a number >= 1000";
const RETRIES_RULE: &str = "must be a number between 0 and 10";
const URL_RULE: &str = "must be a valid URL";
const REQUIRED_RULE: &str = "is required";

fn check<T, R>(name: &str, value: T, range: R, rule: &str) -> Result<T, ConfigError>
where
    T: PartialOrd,
    R: RangeBounds<T>,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::new(name, rule))
    }
}

/// Connection and generation settings of an OpenAI-compatible provider.
///
/// Every constructor and setter enforces the same bounds as [`EnvLoader`],
/// so a value of this type is always within range. There are no mutators
/// once the value is shared.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    api_key: String,
    endpoint: Url,
    model_name: ModelId,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    timeout_ms: u64,
    retries: u32,
    stream_enabled: bool,
}

impl ProviderConfig {
    /// Config with every optional field at its default
    pub fn new(
        api_key: impl Into<String>,
        endpoint: &str,
        model_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::new("api_key", REQUIRED_RULE));
        }
        let model_name = model_name.into();
        if model_name.trim().is_empty() {
            return Err(ConfigError::new("model_name", REQUIRED_RULE));
        }
        let endpoint =
            Url::parse(endpoint.trim()).map_err(|_| ConfigError::new("endpoint", URL_RULE))?;

        Ok(Self {
            api_key,
            endpoint,
            model_name: ModelId::new(model_name),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            stream_enabled: DEFAULT_STREAM_ENABLED,
        })
    }

    /// Load from `CUSTOM_LLM_*` variables
    pub fn load() -> Result<Option<Self>, ConfigError> {
        EnvLoader::new(DEFAULT_ENV_PREFIX).load()
    }

    /// Validate `CUSTOM_LLM_*` variables without failing
    pub fn validate() -> ValidationResult {
        EnvLoader::new(DEFAULT_ENV_PREFIX).validate()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, ConfigError> {
        check("temperature", f64::from(temperature), TEMPERATURE_RANGE, TEMPERATURE_RULE)?;
        self.temperature = temperature;
        Ok(self)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Result<Self, ConfigError> {
        check("max_tokens", i64::from(max_tokens), MAX_TOKENS_RANGE, MAX_TOKENS_RULE)?;
        self.max_tokens = max_tokens;
        Ok(self)
    }

    pub fn with_top_p(mut self, top_p: f32) -> Result<Self, ConfigError> {
        check("top_p", f64::from(top_p), TOP_P_RANGE, TOP_P_RULE)?;
        self.top_p = top_p;
        Ok(self)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self, ConfigError> {
        let value = i64::try_from(timeout_ms).unwrap_or(i64::MAX);
        check("timeout_ms", value, TIMEOUT_RANGE, TIMEOUT_RULE)?;
        self.timeout_ms = timeout_ms;
        Ok(self)
    }

    pub fn with_retries(mut self, retries: u32) -> Result<Self, ConfigError> {
        check("retries", i64::from(retries), RETRIES_RANGE, RETRIES_RULE)?;
        self.retries = retries;
        Ok(self)
    }

    pub fn with_stream_enabled(mut self, stream_enabled: bool) -> Self {
        self.stream_enabled = stream_enabled;
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn model_name(&self) -> &ModelId {
        &self.model_name
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream_enabled
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("timeout_ms", &self.timeout_ms)
            .field("retries", &self.retries)
            .field("stream_enabled", &self.stream_enabled)
            .finish()
    }
}

/// Every problem found in the environment, in a stable order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// What happens when a configured alternate provider fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnAlternateFailure {
    /// Propagate the alternate's error unchanged
    FailFast,
    /// Log the failure and repeat the call on the default provider
    FallbackToDefault,
}

impl FromStr for OnAlternateFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "fail_fast" => Ok(OnAlternateFailure::FailFast),
            "fallback" | "fallback-to-default" => Ok(OnAlternateFailure::FallbackToDefault),
            other => Err(format!(
                "unknown alternate failure policy `{}` (expected `fail-fast` or `fallback`)",
                other
            )),
        }
    }
}

impl fmt::Display for OnAlternateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnAlternateFailure::FailFast => write!(f, "fail-fast"),
            OnAlternateFailure::FallbackToDefault => write!(f, "fallback"),
        }
    }
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Reads `<PREFIX>_*` variables through a lookup function
pub struct EnvLoader<F = fn(&str) -> Option<String>> {
    prefix: String,
    lookup: F,
}

impl EnvLoader {
    /// Loader backed by the process environment
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            lookup: process_env,
        }
    }
}

impl<F> EnvLoader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn with_lookup(prefix: impl Into<String>, lookup: F) -> Self {
        Self {
            prefix: prefix.into(),
            lookup,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the config.
    ///
    /// Returns `Ok(None)` when any of the API key, endpoint or model name is
    /// missing. A malformed endpoint or an out-of-range optional value is an
    /// error.
    pub fn load(&self) -> Result<Option<ProviderConfig>, ConfigError> {
        let (Some(api_key), Some(endpoint), Some(model_name)) = (
            self.var("API_KEY"),
            self.var("ENDPOINT"),
            self.var("MODEL_NAME"),
        ) else {
            return Ok(None);
        };

        let endpoint = Url::parse(endpoint.trim())
            .map_err(|_| ConfigError::new(self.name("ENDPOINT"), URL_RULE))?;

        let temperature = self.number::<f64, _>("TEMPERATURE", TEMPERATURE_RANGE, TEMPERATURE_RULE)?;
        let max_tokens = self.number::<i64, _>("MAX_TOKENS", MAX_TOKENS_RANGE, MAX_TOKENS_RULE)?;
        let top_p = self.number::<f64, _>("TOP_P", TOP_P_RANGE, TOP_P_RULE)?;
        let timeout_ms = self.number::<i64, _>("TIMEOUT", TIMEOUT_RANGE, TIMEOUT_RULE)?;
        let retries = self.number::<i64, _>("RETRIES", RETRIES_RANGE, RETRIES_RULE)?;

        Ok(Some(ProviderConfig {
            api_key,
            endpoint,
            model_name: ModelId::new(model_name),
            temperature: temperature.map_or(DEFAULT_TEMPERATURE, |v| v as f32),
            max_tokens: max_tokens.map_or(DEFAULT_MAX_TOKENS, |v| v as u32),
            top_p: top_p.map_or(DEFAULT_TOP_P, |v| v as f32),
            timeout_ms: timeout_ms.map_or(DEFAULT_TIMEOUT_MS, |v| v as u64),
            retries: retries.map_or(DEFAULT_RETRIES, |v| v as u32),
            stream_enabled: self
                .var("STREAM_ENABLED")
                .map_or(DEFAULT_STREAM_ENABLED, |v| v.trim().eq_ignore_ascii_case("true")),
        }))
    }

    /// Collect every violation instead of stopping at the first one
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        if self.var("API_KEY").is_none() {
            errors.push(ConfigError::new(self.name("API_KEY"), REQUIRED_RULE).to_string());
        }
        match self.var("ENDPOINT") {
            None => errors.push(ConfigError::new(self.name("ENDPOINT"), REQUIRED_RULE).to_string()),
            Some(endpoint) => {
                if Url::parse(endpoint.trim()).is_err() {
                    errors.push(ConfigError::new(self.name("ENDPOINT"), URL_RULE).to_string());
                }
            }
        }
        if self.var("MODEL_NAME").is_none() {
            errors.push(ConfigError::new(self.name("MODEL_NAME"), REQUIRED_RULE).to_string());
        }

        let checks = [
            self.number::<f64, _>("TEMPERATURE", TEMPERATURE_RANGE, TEMPERATURE_RULE).err(),
            self.number::<i64, _>("MAX_TOKENS", MAX_TOKENS_RANGE, MAX_TOKENS_RULE).err(),
            self.number::<f64, _>("TOP_P", TOP_P_RANGE, TOP_P_RULE).err(),
            self.number::<i64, _>("TIMEOUT", TIMEOUT_RANGE, TIMEOUT_RULE).err(),
            self.number::<i64, _>("RETRIES", RETRIES_RANGE, RETRIES_RULE).err(),
        ];
        errors.extend(checks.into_iter().flatten().map(|e| e.to_string()));

        ValidationResult::from_errors(errors)
    }

    /// True when `load` yields a config; configuration errors count as not configured
    pub fn is_configured(&self) -> bool {
        matches!(self.load(), Ok(Some(_)))
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    fn var(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&self.name(suffix)).filter(|v| !v.trim().is_empty())
    }

    fn number<T, R>(&self, suffix: &str, range: R, rule: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + PartialOrd,
        R: RangeBounds<T>,
    {
        let Some(raw) = self.var(suffix) else {
            return Ok(None);
        };
        let name = self.name(suffix);
        let value = raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::new(name.as_str(), rule))?;
        check(&name, value, range, rule).map(Some)
    }
}
