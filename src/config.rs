//! Configuration types for a review session.
//!
//! All review behaviour is controlled through [`ReviewConfig`], built via its
//! [`ReviewConfigBuilder`]. Every knob lives in one value that is handed to
//! [`crate::session::ReviewSession::new`]; nothing is read from process-wide
//! state, so two sessions with different endpoints can run side by side.

use crate::error::SeleneError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for one review session.
///
/// Built via [`ReviewConfig::builder()`] or using [`ReviewConfig::default()`].
///
/// # Example
/// ```rust
/// use selene::{ReviewConfig, ReviewFocus};
///
/// let config = ReviewConfig::builder()
///     .budget(6000)
///     .parallelism(4)
///     .model("llava:13b")
///     .focus(ReviewFocus::PowerSupply)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Maximum characters of page text per chunk. Default: 4000.
    ///
    /// Pages are packed into a chunk until the next page would push it past
    /// this budget. A single page larger than the budget is truncated to it.
    pub budget: usize,

    /// Number of concurrent review calls. Default: 2.
    ///
    /// A local inference server usually runs one or two generations at a
    /// time; higher values only queue requests server-side.
    pub parallelism: usize,

    /// Maximum retry attempts on a transient endpoint failure. Default: 3.
    ///
    /// Timeouts, refused connections and 5xx answers are retried. 4xx answers
    /// and unparseable model output are not.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Base URL of the model server. Default: `http://localhost:11434`.
    pub endpoint: String,

    /// Model name passed to the endpoint. Default: `llava`.
    pub model: String,

    /// Custom review instruction template. If None, the template of
    /// [`ReviewConfig::focus`] is used. `{pages}` is replaced by the chunk's
    /// 1-based page range.
    pub instructions: Option<String>,

    /// Review focus preset. Default: [`ReviewFocus::General`].
    pub focus: ReviewFocus,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Technical review wants repeatable answers, not creative ones.
    pub temperature: f32,

    /// Nucleus sampling cut-off. Default: 0.9.
    pub top_p: f32,

    /// Top-k sampling cut-off. Default: 40.
    pub top_k: u32,

    /// Maximum tokens generated per chunk. Default: 2048.
    pub num_predict: u32,

    /// Ask the endpoint for an NDJSON stream instead of one object. Default: false.
    pub stream: bool,

    /// Attach page rasters to review requests. Default: true.
    pub embed_images: bool,

    /// Maximum raster width sent to the model, in pixels. Default: 1920.
    pub max_image_width: u32,

    /// Maximum raster height sent to the model, in pixels. Default: 1080.
    pub max_image_height: u32,

    /// Token-overlap ratio above which two findings count as duplicates. Default: 0.9.
    pub similarity_threshold: f32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Component datasheet (PDF) whose text accompanies every chunk as a
    /// reference. Default: none.
    pub datasheet: Option<PathBuf>,

    /// Maximum characters of datasheet text per prompt. Default: 3000.
    ///
    /// Counted separately from [`Self::budget`]; every chunk carries the
    /// same datasheet excerpt.
    pub datasheet_budget: usize,

    /// Progress observer; see [`crate::progress::ReviewProgressCallback`].
    #[serde(skip)]
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            budget: 4000,
            parallelism: 2,
            max_retries: 3,
            retry_backoff_ms: 500,
            endpoint: "http://localhost:11434".to_string(),
            model: "llava".to_string(),
            instructions: None,
            focus: ReviewFocus::default(),
            api_timeout_secs: 60,
            temperature: 0.1,
            top_p: 0.9,
            top_k: 40,
            num_predict: 2048,
            stream: false,
            embed_images: true,
            max_image_width: 1920,
            max_image_height: 1080,
            similarity_threshold: 0.9,
            password: None,
            datasheet: None,
            datasheet_budget: 3000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ReviewConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewConfig")
            .field("budget", &self.budget)
            .field("parallelism", &self.parallelism)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("focus", &self.focus)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("stream", &self.stream)
            .field("embed_images", &self.embed_images)
            .field("similarity_threshold", &self.similarity_threshold)
            .field("datasheet", &self.datasheet)
            .field("datasheet_budget", &self.datasheet_budget)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ReviewProgressCallback>"),
            )
            .finish()
    }
}

impl ReviewConfig {
    /// Create a new builder for `ReviewConfig`.
    pub fn builder() -> ReviewConfigBuilder {
        ReviewConfigBuilder {
            config: Self::default(),
        }
    }

    /// The instruction template in effect: the override if set, else the focus preset.
    pub fn instruction_template(&self) -> &str {
        self.instructions
            .as_deref()
            .unwrap_or_else(|| self.focus.template())
    }

    /// Check the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), SeleneError> {
        if self.budget == 0 {
            return Err(SeleneError::InvalidConfig("Budget must be ≥ 1".into()));
        }
        if self.parallelism == 0 {
            return Err(SeleneError::InvalidConfig(
                "Parallelism must be ≥ 1".into(),
            ));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(SeleneError::InvalidConfig(format!(
                "Endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.datasheet_budget == 0 {
            return Err(SeleneError::InvalidConfig(
                "Datasheet budget must be ≥ 1".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(SeleneError::InvalidConfig("Model name is empty".into()));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(SeleneError::InvalidConfig(format!(
                "Similarity threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Builder for [`ReviewConfig`].
pub struct ReviewConfigBuilder {
    config: ReviewConfig,
}

impl fmt::Debug for ReviewConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ReviewConfigBuilder {
    pub fn budget(mut self, chars: usize) -> Self {
        self.config.budget = chars;
        self
    }

    pub fn parallelism(mut self, n: usize) -> Self {
        self.config.parallelism = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn instructions(mut self, template: impl Into<String>) -> Self {
        self.config.instructions = Some(template.into());
        self
    }

    pub fn focus(mut self, focus: ReviewFocus) -> Self {
        self.config.focus = focus;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn num_predict(mut self, n: u32) -> Self {
        self.config.num_predict = n;
        self
    }

    pub fn stream(mut self, v: bool) -> Self {
        self.config.stream = v;
        self
    }

    pub fn embed_images(mut self, v: bool) -> Self {
        self.config.embed_images = v;
        self
    }

    pub fn max_image_size(mut self, width: u32, height: u32) -> Self {
        self.config.max_image_width = width.max(64);
        self.config.max_image_height = height.max(64);
        self
    }

    pub fn similarity_threshold(mut self, t: f32) -> Self {
        self.config.similarity_threshold = t;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn datasheet(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.datasheet = Some(path.into());
        self
    }

    pub fn datasheet_budget(mut self, chars: usize) -> Self {
        self.config.datasheet_budget = chars;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ReviewConfig, SeleneError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the reviewer should concentrate on.
///
/// Each preset maps to an instruction template in [`crate::prompts`].
/// `Custom` carries the engineer's own question, which is wrapped in the
/// general checklist so the model still reports structured findings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReviewFocus {
    /// Broad schematic review (default).
    #[default]
    General,
    /// Component values, pull-ups, decoupling.
    ComponentVerification,
    /// Pin assignments, floating inputs, power pins.
    PinConfiguration,
    /// Regulators, rails, sequencing.
    PowerSupply,
    /// Deviations from reference designs.
    DesignCompliance,
    /// Required parts that are absent.
    MissingComponents,
    /// Free-form question from the user.
    Custom(String),
}

impl ReviewFocus {
    /// Instruction template for this focus.
    pub fn template(&self) -> &str {
        use crate::prompts;
        match self {
            ReviewFocus::General => prompts::GENERAL_REVIEW,
            ReviewFocus::ComponentVerification => prompts::COMPONENT_VERIFICATION,
            ReviewFocus::PinConfiguration => prompts::PIN_CONFIGURATION,
            ReviewFocus::PowerSupply => prompts::POWER_SUPPLY,
            ReviewFocus::DesignCompliance => prompts::DESIGN_COMPLIANCE,
            ReviewFocus::MissingComponents => prompts::MISSING_COMPONENTS,
            ReviewFocus::Custom(question) => question.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReviewConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.budget, 4000);
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert_eq!(config.model, "llava");
    }

    #[test]
    fn zero_budget_rejected() {
        let err = ReviewConfig::builder().budget(0).build().unwrap_err();
        assert!(err.to_string().contains("Budget"));
    }

    #[test]
    fn parallelism_clamped_to_one() {
        let config = ReviewConfig::builder().parallelism(0).build().unwrap();
        assert_eq!(config.parallelism, 1);
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let config = ReviewConfig::builder()
            .endpoint("http://gpu-box:11434/")
            .build()
            .unwrap();
        assert_eq!(config.endpoint, "http://gpu-box:11434");
    }

    #[test]
    fn non_http_endpoint_rejected() {
        let err = ReviewConfig::builder()
            .endpoint("localhost:11434")
            .build()
            .unwrap_err();
        assert!(matches!(err, SeleneError::InvalidConfig(_)));
    }

    #[test]
    fn instruction_override_wins_over_focus() {
        let config = ReviewConfig::builder()
            .focus(ReviewFocus::PowerSupply)
            .instructions("Check only the LDO on {pages}.")
            .build()
            .unwrap();
        assert_eq!(config.instruction_template(), "Check only the LDO on {pages}.");
    }

    #[test]
    fn datasheet_is_optional() {
        let config = ReviewConfig::default();
        assert!(config.datasheet.is_none());
        assert_eq!(config.datasheet_budget, 3000);

        let config = ReviewConfig::builder()
            .datasheet("lm317.pdf")
            .datasheet_budget(1200)
            .build()
            .unwrap();
        assert_eq!(config.datasheet.as_deref(), Some(std::path::Path::new("lm317.pdf")));
        assert_eq!(config.datasheet_budget, 1200);
    }

    #[test]
    fn zero_datasheet_budget_rejected() {
        let err = ReviewConfig::builder().datasheet_budget(0).build().unwrap_err();
        assert!(err.to_string().contains("Datasheet budget"));
    }

    #[test]
    fn custom_focus_uses_question() {
        let focus = ReviewFocus::Custom("Is the crystal loaded correctly?".into());
        assert_eq!(focus.template(), "Is the crystal loaded correctly?");
    }

    #[test]
    fn config_serialises_without_callback() {
        let config = ReviewConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("progress_callback"));
        let back: ReviewConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.budget, config.budget);
    }
}
