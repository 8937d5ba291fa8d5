//! Model lifecycle
//!
//! Loads the vision-language and speech capabilities once per process, on
//! first use, and hands out shared handles afterwards. Loading computes the
//! thread budget, sizes the global rayon pool to it and gives each capability
//! its share.
//!
//! States: `Uninitialized -> Loading -> Ready | Failed`. Callers arriving
//! while another thread is loading wait for the outcome. A failed load is
//! terminal: the pipeline has no degraded mode without its models.

pub mod budget;
pub mod precision;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};
use video_digest_caption::{OnnxCaptionConfig, OnnxVisionCaptioner, VisionCaptioner};
use video_digest_transcription::{SpeechTranscriber, WhisperConfig, WhisperTranscriber};

pub use budget::ThreadBudget;
pub use precision::{Precision, WeightsFormat};

/// Environment variable overriding the total thread budget
pub const THREADS_ENV: &str = "VIDEO_DIGEST_THREADS";

/// Lifecycle errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Model loading failed: {0}")]
    LoadFailed(String),

    #[error("Lifecycle lock poisoned")]
    Poisoned,
}

/// Where the models live and how they run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub vision_model: PathBuf,
    pub vision_tokenizer: PathBuf,
    pub vision_precision: Precision,
    pub caption: OnnxCaptionConfig,

    pub speech_model: PathBuf,
    pub speech_precision: Precision,
    pub whisper: WhisperConfig,

    /// Logical cores left for the rest of the system
    pub thread_reserve: usize,
    /// Explicit total thread budget; overrides `thread_reserve`
    pub threads: Option<usize>,
    /// Threads given to speech out of the total
    pub speech_threads: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            vision_model: PathBuf::from("models/caption/blip.onnx"),
            vision_tokenizer: PathBuf::from("models/caption/tokenizer.json"),
            // Int8 vision weights produced hallucinated descriptions
            vision_precision: Precision::Full,
            caption: OnnxCaptionConfig::default(),
            speech_model: PathBuf::from("models/whisper/ggml-base.bin"),
            speech_precision: Precision::Int8,
            whisper: WhisperConfig::default(),
            thread_reserve: 2,
            threads: None,
            speech_threads: 4,
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.threads == Some(0) {
            return Err(LifecycleError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.speech_threads == 0 {
            return Err(LifecycleError::InvalidConfig(
                "speech_threads must be at least 1".to_string(),
            ));
        }
        self.whisper
            .validate()
            .map_err(|e| LifecycleError::InvalidConfig(e.to_string()))
    }

    /// Apply `VIDEO_DIGEST_THREADS` when set to a positive integer
    pub fn apply_env_overrides(&mut self) {
        if let Some(threads) = std::env::var(THREADS_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
        {
            debug!(threads, "Thread budget from {}", THREADS_ENV);
            self.threads = Some(threads);
        }
    }

    /// Vision weights file actually loaded, after applying `vision_precision`
    pub fn resolved_vision_model(&self) -> PathBuf {
        self.vision_precision.resolve(&self.vision_model, WeightsFormat::Onnx)
    }

    /// Speech weights file actually loaded, after applying `speech_precision`.
    ///
    /// With the default `int8` precision, `ggml-base.bin` resolves to
    /// `ggml-base-q8_0.bin`.
    pub fn resolved_speech_model(&self) -> PathBuf {
        self.speech_precision.resolve(&self.speech_model, WeightsFormat::Ggml)
    }

    pub fn thread_budget(&self, cores: usize) -> ThreadBudget {
        ThreadBudget::compute(cores, self.thread_reserve, self.threads, self.speech_threads)
    }
}

/// Loaded capabilities, shared read-only by all jobs
#[derive(Clone)]
pub struct Capabilities {
    pub vision: Arc<dyn VisionCaptioner>,
    pub speech: Arc<dyn SpeechTranscriber>,
    pub budget: ThreadBudget,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

/// Builds capabilities for a given configuration and budget
pub trait CapabilityLoader: Send + Sync {
    fn load(&self, config: &LifecycleConfig, budget: ThreadBudget) -> Result<Capabilities, LifecycleError>;
}

/// Loads BLIP through ONNX Runtime and Whisper through whisper.cpp
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxWhisperLoader;

impl CapabilityLoader for OnnxWhisperLoader {
    fn load(&self, config: &LifecycleConfig, budget: ThreadBudget) -> Result<Capabilities, LifecycleError> {
        let vision_path = config.resolved_vision_model();
        let caption_config = OnnxCaptionConfig {
            intra_threads: budget.vision,
            ..config.caption.clone()
        };
        let vision = OnnxVisionCaptioner::load(&vision_path, &config.vision_tokenizer, caption_config)
            .map_err(|e| {
                LifecycleError::LoadFailed(format!(
                    "vision model {}{}: {e}",
                    vision_path.display(),
                    precision_note(&config.vision_model, &vision_path, config.vision_precision)
                ))
            })?;

        let speech_path = config.resolved_speech_model();
        let whisper_config = WhisperConfig {
            threads: budget.speech,
            ..config.whisper.clone()
        };
        let speech = WhisperTranscriber::load(&speech_path, whisper_config)
            .map_err(|e| {
                LifecycleError::LoadFailed(format!(
                    "speech model {}{}: {e}",
                    speech_path.display(),
                    precision_note(&config.speech_model, &speech_path, config.speech_precision)
                ))
            })?;

        Ok(Capabilities {
            vision: Arc::new(vision),
            speech: Arc::new(speech),
            budget,
        })
    }
}

/// Names the configured file when precision redirected the load elsewhere
fn precision_note(configured: &Path, resolved: &Path, precision: Precision) -> String {
    if configured == resolved {
        String::new()
    } else {
        format!(" ({precision:?} variant of {})", configured.display())
    }
}

/// Observable lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

enum LoadState {
    Uninitialized,
    Loading,
    Ready(Arc<Capabilities>),
    Failed(String),
}

/// Loads capabilities at most once and shares them
pub struct ModelLifecycle {
    config: LifecycleConfig,
    loader: Box<dyn CapabilityLoader>,
    cores: usize,
    ready: OnceCell<Arc<Capabilities>>,
    state: Mutex<LoadState>,
    changed: Condvar,
}

impl ModelLifecycle {
    /// Lifecycle using the bundled ONNX/Whisper loader
    pub fn new(config: LifecycleConfig) -> Self {
        Self::with_loader(config, Box::new(OnnxWhisperLoader))
    }

    pub fn with_loader(config: LifecycleConfig, loader: Box<dyn CapabilityLoader>) -> Self {
        Self {
            config,
            loader,
            cores: num_cpus::get(),
            ready: OnceCell::new(),
            state: Mutex::new(LoadState::Uninitialized),
            changed: Condvar::new(),
        }
    }

    /// Pretend the machine has `cores` logical cores
    pub fn with_core_count(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        match self.lock_state() {
            Ok(state) => match &*state {
                LoadState::Uninitialized => LifecycleState::Uninitialized,
                LoadState::Loading => LifecycleState::Loading,
                LoadState::Ready(_) => LifecycleState::Ready,
                LoadState::Failed(reason) => LifecycleState::Failed(reason.clone()),
            },
            Err(e) => LifecycleState::Failed(e.to_string()),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, LoadState>, LifecycleError> {
        self.state.lock().map_err(|_| LifecycleError::Poisoned)
    }

    /// Load the capabilities if nobody has yet, then return them.
    ///
    /// Safe to call from many threads; exactly one performs the load.
    pub fn ensure_loaded(&self) -> Result<Arc<Capabilities>, LifecycleError> {
        if let Some(capabilities) = self.ready.get() {
            return Ok(Arc::clone(capabilities));
        }

        let mut state = self.lock_state()?;
        loop {
            let in_progress = match &*state {
                LoadState::Ready(capabilities) => return Ok(Arc::clone(capabilities)),
                LoadState::Failed(reason) => return Err(LifecycleError::LoadFailed(reason.clone())),
                LoadState::Loading => true,
                LoadState::Uninitialized => false,
            };
            if !in_progress {
                *state = LoadState::Loading;
                break;
            }
            state = self.changed.wait(state).map_err(|_| LifecycleError::Poisoned)?;
        }
        drop(state);

        // Load without holding the lock so waiters park on the condvar
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.load()))
            .unwrap_or_else(|_| Err(LifecycleError::LoadFailed("model loader panicked".to_string())));

        let mut state = self.lock_state()?;
        let result = match outcome {
            Ok(capabilities) => {
                let capabilities = Arc::new(capabilities);
                // Only this thread reaches here, so the cell is still empty
                let _ = self.ready.set(Arc::clone(&capabilities));
                *state = LoadState::Ready(Arc::clone(&capabilities));
                Ok(capabilities)
            }
            Err(e) => {
                let reason = match &e {
                    LifecycleError::LoadFailed(reason) => reason.clone(),
                    other => other.to_string(),
                };
                error!(error = %reason, "Model loading failed");
                *state = LoadState::Failed(reason.clone());
                Err(LifecycleError::LoadFailed(reason))
            }
        };
        self.changed.notify_all();
        result
    }

    fn load(&self) -> Result<Capabilities, LifecycleError> {
        self.config.validate()?;

        let start = Instant::now();
        let budget = self.config.thread_budget(self.cores);
        info!(
            cores = self.cores,
            total = budget.total,
            vision = budget.vision,
            speech = budget.speech,
            "Thread budget"
        );

        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(budget.total)
            .build_global()
        {
            debug!(error = %e, "Global thread pool already initialized");
        }

        let capabilities = self.loader.load(&self.config, budget)?;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            vision_precision = ?self.config.vision_precision,
            speech_precision = ?self.config.speech_precision,
            "Models loaded"
        );
        Ok(capabilities)
    }
}
