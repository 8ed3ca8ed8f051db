//! Configuration types for PDF preparation.
//!
//! Two structs carry every knob:
//!
//! * [`CompressionProfile`]: *what* output the caller wants (resolution,
//!   JPEG quality, whether vectors survive, whether transparency is
//!   flattened). Profiles are named because the name ends up in output file
//!   names (`brochure-net-hq.pdf`).
//! * [`RunConfig`]: *how* jobs run (timeouts, concurrency, which ladders and
//!   tools to use, caching, progress and cancellation).
//!
//! Both are built through builders with clamping setters and a validating
//! `build()`.

use crate::cache::StrategyCache;
use crate::cancel::CancelToken;
use crate::error::RotoError;
use crate::pipeline::strategy::LadderSet;
use crate::progress::ProgressCallback;
use pdftool_probe::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ── Goal ─────────────────────────────────────────────────────────────────

/// The transformation a job asks for. Each goal has its own ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// Rewrite as PDF 1.3 so every transparency group is flattened.
    FlattenTransparency,
    /// Shrink the file while keeping text and vector art as vectors.
    VectorCompress,
    /// Rasterise every page to JPEG and rebuild the PDF from the images.
    RasterCompress,
}

impl Goal {
    pub const ALL: [Goal; 3] = [
        Goal::FlattenTransparency,
        Goal::VectorCompress,
        Goal::RasterCompress,
    ];

    /// Goal implied by a profile: flattening wins, then vector preservation.
    pub fn for_profile(profile: &CompressionProfile) -> Goal {
        if profile.flatten_transparency {
            Goal::FlattenTransparency
        } else if profile.preserve_vectors {
            Goal::VectorCompress
        } else {
            Goal::RasterCompress
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Goal::FlattenTransparency => "flatten_transparency",
            Goal::VectorCompress => "vector_compress",
            Goal::RasterCompress => "raster_compress",
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Compression profile ──────────────────────────────────────────────────

/// Names of the built-in profiles accepted by [`CompressionProfile::preset`].
pub const PRESET_NAMES: &[&str] = &["hq", "light", "medium", "very-light", "raster", "flatten"];

/// A named, immutable set of output parameters.
///
/// # Example
/// ```rust
/// use roto_pdf::CompressionProfile;
///
/// let web = CompressionProfile::builder("web")
///     .resolution(120)
///     .quality(55)
///     .build()
///     .unwrap();
/// assert!(web.preserve_vectors);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionProfile {
    /// Short identifier used in output file names. ASCII letters, digits,
    /// `-` and `_` only.
    pub name: String,

    /// Target resolution in DPI for downsampled or rasterised images.
    /// Range: 36–1200.
    pub resolution: u32,

    /// JPEG quality, 0–100. In-process encoding clamps to 1–95.
    pub quality: u8,

    /// Keep text and vector art as vectors. When false, pages are rasterised.
    pub preserve_vectors: bool,

    /// Flatten transparency groups (PDF 1.3 rewrite). Takes precedence over
    /// the other two modes.
    pub flatten_transparency: bool,

    /// Downscale factor applied by in-process image recompression. Range: 0.1–1.0.
    pub image_scale: f32,
}

impl Default for CompressionProfile {
    fn default() -> Self {
        Self {
            name: "custom".to_string(),
            resolution: 150,
            quality: 75,
            preserve_vectors: true,
            flatten_transparency: false,
            image_scale: 1.0,
        }
    }
}

impl CompressionProfile {
    pub fn builder(name: impl Into<String>) -> CompressionProfileBuilder {
        CompressionProfileBuilder {
            profile: Self {
                name: name.into(),
                ..Self::default()
            },
        }
    }

    /// 300 DPI, quality 80. Good enough for office printing.
    pub fn hq() -> Self {
        Self {
            name: "hq".into(),
            resolution: 300,
            quality: 80,
            ..Self::default()
        }
    }

    /// 150 DPI, quality 50. Screen reading and e-mail.
    pub fn light() -> Self {
        Self {
            name: "light".into(),
            resolution: 150,
            quality: 50,
            ..Self::default()
        }
    }

    pub fn medium() -> Self {
        Self {
            name: "medium".into(),
            resolution: 150,
            quality: 75,
            ..Self::default()
        }
    }

    pub fn very_light() -> Self {
        Self {
            name: "very-light".into(),
            resolution: 96,
            quality: 45,
            image_scale: 0.5,
            ..Self::default()
        }
    }

    /// Every page becomes a JPEG. Smallest output, text is no longer selectable.
    pub fn raster() -> Self {
        Self {
            name: "raster".into(),
            resolution: 150,
            quality: 60,
            preserve_vectors: false,
            ..Self::default()
        }
    }

    /// PDF 1.3 rewrite for RIPs that choke on live transparency.
    pub fn flatten() -> Self {
        Self {
            name: "flatten".into(),
            resolution: 300,
            quality: 80,
            flatten_transparency: true,
            ..Self::default()
        }
    }

    /// Look up a built-in profile by name (see [`PRESET_NAMES`]).
    ///
    /// `very_light` is accepted as an alias of `very-light`.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hq" => Some(Self::hq()),
            "light" => Some(Self::light()),
            "medium" => Some(Self::medium()),
            "very-light" | "very_light" => Some(Self::very_light()),
            "raster" => Some(Self::raster()),
            "flatten" => Some(Self::flatten()),
            _ => None,
        }
    }

    /// The ladder goal this profile selects.
    pub fn goal(&self) -> Goal {
        Goal::for_profile(self)
    }
}

/// Builder for [`CompressionProfile`].
#[derive(Debug)]
pub struct CompressionProfileBuilder {
    profile: CompressionProfile,
}

impl CompressionProfileBuilder {
    pub fn resolution(mut self, dpi: u32) -> Self {
        self.profile.resolution = dpi.clamp(36, 1200);
        self
    }

    pub fn quality(mut self, q: u8) -> Self {
        self.profile.quality = q.min(100);
        self
    }

    pub fn preserve_vectors(mut self, v: bool) -> Self {
        self.profile.preserve_vectors = v;
        self
    }

    pub fn flatten_transparency(mut self, v: bool) -> Self {
        self.profile.flatten_transparency = v;
        self
    }

    pub fn image_scale(mut self, scale: f32) -> Self {
        self.profile.image_scale = if scale.is_finite() {
            scale.clamp(0.1, 1.0)
        } else {
            1.0
        };
        self
    }

    /// Build the profile, validating constraints.
    pub fn build(self) -> Result<CompressionProfile, RotoError> {
        validate_profile(&self.profile)?;
        Ok(self.profile)
    }
}

/// Check a profile built by hand or deserialised from JSON.
pub fn validate_profile(p: &CompressionProfile) -> Result<(), RotoError> {
    if p.name.is_empty() {
        return Err(RotoError::InvalidConfig("Profile name must not be empty".into()));
    }
    if let Some(bad) = p
        .name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(RotoError::InvalidConfig(format!(
            "Profile name '{}' contains '{}'; use letters, digits, '-' or '_'",
            p.name, bad
        )));
    }
    if !(36..=1200).contains(&p.resolution) {
        return Err(RotoError::InvalidConfig(format!(
            "Resolution must be 36–1200 DPI, got {}",
            p.resolution
        )));
    }
    if p.quality > 100 {
        return Err(RotoError::InvalidConfig(format!(
            "Quality must be 0–100, got {}",
            p.quality
        )));
    }
    if !(0.1..=1.0).contains(&p.image_scale) {
        return Err(RotoError::InvalidConfig(format!(
            "Image scale must be 0.1–1.0, got {}",
            p.image_scale
        )));
    }
    Ok(())
}

// ── Run configuration ────────────────────────────────────────────────────

/// How jobs are executed.
///
/// Built via [`RunConfig::builder()`] or [`RunConfig::default()`]. Cheap to
/// clone: the shared parts sit behind `Arc`.
///
/// # Example
/// ```rust
/// use roto_pdf::RunConfig;
///
/// let config = RunConfig::builder()
///     .strategy_timeout_secs(120)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Time budget of one strategy, shared by all of its steps. Default: 300.
    ///
    /// Ghostscript on a 400-page catalogue with heavy transparency can take
    /// minutes; a hung interpreter must not block the ladder forever.
    /// Strategies may override this with their own `timeout_secs`.
    pub strategy_timeout_secs: u64,

    /// Number of jobs processed at once by batch operations. Default: 2.
    ///
    /// Ghostscript and image recompression are CPU- and memory-hungry; two
    /// concurrent jobs keep a laptop responsive.
    pub concurrency: usize,

    /// Ladders per goal. Default: [`LadderSet::builtin`].
    pub ladders: Arc<LadderSet>,

    /// Tool registry. `None` uses the process-wide [`ToolRegistry::global`].
    pub tools: Option<Arc<ToolRegistry>>,

    /// Winner cache. `None` disables caching.
    pub cache: Option<Arc<StrategyCache>>,

    /// Try the cached winner first. Default: false, so the ladder order is fixed.
    pub prefer_cached_strategy: bool,

    /// Bleed removed from BleedBox/CropBox/MediaBox when a page has no
    /// TrimBox, in millimetres. Default: 3.0.
    pub bleed_mm: f64,

    /// Trim bleed before producing variants in [`crate::prepare_document`]. Default: true.
    pub trim_bleed: bool,

    /// Check `%PDF` header and `%%EOF` trailer of every winning output. Default: true.
    pub validate_output: bool,

    /// Progress hooks.
    pub progress_callback: Option<ProgressCallback>,

    /// Shared cancellation token.
    pub cancel: CancelToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy_timeout_secs: 300,
            concurrency: 2,
            ladders: Arc::new(LadderSet::builtin()),
            tools: None,
            cache: None,
            prefer_cached_strategy: false,
            bleed_mm: 3.0,
            trim_bleed: true,
            validate_output: true,
            progress_callback: None,
            cancel: CancelToken::new(),
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("strategy_timeout_secs", &self.strategy_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("ladders", &self.ladders)
            .field("tools", &self.tools.as_ref().map(|_| "<injected>"))
            .field("cache", &self.cache.as_ref().map(|c| c.len()))
            .field("prefer_cached_strategy", &self.prefer_cached_strategy)
            .field("bleed_mm", &self.bleed_mm)
            .field("trim_bleed", &self.trim_bleed)
            .field("validate_output", &self.validate_output)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
        }
    }

    /// The registry jobs should use: the injected one, else the global one.
    pub fn tools(&self) -> &ToolRegistry {
        self.tools.as_deref().unwrap_or_else(|| ToolRegistry::global())
    }
}

/// Builder for [`RunConfig`].
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn strategy_timeout_secs(mut self, secs: u64) -> Self {
        self.config.strategy_timeout_secs = secs.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn ladders(mut self, ladders: LadderSet) -> Self {
        self.config.ladders = Arc::new(ladders);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.config.tools = Some(Arc::new(tools));
        self
    }

    pub fn cache(mut self, cache: Arc<StrategyCache>) -> Self {
        self.config.cache = Some(cache);
        self
    }

    pub fn prefer_cached_strategy(mut self, v: bool) -> Self {
        self.config.prefer_cached_strategy = v;
        self
    }

    pub fn bleed_mm(mut self, mm: f64) -> Self {
        self.config.bleed_mm = mm;
        self
    }

    pub fn trim_bleed(mut self, v: bool) -> Self {
        self.config.trim_bleed = v;
        self
    }

    pub fn validate_output(mut self, v: bool) -> Self {
        self.config.validate_output = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel = token;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunConfig, RotoError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(RotoError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if !c.bleed_mm.is_finite() || c.bleed_mm < 0.0 {
            return Err(RotoError::InvalidConfig(format!(
                "Bleed must be a non-negative number of millimetres, got {}",
                c.bleed_mm
            )));
        }
        c.ladders.validate()?;
        Ok(self.config)
    }
}
