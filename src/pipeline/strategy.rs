//! Strategies, ladders and the built-in ladder catalogue.
//!
//! A [`Strategy`] is data: a list of [`Step`]s, each either an external
//! command template or an in-process [`BuiltinOp`]. A [`Ladder`] orders the
//! strategies of one [`Goal`]; a [`LadderSet`] holds one ladder per goal.
//!
//! Ladders can be replaced at runtime from JSON:
//!
//! ```json
//! {
//!   "flatten_transparency": [
//!     { "name": "Minimal", "steps": [
//!         { "kind": "tool", "tool": "ghostscript",
//!           "args": ["-dBATCH", "-dNOPAUSE", "-sDEVICE=pdfwrite",
//!                    "-dCompatibilityLevel=1.3", "-sOutputFile={output}", "{input}"] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Goals missing from the document keep their built-in ladder.
//!
//! ## Placeholders
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{input}`   | input of the step (job input, or previous step's output) |
//! | `{output}`  | file or directory the step must produce |
//! | `{workdir}` | attempt directory |
//! | `{dpi}`     | profile resolution |
//! | `{quality}` | profile JPEG quality |

use crate::config::Goal;
use crate::error::RotoError;
use once_cell::sync::Lazy;
use pdftool_probe::ToolKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

// ── Steps ────────────────────────────────────────────────────────────────

/// In-process operations available to strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinOp {
    /// Copy the input unchanged.
    PassThrough,
    /// Re-encode embedded raster images as smaller JPEGs.
    RecompressImages,
    /// Build a PDF from a directory of page JPEGs.
    AssembleJpegPages,
}

impl BuiltinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinOp::PassThrough => "pass_through",
            BuiltinOp::RecompressImages => "recompress_images",
            BuiltinOp::AssembleJpegPages => "assemble_jpeg_pages",
        }
    }

    /// Kind of input the operation reads.
    pub fn consumes(self) -> OutputKind {
        match self {
            BuiltinOp::AssembleJpegPages => OutputKind::Directory,
            BuiltinOp::PassThrough | BuiltinOp::RecompressImages => OutputKind::Pdf,
        }
    }
}

impl fmt::Display for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step writes to `{output}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Pdf,
    PostScript,
    /// A directory the step fills with files (created before the step runs).
    Directory,
}

impl OutputKind {
    /// Name of the step's output inside the attempt directory.
    pub fn file_name(self, step: usize) -> String {
        match self {
            OutputKind::Pdf => format!("step{step}.pdf"),
            OutputKind::PostScript => format!("step{step}.ps"),
            OutputKind::Directory => format!("step{step}-pages"),
        }
    }
}

/// One step of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Run an external tool with an argument template.
    Tool {
        tool: ToolKind,
        args: Vec<String>,
        #[serde(default)]
        output: OutputKind,
        /// Accepted exit codes; the tool's defaults when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success_codes: Option<Vec<i32>>,
    },
    /// Run an in-process operation.
    Builtin { op: BuiltinOp },
}

impl Step {
    pub fn tool(tool: ToolKind, args: &[&str]) -> Self {
        Step::Tool {
            tool,
            args: args.iter().map(|s| s.to_string()).collect(),
            output: OutputKind::Pdf,
            success_codes: None,
        }
    }

    pub fn builtin(op: BuiltinOp) -> Self {
        Step::Builtin { op }
    }

    /// Change the declared output kind of a tool step.
    pub fn producing(mut self, kind: OutputKind) -> Self {
        if let Step::Tool { output, .. } = &mut self {
            *output = kind;
        }
        self
    }

    pub fn output_kind(&self) -> OutputKind {
        match self {
            Step::Tool { output, .. } => *output,
            Step::Builtin { .. } => OutputKind::Pdf,
        }
    }

    pub fn tool_kind(&self) -> Option<ToolKind> {
        match self {
            Step::Tool { tool, .. } => Some(*tool),
            Step::Builtin { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Step::Tool { tool, .. } => tool.to_string(),
            Step::Builtin { op } => op.to_string(),
        }
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────

/// A named way of reaching a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub steps: Vec<Step>,
    /// Overrides [`crate::RunConfig::strategy_timeout_secs`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            timeout_secs: None,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// External tools the strategy needs, in first-use order, deduplicated.
    pub fn required_tools(&self) -> Vec<ToolKind> {
        let mut seen = Vec::new();
        for kind in self.steps.iter().filter_map(Step::tool_kind) {
            if !seen.contains(&kind) {
                seen.push(kind);
            }
        }
        seen
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("strategy name must not be empty".into());
        }
        if self.steps.is_empty() {
            return Err(format!("strategy '{}' has no steps", self.name));
        }
        if self.timeout_secs == Some(0) {
            return Err(format!("strategy '{}' has a zero timeout", self.name));
        }

        // The job input is a PDF.
        let mut previous = OutputKind::Pdf;
        for (i, step) in self.steps.iter().enumerate() {
            let n = i + 1;
            match step {
                Step::Tool { args, .. } => {
                    if previous == OutputKind::Directory {
                        return Err(format!(
                            "strategy '{}' step {n}: a tool cannot read a page directory",
                            self.name
                        ));
                    }
                    if !args.iter().any(|a| a.contains("{output}")) {
                        return Err(format!(
                            "strategy '{}' step {n}: arguments never mention {{output}}",
                            self.name
                        ));
                    }
                }
                Step::Builtin { op } => {
                    let needs = op.consumes();
                    let ok = match needs {
                        OutputKind::Directory => previous == OutputKind::Directory,
                        _ => previous == OutputKind::Pdf,
                    };
                    if !ok {
                        return Err(format!(
                            "strategy '{}' step {n}: {op} needs {:?} input, previous step produces {:?}",
                            self.name, needs, previous
                        ));
                    }
                }
            }
            previous = step.output_kind();
        }
        if previous != OutputKind::Pdf {
            return Err(format!(
                "strategy '{}' must end with a step that produces a PDF",
                self.name
            ));
        }
        Ok(())
    }
}

// ── Ladder ───────────────────────────────────────────────────────────────

/// Ordered strategies for one goal, most capable first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ladder {
    strategies: Vec<Strategy>,
}

impl Ladder {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.name == name)
    }

    /// Every tool referenced by any strategy, sorted.
    pub fn required_tools(&self) -> Vec<ToolKind> {
        let mut tools: Vec<ToolKind> = self
            .strategies
            .iter()
            .flat_map(Strategy::required_tools)
            .collect();
        tools.sort();
        tools.dedup();
        tools
    }

    /// Attempt order: `preferred` first when it names a strategy of this
    /// ladder, the rest in ladder order.
    pub fn attempt_order(&self, preferred: Option<&str>) -> Vec<&Strategy> {
        let first = preferred.and_then(|name| self.get(name));
        match first {
            Some(first) => std::iter::once(first)
                .chain(self.strategies.iter().filter(|s| s.name != first.name))
                .collect(),
            None => self.strategies.iter().collect(),
        }
    }

    pub fn validate(&self, goal: Goal) -> Result<(), RotoError> {
        if self.strategies.is_empty() {
            return Err(RotoError::InvalidLadder(format!("ladder for {goal} is empty")));
        }
        let mut names = HashSet::new();
        for s in &self.strategies {
            if !names.insert(s.name.as_str()) {
                return Err(RotoError::InvalidLadder(format!(
                    "ladder for {goal} has two strategies named '{}'",
                    s.name
                )));
            }
            s.validate()
                .map_err(|e| RotoError::InvalidLadder(format!("{goal}: {e}")))?;
        }
        Ok(())
    }
}

// ── Ladder set ───────────────────────────────────────────────────────────

/// One ladder per goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderSet {
    pub flatten_transparency: Ladder,
    pub vector_compress: Ladder,
    pub raster_compress: Ladder,
}

impl Default for LadderSet {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Partial document accepted by [`LadderSet::from_json_str`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LadderOverrides {
    flatten_transparency: Option<Ladder>,
    vector_compress: Option<Ladder>,
    raster_compress: Option<Ladder>,
}

impl LadderSet {
    /// The default ladders.
    pub fn builtin() -> Self {
        Self {
            flatten_transparency: defaults::flatten_ladder(),
            vector_compress: defaults::vector_ladder(),
            raster_compress: defaults::raster_ladder(),
        }
    }

    pub fn ladder(&self, goal: Goal) -> &Ladder {
        match goal {
            Goal::FlattenTransparency => &self.flatten_transparency,
            Goal::VectorCompress => &self.vector_compress,
            Goal::RasterCompress => &self.raster_compress,
        }
    }

    /// Replace the ladder of one goal.
    pub fn with_ladder(mut self, goal: Goal, ladder: Ladder) -> Self {
        match goal {
            Goal::FlattenTransparency => self.flatten_transparency = ladder,
            Goal::VectorCompress => self.vector_compress = ladder,
            Goal::RasterCompress => self.raster_compress = ladder,
        }
        self
    }

    pub fn validate(&self) -> Result<(), RotoError> {
        for goal in Goal::ALL {
            self.ladder(goal).validate(goal)?;
        }
        Ok(())
    }

    /// Parse a JSON document; goals it omits keep their built-in ladder.
    pub fn from_json_str(json: &str) -> Result<Self, RotoError> {
        let overrides: LadderOverrides = serde_json::from_str(json)
            .map_err(|e| RotoError::InvalidLadder(format!("JSON: {e}")))?;
        let mut set = Self::builtin();
        if let Some(l) = overrides.flatten_transparency {
            set.flatten_transparency = l;
        }
        if let Some(l) = overrides.vector_compress {
            set.vector_compress = l;
        }
        if let Some(l) = overrides.raster_compress {
            set.raster_compress = l;
        }
        set.validate()?;
        Ok(set)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RotoError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RotoError::InvalidLadder(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, RotoError> {
        serde_json::to_string_pretty(self).map_err(|e| RotoError::Internal(e.to_string()))
    }
}

// ── Placeholders ─────────────────────────────────────────────────────────

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(input|output|workdir|dpi|quality)\}").unwrap());

/// Values substituted into argument templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub workdir: &'a Path,
    pub dpi: u32,
    pub quality: u8,
}

/// Expand every placeholder of every argument. Unknown `{...}` text is kept
/// verbatim (Ghostscript uses braces in PostScript snippets).
pub fn expand_args(args: &[String], vars: &TemplateVars<'_>) -> Vec<String> {
    args.iter()
        .map(|arg| {
            RE_PLACEHOLDER
                .replace_all(arg, |caps: &regex::Captures<'_>| match &caps[1] {
                    "input" => vars.input.to_string_lossy().into_owned(),
                    "output" => vars.output.to_string_lossy().into_owned(),
                    "workdir" => vars.workdir.to_string_lossy().into_owned(),
                    "dpi" => vars.dpi.to_string(),
                    "quality" => vars.quality.to_string(),
                    other => format!("{{{other}}}"),
                })
                .into_owned()
        })
        .collect()
}

// ── Built-in ladders ─────────────────────────────────────────────────────

mod defaults {
    use super::*;

    /// Ghostscript options shared by every PDF 1.3 rewrite.
    const GS_MINIMAL: &[&str] = &[
        "-dBATCH",
        "-dNOPAUSE",
        "-dSAFER",
        "-sDEVICE=pdfwrite",
        "-dCompatibilityLevel=1.3",
        "-dAutoRotatePages=/None",
        "-sOutputFile={output}",
        "{input}",
    ];

    fn gs_minimal() -> Step {
        Step::tool(ToolKind::Ghostscript, GS_MINIMAL)
    }

    pub(super) fn flatten_ladder() -> Ladder {
        Ladder::new(vec![
            Strategy::new(
                "Standard",
                vec![Step::tool(
                    ToolKind::Ghostscript,
                    &[
                        "-dBATCH",
                        "-dNOPAUSE",
                        "-dSAFER",
                        "-sDEVICE=pdfwrite",
                        "-dCompatibilityLevel=1.3",
                        "-dPDFSETTINGS=/prepress",
                        "-dAutoRotatePages=/None",
                        "-sColorConversionStrategy=LeaveColorUnchanged",
                        "-dDownsampleColorImages=true",
                        "-dColorImageResolution={dpi}",
                        "-dDownsampleGrayImages=true",
                        "-dGrayImageResolution={dpi}",
                        "-sOutputFile={output}",
                        "{input}",
                    ],
                )],
            ),
            Strategy::new("MinimalDirect", vec![gs_minimal()]),
            Strategy::new(
                "RebuildThenMinimal",
                vec![
                    Step::tool(
                        ToolKind::Qpdf,
                        &[
                            "--object-streams=disable",
                            "--decode-level=generalized",
                            "{input}",
                            "{output}",
                        ],
                    ),
                    gs_minimal(),
                ],
            ),
            Strategy::new(
                "ConvertThenMinimal",
                vec![
                    Step::tool(
                        ToolKind::Pdftops,
                        &["-level3", "-origpagesizes", "{input}", "{output}"],
                    )
                    .producing(OutputKind::PostScript),
                    gs_minimal(),
                ],
            ),
        ])
    }

    pub(super) fn vector_ladder() -> Ladder {
        Ladder::new(vec![
            Strategy::new("ImageRecompress", vec![Step::builtin(BuiltinOp::RecompressImages)]),
            Strategy::new(
                "QpdfCompress",
                vec![Step::tool(
                    ToolKind::Qpdf,
                    &[
                        "--stream-data=compress",
                        "--object-streams=generate",
                        "{input}",
                        "{output}",
                    ],
                )],
            ),
            Strategy::new("PassThrough", vec![Step::builtin(BuiltinOp::PassThrough)]),
        ])
    }

    pub(super) fn raster_ladder() -> Ladder {
        Ladder::new(vec![
            Strategy::new(
                "PopplerRaster",
                vec![
                    Step::tool(
                        ToolKind::Pdftoppm,
                        &[
                            "-jpeg",
                            "-jpegopt",
                            "quality={quality}",
                            "-r",
                            "{dpi}",
                            "-cropbox",
                            "{input}",
                            "{output}/page",
                        ],
                    )
                    .producing(OutputKind::Directory),
                    Step::builtin(BuiltinOp::AssembleJpegPages),
                ],
            ),
            Strategy::new(
                "GhostscriptRaster",
                vec![
                    Step::tool(
                        ToolKind::Ghostscript,
                        &[
                            "-dBATCH",
                            "-dNOPAUSE",
                            "-dSAFER",
                            "-sDEVICE=jpeg",
                            "-r{dpi}",
                            "-dJPEGQ={quality}",
                            "-dUseCropBox",
                            "-sOutputFile={output}/page-%04d.jpg",
                            "{input}",
                        ],
                    )
                    .producing(OutputKind::Directory),
                    Step::builtin(BuiltinOp::AssembleJpegPages),
                ],
            ),
        ])
    }
}
