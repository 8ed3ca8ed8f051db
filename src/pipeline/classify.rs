//! Typed failure classification for external tool runs.
//!
//! Exit codes alone are not reliable for these tools:
//!
//! * qpdf exits `3` when it repaired the file and wrote a good output.
//! * Ghostscript can exit `0` after printing `Unrecoverable error` or after
//!   silently dropping a page it could not draw.
//!
//! [`classify`] combines the exit code, the per-step accepted exit codes and
//! a table of known diagnostic patterns into a [`Classification`]. The table
//! is ordered: the first matching row wins, so specific patterns sit above
//! generic ones.

use once_cell::sync::Lazy;
use pdftool_probe::ToolKind;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Why a tool run counts as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// PostScript `rangecheck` (typically `setpagedevice` with odd boxes).
    RangeCheck,
    /// PostScript `undefined`: an operator or resource the interpreter lacks.
    Undefined,
    TypeCheck,
    LimitCheck,
    /// Interpreter ran out of memory.
    VmError,
    /// Read/write failure, missing file or full disk.
    IoError,
    /// Ghostscript gave up on the document.
    Unrecoverable,
    /// A page could not be drawn and would be missing from the output.
    PageDropped,
    /// The input is structurally broken beyond what the tool repairs.
    DamagedInput,
    /// The tool does not recognise the input as a PDF.
    NotAPdf,
    /// The document is encrypted and needs a password.
    PasswordRequired,
    /// Killed by a signal, no exit code.
    Signalled,
    /// The process could not be started.
    SpawnFailed,
    /// Non-accepted exit code with no recognisable diagnostic.
    NonZeroExit,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::RangeCheck => "rangecheck",
            FailureKind::Undefined => "undefined",
            FailureKind::TypeCheck => "typecheck",
            FailureKind::LimitCheck => "limitcheck",
            FailureKind::VmError => "VMerror",
            FailureKind::IoError => "I/O error",
            FailureKind::Unrecoverable => "unrecoverable error",
            FailureKind::PageDropped => "page dropped",
            FailureKind::DamagedInput => "damaged input",
            FailureKind::NotAPdf => "not a PDF",
            FailureKind::PasswordRequired => "password required",
            FailureKind::Signalled => "killed by signal",
            FailureKind::SpawnFailed => "could not start",
            FailureKind::NonZeroExit => "non-zero exit",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one tool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Failure(FailureKind),
}

impl Classification {
    pub fn is_success(self) -> bool {
        matches!(self, Classification::Success)
    }
}

struct Pattern {
    /// `None` applies to every tool.
    tool: Option<ToolKind>,
    regex: Regex,
    kind: FailureKind,
    /// Fail the run even when the exit code is accepted.
    fatal: bool,
}

impl Pattern {
    fn new(tool: Option<ToolKind>, re: &str, kind: FailureKind, fatal: bool) -> Self {
        Self {
            tool,
            regex: Regex::new(re).unwrap(),
            kind,
            fatal,
        }
    }

    fn applies(&self, tool: Option<ToolKind>, text: &str) -> bool {
        (self.tool.is_none() || self.tool == tool) && self.regex.is_match(text)
    }
}

static KNOWN_FAILURES: Lazy<Vec<Pattern>> = Lazy::new(|| {
    use FailureKind::*;
    use ToolKind::*;
    let gs = Some(Ghostscript);
    let qpdf = Some(Qpdf);
    vec![
        // Ghostscript
        Pattern::new(gs, r"Page drawing error occurred", PageDropped, true),
        Pattern::new(gs, r"VMerror", VmError, true),
        Pattern::new(gs, r"/undefinedfilename|/invalidfileaccess|/ioerror", IoError, false),
        Pattern::new(gs, r"/rangecheck|\brangecheck\b", RangeCheck, false),
        Pattern::new(gs, r"/typecheck", TypeCheck, false),
        Pattern::new(gs, r"/limitcheck", LimitCheck, false),
        Pattern::new(gs, r"/undefined\b|\bundefined in\b", Undefined, false),
        Pattern::new(gs, r"(?i)unrecoverable error", Unrecoverable, true),
        Pattern::new(gs, r"\*\*\*\* (?:Error|ERROR)|(?i)file has unbalanced|couldn't find trailer", DamagedInput, false),
        // qpdf
        Pattern::new(qpdf, r"(?i)invalid password", PasswordRequired, true),
        Pattern::new(qpdf, r"(?i)not a PDF file|can't find PDF header", NotAPdf, true),
        Pattern::new(qpdf, r"(?i)unable to find trailer dictionary|file is damaged", DamagedInput, false),
        // Poppler
        Pattern::new(Some(Pdftops), r"(?i)incorrect password", PasswordRequired, true),
        Pattern::new(Some(Pdftoppm), r"(?i)incorrect password", PasswordRequired, true),
        Pattern::new(Some(Pdftops), r"Couldn't (?:read xref|find trailer)", DamagedInput, false),
        Pattern::new(Some(Pdftoppm), r"Couldn't (?:read xref|find trailer)", DamagedInput, false),
        Pattern::new(Some(Pdftoppm), r"I/O Error", IoError, false),
        // Any tool
        Pattern::new(None, r"(?i)no space left on device", IoError, true),
        Pattern::new(None, r"(?i)permission denied", IoError, false),
    ]
});

/// Exit codes a tool uses for "output written" when a step does not say otherwise.
pub fn default_success_codes(tool: Option<ToolKind>) -> &'static [i32] {
    match tool {
        // 3 = succeeded with warnings
        Some(ToolKind::Qpdf) => &[0, 3],
        _ => &[0],
    }
}

/// Classify one finished tool run.
///
/// * Accepted exit code: success, unless a pattern marked fatal matches.
/// * Otherwise: the first matching pattern names the failure; with no match
///   the result is [`FailureKind::NonZeroExit`], or [`FailureKind::Signalled`]
///   when there was no exit code at all.
pub fn classify(
    tool: Option<ToolKind>,
    exit_code: Option<i32>,
    success_codes: &[i32],
    diagnostics: &str,
) -> Classification {
    let accepted = matches!(exit_code, Some(c) if success_codes.contains(&c));

    if accepted {
        return match KNOWN_FAILURES
            .iter()
            .find(|p| p.fatal && p.applies(tool, diagnostics))
        {
            Some(p) => Classification::Failure(p.kind),
            None => Classification::Success,
        };
    }

    let kind = KNOWN_FAILURES
        .iter()
        .find(|p| p.applies(tool, diagnostics))
        .map(|p| p.kind)
        .unwrap_or(match exit_code {
            Some(_) => FailureKind::NonZeroExit,
            None => FailureKind::Signalled,
        });
    Classification::Failure(kind)
}

/// The diagnostic line that best explains a failure, for short messages.
///
/// Prefers the first line matching a known pattern, then the last non-empty line.
pub fn headline(tool: Option<ToolKind>, diagnostics: &str) -> String {
    let matched = diagnostics.lines().find(|line| {
        KNOWN_FAILURES
            .iter()
            .any(|p| p.applies(tool, line))
    });
    let line = matched
        .or_else(|| diagnostics.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("")
        .trim();
    if line.chars().count() > 200 {
        let cut: String = line.chars().take(200).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
