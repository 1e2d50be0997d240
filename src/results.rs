//! Result Log - Typed Diagnostics
//!
//! Validators append entries; the log never removes one.
//! Validity is decided over the whole log.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl Severity {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

/// Guided-fix flows understood by the host UI layer.
///
/// The numeric codes are a wire contract with the operator layer and must
/// never be renumbered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum RemediationType {
    ReplaceMissingImage,
    FixOutput,
    BakeOcean,
    MeshCacheFilepath,
    BakeFluidSimulation,
    BakeCloth,
    BakeScriptedDrivers,
    BakeParticles,
    FixCamera,
    BakeFluidDomain,
    SaveProject,
    FixCyclesSamples,
    DisableRenderBorder,
    BakeHairDynamics,
}

impl RemediationType {
    pub const ALL: [RemediationType; 14] = [
        RemediationType::ReplaceMissingImage,
        RemediationType::FixOutput,
        RemediationType::BakeOcean,
        RemediationType::MeshCacheFilepath,
        RemediationType::BakeFluidSimulation,
        RemediationType::BakeCloth,
        RemediationType::BakeScriptedDrivers,
        RemediationType::BakeParticles,
        RemediationType::FixCamera,
        RemediationType::BakeFluidDomain,
        RemediationType::SaveProject,
        RemediationType::FixCyclesSamples,
        RemediationType::DisableRenderBorder,
        RemediationType::BakeHairDynamics,
    ];

    pub fn code(self) -> u8 {
        match self {
            RemediationType::ReplaceMissingImage => 1,
            RemediationType::FixOutput => 2,
            RemediationType::BakeOcean => 3,
            RemediationType::MeshCacheFilepath => 4,
            RemediationType::BakeFluidSimulation => 5,
            RemediationType::BakeCloth => 6,
            RemediationType::BakeScriptedDrivers => 7,
            RemediationType::BakeParticles => 8,
            RemediationType::FixCamera => 9,
            RemediationType::BakeFluidDomain => 10,
            RemediationType::SaveProject => 11,
            RemediationType::FixCyclesSamples => 12,
            RemediationType::DisableRenderBorder => 13,
            RemediationType::BakeHairDynamics => 14,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl From<RemediationType> for u8 {
    fn from(value: RemediationType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for RemediationType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        RemediationType::from_code(code).ok_or_else(|| format!("unknown remediation type {}", code))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub severity: Severity,
    /// Group label of the owning validator; `None` for system entries.
    pub source: Option<String>,
    pub message: String,
    #[serde(default)]
    pub remediation: Option<RemediationType>,
    #[serde(default)]
    pub param1: String,
    #[serde(default)]
    pub param2: String,
}

impl DiagnosticEntry {
    /// True when the host should offer a guided action for this entry.
    pub fn has_further_action(&self) -> bool {
        self.remediation.is_some()
    }
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--- {} --- {}", self.severity.label(), self.message)
    }
}

/// Append-only log for one check or export cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultLog {
    entries: Vec<DiagnosticEntry>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry. Only called at the start of a new cycle.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn push(&mut self, entry: DiagnosticEntry) {
        self.entries.push(entry);
    }

    /// Writer that stamps every entry with `source`.
    pub fn writer(&mut self, source: Option<&str>) -> ResultWriter<'_> {
        ResultWriter {
            log: self,
            source: source.map(str::to_string),
        }
    }

    pub fn entries(&self) -> &[DiagnosticEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&DiagnosticEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|e| e.severity == severity).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticEntry> {
        self.entries.iter().filter(|e| e.severity == Severity::Error)
    }

    /// A log that never ran is not valid: at least one entry must exist.
    pub fn is_valid(&self) -> bool {
        !self.entries.is_empty() && !self.has_errors()
    }

    /// Plain-text report grouped by validator, CRLF line endings.
    pub fn render_report(&self, env: &ReportEnvironment) -> String {
        let mut out = String::new();
        out.push_str("Logfile written by Farminizer\r\n\r\n");
        out.push_str("Environment:\r\n");
        out.push_str("------------------------------ \r\n");
        out.push_str(&format!("Client Document: {}\r\n", env.document));
        out.push_str(&format!("Client Original Path: {}\r\n", env.original_path));
        out.push_str(&format!("Client Host Ver.: {}\r\n", env.host_version));
        out.push_str(&format!("Client OS: {}\r\n", env.os));
        out.push_str(&format!("Written: {}\r\n", env.written_at.to_rfc3339()));
        out.push_str("\r\n\r\n");
        out.push_str("Farminizer output:\r\n");
        out.push_str("------------------------------ \r\n\r\n");

        let mut previous_group: Option<&str> = None;
        for entry in &self.entries {
            if let Some(group) = entry.source.as_deref() {
                if previous_group != Some(group) {
                    out.push_str(&format!("\r\n{}:\r\n\r\n", group));
                    previous_group = Some(group);
                }
            }
            out.push_str(&format!(" {}\r\n", entry));
        }
        out
    }
}

/// Header values for [`ResultLog::render_report`].
#[derive(Debug, Clone)]
pub struct ReportEnvironment {
    pub document: String,
    pub original_path: String,
    pub host_version: String,
    pub os: String,
    pub written_at: chrono::DateTime<chrono::Utc>,
}

/// Scoped appender handed to a validator.
pub struct ResultWriter<'a> {
    log: &'a mut ResultLog,
    source: Option<String>,
}

impl ResultWriter<'_> {
    pub fn info(&mut self, message: impl Into<String>) {
        self.add(Severity::Info, message.into(), None, "", "");
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.add(Severity::Warning, message.into(), None, "", "");
    }

    pub fn warn_with(&mut self, message: impl Into<String>, remediation: RemediationType) {
        self.add(Severity::Warning, message.into(), Some(remediation), "", "");
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.add(Severity::Error, message.into(), None, "", "");
    }

    pub fn error_with(
        &mut self,
        message: impl Into<String>,
        remediation: RemediationType,
        param1: &str,
        param2: &str,
    ) {
        self.add(Severity::Error, message.into(), Some(remediation), param1, param2);
    }

    fn add(
        &mut self,
        severity: Severity,
        message: String,
        remediation: Option<RemediationType>,
        param1: &str,
        param2: &str,
    ) {
        self.log.push(DiagnosticEntry {
            severity,
            source: self.source.clone(),
            message,
            remediation,
            param1: param1.to_string(),
            param2: param2.to_string(),
        });
    }
}
