//! Clause types as extracted by the analysis backend.
//!
//! Clauses are read-only on the client. Enumerated fields deserialize
//! leniently: an unrecognised risk level becomes unknown (`None`) and an
//! unrecognised clause type is kept verbatim in [`ClauseType::Other`], so a
//! malformed record never fails the whole document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::ParseError;

/// Risk level assigned to a clause by the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort weight: high 3, medium 2, low 1.
    pub fn weight(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

/// Severity weight of an optional risk level; unknown weighs 0.
pub fn severity(level: Option<RiskLevel>) -> u8 {
    level.map_or(0, |l| l.weight())
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(ParseError::new("risk level", s)),
        }
    }
}

/// How negotiable a clause category typically is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiability {
    High,
    Medium,
    Low,
}

impl Negotiability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

/// Category of a clause.
///
/// Backend values outside the known set are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClauseType {
    Compensation,
    Termination,
    NonCompete,
    Confidentiality,
    Benefits,
    WorkingConditions,
    IntellectualProperty,
    DisputeResolution,
    Probation,
    General,
    Other(String),
}

impl ClauseType {
    pub const KNOWN: [ClauseType; 10] = [
        ClauseType::Compensation,
        ClauseType::Termination,
        ClauseType::NonCompete,
        ClauseType::Confidentiality,
        ClauseType::Benefits,
        ClauseType::WorkingConditions,
        ClauseType::IntellectualProperty,
        ClauseType::DisputeResolution,
        ClauseType::Probation,
        ClauseType::General,
    ];

    /// Wire value, e.g. `non_compete`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Compensation => "compensation",
            Self::Termination => "termination",
            Self::NonCompete => "non_compete",
            Self::Confidentiality => "confidentiality",
            Self::Benefits => "benefits",
            Self::WorkingConditions => "working_conditions",
            Self::IntellectualProperty => "intellectual_property",
            Self::DisputeResolution => "dispute_resolution",
            Self::Probation => "probation",
            Self::General => "general",
            Self::Other(raw) => raw,
        }
    }

    /// Human-readable label, e.g. `Non-Compete`. Unknown types label as
    /// their raw value.
    pub fn label(&self) -> &str {
        match self {
            Self::Compensation => "Compensation",
            Self::Termination => "Termination",
            Self::NonCompete => "Non-Compete",
            Self::Confidentiality => "Confidentiality",
            Self::Benefits => "Benefits",
            Self::WorkingConditions => "Working Conditions",
            Self::IntellectualProperty => "Intellectual Property",
            Self::DisputeResolution => "Dispute Resolution",
            Self::Probation => "Probation",
            Self::General => "General",
            Self::Other(raw) if raw.is_empty() => UNKNOWN_LABEL,
            Self::Other(raw) => raw,
        }
    }

    pub fn negotiability(&self) -> Negotiability {
        match self {
            Self::Compensation | Self::NonCompete | Self::Probation => Negotiability::High,
            Self::Confidentiality | Self::IntellectualProperty => Negotiability::Low,
            _ => Negotiability::Medium,
        }
    }
}

/// Label used for a clause with no type at all.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Label of an optional clause type.
pub fn type_label(clause_type: Option<&ClauseType>) -> &str {
    clause_type.map_or(UNKNOWN_LABEL, ClauseType::label)
}

impl From<String> for ClauseType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "compensation" => Self::Compensation,
            "termination" => Self::Termination,
            "non_compete" => Self::NonCompete,
            "confidentiality" => Self::Confidentiality,
            "benefits" => Self::Benefits,
            "working_conditions" => Self::WorkingConditions,
            "intellectual_property" => Self::IntellectualProperty,
            "dispute_resolution" => Self::DisputeResolution,
            "probation" => Self::Probation,
            "general" => Self::General,
            _ => Self::Other(s),
        }
    }
}

impl From<ClauseType> for String {
    fn from(t: ClauseType) -> Self {
        match t {
            ClauseType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for ClauseType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::new("clause type", s));
        }
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for ClauseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted contract provision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub clause_type: Option<ClauseType>,
    #[serde(default, deserialize_with = "lenient_risk_level")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub risk_assessment: Option<String>,
    #[serde(default)]
    pub key_points: Option<Vec<String>>,
    #[serde(default)]
    pub recommendations: Option<Vec<String>>,
    #[serde(default)]
    pub position_start: Option<u64>,
    #[serde(default)]
    pub position_end: Option<u64>,
}

impl Clause {
    pub fn type_label(&self) -> &str {
        type_label(self.clause_type.as_ref())
    }

    pub fn severity(&self) -> u8 {
        severity(self.risk_level)
    }
}

fn lenient_risk_level<'de, D>(deserializer: D) -> Result<Option<RiskLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok()))
}
