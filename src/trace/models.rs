use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{WorkflowError, WorkflowResult};

/// Kinds of design-control record that can be traced. The declaration order
/// is the V-model order and drives sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    UserNeed,
    DesignInput,
    DesignOutput,
    Verification,
    Validation,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserNeed => "user_need",
            Self::DesignInput => "design_input",
            Self::DesignOutput => "design_output",
            Self::Verification => "verification",
            Self::Validation => "validation",
        }
    }

    /// Test evidence kinds, which never take part in derivation chains.
    pub fn is_evidence(&self) -> bool {
        matches!(self, Self::Verification | Self::Validation)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_need" => Ok(Self::UserNeed),
            "design_input" => Ok(Self::DesignInput),
            "design_output" => Ok(Self::DesignOutput),
            "verification" => Ok(Self::Verification),
            "validation" => Ok(Self::Validation),
            _ => Err(format!("Invalid artifact kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    DerivesFrom,
    Implements,
    Verifies,
    Validates,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DerivesFrom => "derives_from",
            Self::Implements => "implements",
            Self::Verifies => "verifies",
            Self::Validates => "validates",
        }
    }

    /// Check that the link type makes sense between the two endpoint kinds.
    pub fn validate_endpoints(&self, source: ArtifactKind, target: ArtifactKind) -> WorkflowResult<()> {
        let touches = |kind: ArtifactKind| source == kind || target == kind;
        let ok = match self {
            Self::Verifies => touches(ArtifactKind::Verification),
            Self::Validates => touches(ArtifactKind::Validation),
            Self::Implements => touches(ArtifactKind::DesignOutput),
            Self::DerivesFrom => !source.is_evidence() && !target.is_evidence(),
        };
        if ok {
            Ok(())
        } else {
            Err(WorkflowError::InvalidLink(format!(
                "{} cannot connect {} to {}",
                self, source, target
            )))
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "derives_from" => Ok(Self::DerivesFrom),
            "implements" => Ok(Self::Implements),
            "verifies" => Ok(Self::Verifies),
            "validates" => Ok(Self::Validates),
            _ => Err(format!("Invalid link type: {}", s)),
        }
    }
}

/// A graph node address: artifact kind plus its external record id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub id: String,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Parses `kind:id`, e.g. `design_input:DI-1`.
impl FromStr for ArtifactRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid artifact reference '{}': expected kind:id", s))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(format!("Invalid artifact reference '{}': empty id", s));
        }
        Ok(Self::new(kind.trim().parse()?, id))
    }
}

/// A registered traceability node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceArtifact {
    pub project_id: i64,
    pub kind: ArtifactKind,
    pub artifact_id: String,
    pub title: String,
    pub registered_at: DateTime<Utc>,
}

impl TraceArtifact {
    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef::new(self.kind, self.artifact_id.clone())
    }
}

/// A directed, typed edge between two artifacts. Deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceLink {
    pub id: Uuid,
    pub project_id: i64,
    pub source: ArtifactRef,
    pub target: ArtifactRef,
    pub link_type: LinkType,
    pub active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_ref_parse_and_display() {
        let r: ArtifactRef = "design_input:DI-1".parse().unwrap();
        assert_eq!(r, ArtifactRef::new(ArtifactKind::DesignInput, "DI-1"));
        assert_eq!(r.to_string(), "design_input:DI-1");
        assert!("design_input".parse::<ArtifactRef>().is_err());
        assert!("widget:W-1".parse::<ArtifactRef>().is_err());
        assert!("user_need: ".parse::<ArtifactRef>().is_err());
    }

    #[test]
    fn test_refs_sort_by_lifecycle_kind_then_id() {
        let mut refs = vec![
            ArtifactRef::new(ArtifactKind::Validation, "VAL-1"),
            ArtifactRef::new(ArtifactKind::UserNeed, "UN-2"),
            ArtifactRef::new(ArtifactKind::UserNeed, "UN-1"),
        ];
        refs.sort();
        let shown: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(shown, vec!["user_need:UN-1", "user_need:UN-2", "validation:VAL-1"]);
    }

    #[test]
    fn test_link_endpoint_rules() {
        use ArtifactKind::*;
        assert!(LinkType::Verifies.validate_endpoints(DesignInput, Verification).is_ok());
        assert!(LinkType::Verifies.validate_endpoints(Verification, DesignOutput).is_ok());
        assert!(LinkType::Verifies.validate_endpoints(DesignInput, DesignOutput).is_err());
        assert!(LinkType::Validates.validate_endpoints(UserNeed, Validation).is_ok());
        assert!(LinkType::Implements.validate_endpoints(DesignOutput, DesignInput).is_ok());
        assert!(LinkType::Implements.validate_endpoints(UserNeed, DesignInput).is_err());
        assert!(LinkType::DerivesFrom.validate_endpoints(UserNeed, DesignInput).is_ok());
        let err = LinkType::DerivesFrom
            .validate_endpoints(DesignInput, Verification)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidLink(_)));
    }
}
