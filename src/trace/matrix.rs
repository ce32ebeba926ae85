//! Coverage statistics, gap analysis and the traceability matrix.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::graph::{NodeIndex, TraceGraph};
use super::models::{ArtifactKind, LinkType};

/// A node of `kind` is covered when a `link_type` edge joins it to a node of
/// `counterpart`, in either direction.
#[derive(Debug, Clone, Copy)]
pub struct CoverageRule {
    pub key: &'static str,
    pub kind: ArtifactKind,
    pub link_type: LinkType,
    pub counterpart: ArtifactKind,
}

pub const COVERAGE_RULES: [CoverageRule; 4] = [
    CoverageRule {
        key: "user_need.design_input",
        kind: ArtifactKind::UserNeed,
        link_type: LinkType::DerivesFrom,
        counterpart: ArtifactKind::DesignInput,
    },
    CoverageRule {
        key: "user_need.validation",
        kind: ArtifactKind::UserNeed,
        link_type: LinkType::Validates,
        counterpart: ArtifactKind::Validation,
    },
    CoverageRule {
        key: "design_input.design_output",
        kind: ArtifactKind::DesignInput,
        link_type: LinkType::Implements,
        counterpart: ArtifactKind::DesignOutput,
    },
    CoverageRule {
        key: "design_input.verification",
        kind: ArtifactKind::DesignInput,
        link_type: LinkType::Verifies,
        counterpart: ArtifactKind::Verification,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Complete,
    Partial,
    /// Nothing of the rule's kind exists yet; reported as 100%.
    NoItems,
}

impl CoverageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::NoItems => "no_items",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStatistic {
    pub node_type: ArtifactKind,
    pub link_type: LinkType,
    pub counterpart: ArtifactKind,
    pub total: usize,
    pub covered: usize,
    pub percentage: u8,
    pub status: CoverageStatus,
}

impl CoverageStatistic {
    fn new(rule: &CoverageRule, total: usize, covered: usize) -> Self {
        let (percentage, status) = if total == 0 {
            (100, CoverageStatus::NoItems)
        } else if covered == total {
            (100, CoverageStatus::Complete)
        } else {
            (coverage_percentage(covered, total), CoverageStatus::Partial)
        };
        Self {
            node_type: rule.kind,
            link_type: rule.link_type,
            counterpart: rule.counterpart,
            total,
            covered,
            percentage,
            status,
        }
    }
}

/// `round(covered / total * 100)`, half up, integer arithmetic.
pub fn coverage_percentage(covered: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let covered = covered.min(total) as u64;
    let total = total as u64;
    ((covered * 200 + total) / (total * 2)) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub node_type: ArtifactKind,
    pub node_id: String,
    pub missing_relation: String,
}

/// One user need and everything traced from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    pub user_need: String,
    pub design_inputs: Vec<String>,
    pub design_outputs: Vec<String>,
    pub verifications: Vec<String>,
    pub validations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceabilityMatrix {
    pub project_id: i64,
    pub generated_at: DateTime<Utc>,
    pub matrix_data: Vec<MatrixRow>,
    pub coverage_statistics: BTreeMap<String, CoverageStatistic>,
    pub gap_analysis: Vec<Gap>,
}

/// A persisted matrix, kept as compliance evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSnapshot {
    pub id: Uuid,
    pub project_id: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub matrix: TraceabilityMatrix,
}

/// Per-rule statistics and gaps.
pub fn coverage(graph: &TraceGraph) -> (BTreeMap<String, CoverageStatistic>, Vec<Gap>) {
    let mut statistics = BTreeMap::new();
    let mut gaps = Vec::new();

    for rule in &COVERAGE_RULES {
        let mut total = 0;
        let mut covered = 0;
        for node in graph.nodes_of(rule.kind) {
            total += 1;
            if graph.linked(node, rule.link_type, rule.counterpart).is_empty() {
                gaps.push(Gap {
                    node_type: rule.kind,
                    node_id: graph.node(node).id.clone(),
                    missing_relation: rule.key.to_string(),
                });
            } else {
                covered += 1;
            }
        }
        statistics.insert(rule.key.to_string(), CoverageStatistic::new(rule, total, covered));
    }

    gaps.sort();
    (statistics, gaps)
}

fn ids(graph: &TraceGraph, nodes: &BTreeSet<NodeIndex>) -> Vec<String> {
    let mut ids: Vec<String> = nodes.iter().map(|&n| graph.node(n).id.clone()).collect();
    ids.sort();
    ids
}

fn row(graph: &TraceGraph, user_need: NodeIndex) -> MatrixRow {
    let inputs = graph.linked(user_need, LinkType::DerivesFrom, ArtifactKind::DesignInput);

    let mut outputs = BTreeSet::new();
    let mut verifications = BTreeSet::new();
    for &input in &inputs {
        outputs.extend(graph.linked(input, LinkType::Implements, ArtifactKind::DesignOutput));
        verifications.extend(graph.linked(input, LinkType::Verifies, ArtifactKind::Verification));
    }

    let mut validations = graph.linked(user_need, LinkType::Validates, ArtifactKind::Validation);
    for &output in &outputs {
        verifications.extend(graph.linked(output, LinkType::Verifies, ArtifactKind::Verification));
        validations.extend(graph.linked(output, LinkType::Validates, ArtifactKind::Validation));
    }

    MatrixRow {
        user_need: graph.node(user_need).id.clone(),
        design_inputs: ids(graph, &inputs),
        design_outputs: ids(graph, &outputs),
        verifications: ids(graph, &verifications),
        validations: ids(graph, &validations),
    }
}

/// Generate the full matrix. Output depends only on the graph and `now`.
pub fn generate(project_id: i64, graph: &TraceGraph, now: DateTime<Utc>) -> TraceabilityMatrix {
    let (coverage_statistics, gap_analysis) = coverage(graph);
    let matrix_data = graph
        .nodes_of(ArtifactKind::UserNeed)
        .map(|un| row(graph, un))
        .collect();

    TraceabilityMatrix {
        project_id,
        generated_at: now,
        matrix_data,
        coverage_statistics,
        gap_analysis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::graph::fixtures::{artifact, link};
    use ArtifactKind::*;

    #[test]
    fn test_percentage_rounds_half_up() {
        assert_eq!(coverage_percentage(1, 2), 50);
        assert_eq!(coverage_percentage(1, 3), 33);
        assert_eq!(coverage_percentage(2, 3), 67);
        assert_eq!(coverage_percentage(1, 8), 13); // 12.5
        assert_eq!(coverage_percentage(0, 5), 0);
        assert_eq!(coverage_percentage(0, 0), 100);
    }

    #[test]
    fn test_empty_rule_reports_no_items() {
        let graph = TraceGraph::build(&[artifact(UserNeed, "UN-1")], &[]);
        let (stats, gaps) = coverage(&graph);
        let inputs = &stats["design_input.verification"];
        assert_eq!(inputs.total, 0);
        assert_eq!(inputs.percentage, 100);
        assert_eq!(inputs.status, CoverageStatus::NoItems);
        let needs = &stats["user_need.design_input"];
        assert_eq!(needs.percentage, 0);
        assert_eq!(needs.status, CoverageStatus::Partial);
        assert_eq!(gaps.len(), 2);
    }

    #[test]
    fn test_design_input_coverage_complete_with_verification() {
        let graph = TraceGraph::build(
            &[
                artifact(UserNeed, "UN-1"),
                artifact(DesignInput, "DI-1"),
                artifact(Verification, "VER-1"),
            ],
            &[
                link((UserNeed, "UN-1"), (DesignInput, "DI-1"), LinkType::DerivesFrom),
                link((DesignInput, "DI-1"), (Verification, "VER-1"), LinkType::Verifies),
            ],
        );
        let (stats, gaps) = coverage(&graph);
        let verified = &stats["design_input.verification"];
        assert_eq!((verified.covered, verified.total, verified.percentage), (1, 1, 100));
        assert_eq!(verified.status, CoverageStatus::Complete);
        assert_eq!(stats["user_need.design_input"].percentage, 100);

        let missing: Vec<(&str, &str)> = gaps
            .iter()
            .map(|g| (g.node_id.as_str(), g.missing_relation.as_str()))
            .collect();
        assert_eq!(
            missing,
            vec![("UN-1", "user_need.validation"), ("DI-1", "design_input.design_output")]
        );
    }

    #[test]
    fn test_matrix_rows_follow_the_chain() {
        let graph = TraceGraph::build(
            &[
                artifact(UserNeed, "UN-2"),
                artifact(UserNeed, "UN-1"),
                artifact(DesignInput, "DI-1"),
                artifact(DesignOutput, "DO-1"),
                artifact(Verification, "VER-2"),
                artifact(Validation, "VAL-1"),
            ],
            &[
                link((DesignInput, "DI-1"), (UserNeed, "UN-1"), LinkType::DerivesFrom),
                link((DesignOutput, "DO-1"), (DesignInput, "DI-1"), LinkType::Implements),
                link((Verification, "VER-2"), (DesignOutput, "DO-1"), LinkType::Verifies),
                link((Validation, "VAL-1"), (UserNeed, "UN-1"), LinkType::Validates),
            ],
        );
        let matrix = generate(1, &graph, Utc::now());
        assert_eq!(matrix.matrix_data.len(), 2);
        let first = &matrix.matrix_data[0];
        assert_eq!(first.user_need, "UN-1");
        assert_eq!(first.design_inputs, vec!["DI-1"]);
        assert_eq!(first.design_outputs, vec!["DO-1"]);
        assert_eq!(first.verifications, vec!["VER-2"]);
        assert_eq!(first.validations, vec!["VAL-1"]);
        assert!(matrix.matrix_data[1].design_inputs.is_empty());
    }

    #[test]
    fn test_status_labels_match_wire_names() {
        for status in [CoverageStatus::Complete, CoverageStatus::Partial, CoverageStatus::NoItems] {
            let wire = serde_json::to_value(status).unwrap();
            assert_eq!(wire, status.as_str());
        }
    }

    #[test]
    fn test_regeneration_is_identical_apart_from_timestamp() {
        let artifacts = [
            artifact(UserNeed, "UN-1"),
            artifact(DesignInput, "DI-2"),
            artifact(DesignInput, "DI-1"),
        ];
        let links = [
            link((UserNeed, "UN-1"), (DesignInput, "DI-2"), LinkType::DerivesFrom),
            link((UserNeed, "UN-1"), (DesignInput, "DI-1"), LinkType::DerivesFrom),
        ];
        let now = Utc::now();
        let a = generate(1, &TraceGraph::build(&artifacts, &links), now);
        let mut reversed = links.to_vec();
        reversed.reverse();
        let b = generate(1, &TraceGraph::build(&artifacts, &reversed), now);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
        assert_eq!(a.matrix_data[0].design_inputs, vec!["DI-1", "DI-2"]);
    }
}
