//! Rule-based explanations and recommendations.
//!
//! Reads the raw snapshot only; the anomaly score enters solely through the
//! lead sentence and the "deep scan" top-up, so the text stays stable and
//! interpretable whatever the model does.

use super::RiskLevel;
use crate::features::{keys, FeatureVector};

/// Appended when the list would otherwise be thin for a non-trivial score.
pub const DEEP_SCAN_ADVICE: &str = "Schedule a deep security scan to ensure system integrity.";
pub const ALL_CLEAR_ADVICE: &str = "System is optimized. Continue regular maintenance.";
pub const NORMAL_OPERATION: &str = "System is operating within normal parameters";

/// Recommendations fire above these thresholds, in this order.
const RECOMMENDATION_RULES: &[(&str, f64, &[&str])] = &[
    (
        keys::CPU_PERCENT,
        70.0,
        &[
            "Close unnecessary applications to reduce CPU load",
            "Check for background processes consuming CPU",
        ],
    ),
    (
        keys::MEMORY_PERCENT,
        75.0,
        &[
            "Free up RAM by closing unused applications",
            "Consider running RAM boost optimization",
        ],
    ),
    (
        keys::DISK_PERCENT,
        85.0,
        &[
            "Clean up disk space by removing junk files",
            "Uninstall unused applications",
            "Clear temporary files and cache",
        ],
    ),
    (
        keys::PROCESS_COUNT,
        150.0,
        &[
            "Review and disable unnecessary startup programs",
            "Kill unnecessary background processes",
        ],
    ),
    (
        keys::HIGH_CPU_PROCESSES,
        3.0,
        &["Identify and terminate high CPU processes"],
    ),
];

/// Findings for each metric; at most one tier per metric.
fn findings(features: &FeatureVector) -> Vec<String> {
    let cpu = features.get(keys::CPU_PERCENT);
    let memory = features.get(keys::MEMORY_PERCENT);
    let disk = features.get(keys::DISK_PERCENT);
    let processes = features.get(keys::PROCESS_COUNT);
    let high_cpu = features.get(keys::HIGH_CPU_PROCESSES);

    let mut out = Vec::new();
    if cpu > 80.0 {
        out.push(format!("CPU usage is critically high at {:.1}%", cpu));
    } else if cpu > 60.0 {
        out.push(format!("CPU usage is elevated at {:.1}%", cpu));
    }

    if memory > 85.0 {
        out.push(format!("Memory usage is critically high at {:.1}%", memory));
    } else if memory > 70.0 {
        out.push(format!("Memory usage is elevated at {:.1}%", memory));
    }

    if disk > 90.0 {
        out.push(format!("Disk space is critically low ({:.1}% free)", 100.0 - disk));
    } else if disk > 80.0 {
        out.push(format!("Disk space is running low ({:.1}% free)", 100.0 - disk));
    }

    if processes > 200.0 {
        out.push(format!("Too many running processes ({:.0})", processes));
    }
    if high_cpu > 5.0 {
        out.push(format!("Multiple high-CPU processes detected ({:.0})", high_cpu));
    }
    out
}

/// Lead sentence with the level and score, then one sentence per finding.
pub fn explain(features: &FeatureVector, risk_score: f64, level: RiskLevel) -> String {
    let mut clauses = findings(features);
    if clauses.is_empty() {
        clauses.push(NORMAL_OPERATION.to_string());
    }
    format!(
        "System health risk is {} (score: {:.1}%). {}.",
        level.as_str().to_uppercase(),
        risk_score * 100.0,
        clauses.join(". ")
    )
}

/// Ordered corrective actions. Never empty.
pub fn recommend(features: &FeatureVector, risk_score: f64) -> Vec<String> {
    let mut out: Vec<String> = RECOMMENDATION_RULES
        .iter()
        .filter(|(key, threshold, _)| features.get(key) > *threshold)
        .flat_map(|(_, _, advice)| advice.iter().map(|s| s.to_string()))
        .collect();

    if out.is_empty() {
        out.push(ALL_CLEAR_ADVICE.to_string());
    }
    if out.len() < 2 && risk_score > 0.4 {
        out.push(DEEP_SCAN_ADVICE.to_string());
    }
    out
}
