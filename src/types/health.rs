//! Health check types

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub check: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Any failing check is critical, otherwise any warning downgrades to Warning
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let overall_status = if checks.iter().any(|c| c.status == CheckStatus::Fail) {
            OverallStatus::Critical
        } else if checks.iter().any(|c| c.status == CheckStatus::Warning) {
            OverallStatus::Warning
        } else {
            OverallStatus::Healthy
        };
        Self {
            overall_status,
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: CheckStatus) -> HealthCheck {
        HealthCheck {
            check: "x".into(),
            status,
            message: String::new(),
        }
    }

    #[test]
    fn fail_outranks_warning() {
        let report = HealthReport::from_checks(vec![check(CheckStatus::Warning), check(CheckStatus::Fail)]);
        assert_eq!(report.overall_status, OverallStatus::Critical);
    }

    #[test]
    fn all_pass_is_healthy() {
        let report = HealthReport::from_checks(vec![check(CheckStatus::Pass)]);
        assert_eq!(report.overall_status, OverallStatus::Healthy);
        let report = HealthReport::from_checks(vec![check(CheckStatus::Pass), check(CheckStatus::Warning)]);
        assert_eq!(report.overall_status, OverallStatus::Warning);
    }
}
