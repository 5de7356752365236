//! Advisory domain tags
//!
//! The closed set of advisory domains the engine serves. Each query carries a
//! non-empty ordered set of these after routing; order expresses priority for
//! retrieval budgeting.

use serde::{Deserialize, Serialize};

/// One advisory domain, backed by one vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTag {
    /// 창업 절차 및 정부 지원사업
    StartupFunding,
    /// 세무 및 회계
    FinanceTax,
    /// 인사 및 노무
    HrLabor,
    /// 일반 법령 및 판례
    LawCommon,
}

impl DomainTag {
    /// All tags in default priority order, most specific first.
    ///
    /// Ties in routing are broken toward the earlier entry so the most
    /// specific advisory path wins when signals overlap.
    pub const PRIORITY: [DomainTag; 4] = [
        DomainTag::StartupFunding,
        DomainTag::FinanceTax,
        DomainTag::HrLabor,
        DomainTag::LawCommon,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainTag::StartupFunding => "startup_funding",
            DomainTag::FinanceTax => "finance_tax",
            DomainTag::HrLabor => "hr_labor",
            DomainTag::LawCommon => "law_common",
        }
    }

    /// Korean display name used in prompts and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            DomainTag::StartupFunding => "창업·지원사업",
            DomainTag::FinanceTax => "세무·회계",
            DomainTag::HrLabor => "인사·노무",
            DomainTag::LawCommon => "법령·판례",
        }
    }

    /// Rank within the default priority order; lower wins ties.
    pub fn priority_rank(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "startup_funding" => Some(DomainTag::StartupFunding),
            "finance_tax" => Some(DomainTag::FinanceTax),
            "hr_labor" => Some(DomainTag::HrLabor),
            "law_common" => Some(DomainTag::LawCommon),
            _ => None,
        }
    }
}

impl std::fmt::Display for DomainTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        // law_common < hr_labor < finance_tax < startup_funding
        assert!(DomainTag::StartupFunding.priority_rank() < DomainTag::FinanceTax.priority_rank());
        assert!(DomainTag::FinanceTax.priority_rank() < DomainTag::HrLabor.priority_rank());
        assert!(DomainTag::HrLabor.priority_rank() < DomainTag::LawCommon.priority_rank());
    }

    #[test]
    fn test_parse_round_trip() {
        for tag in DomainTag::PRIORITY {
            assert_eq!(DomainTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(DomainTag::parse("cooking"), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DomainTag::FinanceTax).unwrap();
        assert_eq!(json, "\"finance_tax\"");
    }
}
