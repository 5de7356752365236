//! Router keyword tables
//!
//! Per-domain Korean keyword lists backing the router's cheap pre-filter.
//! The tables are data: routing logic lives in the agents crate and only
//! reads them through this type.

use std::collections::HashMap;

use sodam_core::DomainTag;

/// Per-domain keyword lexicon for the router pre-filter.
#[derive(Debug, Clone)]
pub struct RouterLexicon {
    entries: HashMap<DomainTag, Vec<&'static str>>,
}

impl RouterLexicon {
    pub fn keywords(&self, tag: DomainTag) -> &[&'static str] {
        self.entries.get(&tag).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Count of keywords from `tag`'s table that occur in `text`.
    pub fn hits(&self, tag: DomainTag, text: &str) -> usize {
        self.keywords(tag).iter().filter(|kw| text.contains(*kw)).count()
    }
}

impl Default for RouterLexicon {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            DomainTag::StartupFunding,
            vec![
                "창업", "예비창업", "지원사업", "정부지원", "공고", "모집", "바우처",
                "사업계획서", "소상공인", "창업지원", "보조금", "스타트업", "기업마당",
                "융자", "정책자금", "사업자등록",
            ],
        );
        entries.insert(
            DomainTag::FinanceTax,
            vec![
                "세금", "부가가치세", "부가세", "종합소득세", "법인세", "원천징수", "세무",
                "회계", "신고", "절세", "세액공제", "홈택스", "세금계산서", "기장", "장부",
                "간이과세", "면세",
            ],
        );
        entries.insert(
            DomainTag::HrLabor,
            vec![
                "근로계약", "근로계약서", "4대보험", "최저임금", "퇴직금", "연차", "해고",
                "수당", "주휴수당", "채용", "취업규칙", "임금", "노무", "근로기준법", "직원",
                "알바", "산재",
            ],
        );
        entries.insert(
            DomainTag::LawCommon,
            vec![
                "법령", "판례", "계약서", "소송", "분쟁", "손해배상", "민법", "상법",
                "임대차", "내용증명", "법률", "조항", "약관", "특허", "상표",
            ],
        );
        Self { entries }
    }
}
