use crate::models::{ProcurementRecord, SearchCriteria};

/// The active predicates of a `SearchCriteria`, lowercased once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveFilters {
    keyword: Option<String>,
    locality: Option<String>,
    value_min: Option<f64>,
    value_max: Option<f64>,
}

impl ActiveFilters {
    pub fn from_criteria(criteria: &SearchCriteria) -> Self {
        Self {
            keyword: criteria.active_keyword().map(str::to_lowercase),
            locality: criteria.active_locality().map(str::to_lowercase),
            value_min: criteria.active_value_min(),
            value_max: criteria.active_value_max(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the record satisfies every active predicate.
    pub fn matches(&self, record: &ProcurementRecord) -> bool {
        if let Some(keyword) = &self.keyword {
            let hit = [&record.description, &record.title, &record.organization]
                .into_iter()
                .any(|field| contains_folded(field, keyword));
            if !hit {
                return false;
            }
        }
        // Organization name is the only locality signal matched here.
        if let Some(locality) = &self.locality
            && !contains_folded(&record.organization, locality)
        {
            return false;
        }
        if let Some(min) = self.value_min
            && record.estimated_value < min
        {
            return false;
        }
        if let Some(max) = self.value_max
            && record.estimated_value > max
        {
            return false;
        }
        true
    }

    pub fn apply(&self, records: Vec<ProcurementRecord>) -> Vec<ProcurementRecord> {
        if self.is_empty() {
            return records;
        }
        records.into_iter().filter(|record| self.matches(record)).collect()
    }
}

fn contains_folded(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}
