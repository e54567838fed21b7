use chrono::{Duration, NaiveDate};

const UPSTREAM_DATE_FORMAT: &str = "%Y%m%d";

/// Inclusive publication-date window sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Fills in whichever bound is missing. With neither bound the window is
    /// the trailing `days` ending `today`; a lone `from` runs to `today`; a
    /// lone `to` reaches back `days`.
    pub fn resolve(
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        today: NaiveDate,
        days: i64,
    ) -> Result<Self, String> {
        let reach_back = |end: NaiveDate| {
            end.checked_sub_signed(Duration::days(days))
                .map(|start| Self::new(start, end))
                .ok_or_else(|| format!("dateTo {end} leaves no room for a {days}-day window"))
        };
        let window = match (from, to) {
            (Some(from), Some(to)) => Self::new(from, to),
            (Some(from), None) => Self::new(from, today.max(from)),
            (None, Some(to)) => reach_back(to)?,
            (None, None) => reach_back(today)?,
        };
        if window.from > window.to {
            return Err(format!(
                "dateFrom {} is after dateTo {}",
                window.from, window.to
            ));
        }
        Ok(window)
    }

    pub fn upstream_from(&self) -> String {
        self.from.format(UPSTREAM_DATE_FORMAT).to_string()
    }

    pub fn upstream_to(&self) -> String {
        self.to.format(UPSTREAM_DATE_FORMAT).to_string()
    }
}
