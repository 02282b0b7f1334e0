//! Relative-date tokens inside source templates.
//!
//! Tokens are resolved when a job fires, never at configuration time. Only the
//! highest-priority token kind present in a template is substituted; a template
//! carrying several kinds keeps the lower-priority ones verbatim.

use chrono::{Days, Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Until this time of day `_TODAY_` still means the previous calendar date.
const TODAY_CUTOVER: (u32, u32) = (0, 11);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateToken {
    Yesterday,
    YesterdayDashed,
    Today,
    TodayDashed,
}

impl DateToken {
    /// Substitution order; the first kind found wins.
    pub const PRIORITY: [DateToken; 4] = [
        DateToken::Yesterday,
        DateToken::YesterdayDashed,
        DateToken::Today,
        DateToken::TodayDashed,
    ];

    pub fn literal(self) -> &'static str {
        match self {
            DateToken::Yesterday => "_YESTERDAY_",
            DateToken::YesterdayDashed => "_YES-TER-DAY_",
            DateToken::Today => "_TODAY_",
            DateToken::TodayDashed => "_TO-DAY_",
        }
    }

    fn date_format(self) -> &'static str {
        match self {
            DateToken::Yesterday | DateToken::Today => "%Y%m%d",
            DateToken::YesterdayDashed | DateToken::TodayDashed => "%Y-%m-%d",
        }
    }

    /// Dashed twin synthesized at configuration time, if any.
    pub fn dashed_variant(self) -> Option<DateToken> {
        match self {
            DateToken::Today => Some(DateToken::TodayDashed),
            DateToken::Yesterday => Some(DateToken::YesterdayDashed),
            _ => None,
        }
    }

    /// Highest-priority token kind present in `template`.
    pub fn find(template: &str) -> Option<DateToken> {
        DateToken::PRIORITY.into_iter().find(|t| template.contains(t.literal()))
    }

    fn date_at(self, now: NaiveDateTime) -> NaiveDate {
        let date = now.date();
        let previous = date.checked_sub_days(Days::new(1)).unwrap_or(date);
        match self {
            DateToken::Yesterday | DateToken::YesterdayDashed => previous,
            DateToken::Today | DateToken::TodayDashed => {
                let cutover = NaiveTime::from_hms_opt(TODAY_CUTOVER.0, TODAY_CUTOVER.1, 0)
                    .unwrap_or(NaiveTime::MIN);
                if now.time() < cutover { previous } else { date }
            }
        }
    }
}

/// Resolve the template against an explicit wall-clock reading.
pub fn resolve_at(template: &str, now: NaiveDateTime) -> String {
    match DateToken::find(template) {
        Some(token) => template.replace(
            token.literal(),
            &token.date_at(now).format(token.date_format()).to_string(),
        ),
        None => template.to_string(),
    }
}

/// Resolve the template against the local clock.
pub fn resolve(template: &str) -> String {
    resolve_at(template, Local::now().naive_local())
}

/// Configuration-time duplication: every entry containing `_TODAY_` (or
/// `_YESTERDAY_`) gets a twin using the dashed token, appended after all
/// original entries. Only the original entries are scanned.
pub fn expand_date_variants<T: Clone>(
    entries: Vec<(String, T)>,
) -> Vec<(String, T)> {
    let mut extra = Vec::new();
    for (template, value) in &entries {
        for token in [DateToken::Today, DateToken::Yesterday] {
            if !template.contains(token.literal()) {
                continue;
            }
            if let Some(dashed) = token.dashed_variant() {
                extra.push((template.replace(token.literal(), dashed.literal()), value.clone()));
            }
        }
    }
    let mut expanded = entries;
    expanded.extend(extra);
    expanded
}
