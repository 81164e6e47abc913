//! R package snapshot date selection.

use chrono::{Datelike, NaiveDate};
use descriptor::{RepoContext, VariantSettings};
use tracing::{debug, warn};

pub const RUNTIME_FILE: &str = "runtime.txt";

/// Last day of the calendar quarter preceding the one containing `today`.
pub fn previous_quarter_end(today: NaiveDate) -> NaiveDate {
    let quarter_start_month = (today.month0() / 3) * 3 + 1;
    let quarter_start = NaiveDate::from_ymd_opt(today.year(), quarter_start_month, 1)
        .unwrap_or(today);
    quarter_start.pred_opt().unwrap_or(quarter_start)
}

/// Parse `r-YYYY-MM-DD` from the first meaningful line of `runtime.txt`.
pub fn parse_runtime(text: &str) -> Option<NaiveDate> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let date = line.strip_prefix("r-")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Finalize hook for R-derived variants.
pub fn finalize_r_snapshot(ctx: &RepoContext, today: NaiveDate, settings: &mut VariantSettings) {
    if settings.r_snapshot_date.is_some() {
        return;
    }

    let pinned = match ctx.read_file(RUNTIME_FILE) {
        Ok(Some(text)) => {
            let parsed = parse_runtime(&text);
            if parsed.is_none() {
                warn!(file = %ctx.binder_path(RUNTIME_FILE), "Ignoring unrecognised runtime pin");
            }
            parsed
        }
        Ok(None) => None,
        Err(err) => {
            warn!(error = %err, "Failed to read runtime pin");
            None
        }
    };

    let date = pinned.unwrap_or_else(|| previous_quarter_end(today));
    debug!(%date, pinned = pinned.is_some(), "Fixed R snapshot date");
    settings.r_snapshot_date = Some(date);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn quarter_end_rolls_back_a_quarter() {
        assert_eq!(previous_quarter_end(date(2026, 10, 19)), date(2026, 9, 30));
        assert_eq!(previous_quarter_end(date(2026, 6, 30)), date(2026, 3, 31));
        assert_eq!(previous_quarter_end(date(2026, 4, 1)), date(2026, 3, 31));
        assert_eq!(previous_quarter_end(date(2026, 2, 14)), date(2025, 12, 31));
    }

    #[test]
    fn runtime_pin_parses_r_dates_only() {
        assert_eq!(parse_runtime("r-2020-05-01\n"), Some(date(2020, 5, 1)));
        assert_eq!(parse_runtime("\n  r-2019-12-31  \n"), Some(date(2019, 12, 31)));
        assert_eq!(parse_runtime("python-3.7"), None);
        assert_eq!(parse_runtime("r-2020-13-01"), None);
    }

    #[test]
    fn runtime_pin_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RUNTIME_FILE), "r-2018-02-05\n").unwrap();
        let ctx = RepoContext::with_descriptor(dir.path(), "/support", None);

        let mut settings = VariantSettings::default();
        finalize_r_snapshot(&ctx, date(2026, 10, 19), &mut settings);
        assert_eq!(settings.r_snapshot_date, Some(date(2018, 2, 5)));
    }

    #[test]
    fn missing_pin_falls_back_to_quarter_end() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RepoContext::with_descriptor(dir.path(), "/support", None);

        let mut settings = VariantSettings::default();
        finalize_r_snapshot(&ctx, date(2026, 10, 19), &mut settings);
        assert_eq!(settings.r_snapshot_date, Some(date(2026, 9, 30)));
    }
}
