use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

use super::{AttrValue, Scalar, Tree};

const DAYS_PER_YEAR: f64 = 365.25;

/// Continuous year, e.g. 2024-07-02 -> ~2024.5.
pub fn decimal_year(date: NaiveDate) -> f64 {
    date.year() as f64 + date.ordinal0() as f64 / DAYS_PER_YEAR
}

pub fn date_from_decimal_year(year: f64) -> Option<NaiveDate> {
    if !year.is_finite() {
        return None;
    }
    let whole = year.trunc();
    let days = ((year - whole) * DAYS_PER_YEAR).floor();
    let start = NaiveDate::from_ymd_opt(whole as i32, 1, 1)?;
    if days >= 0.0 {
        start.checked_add_days(Days::new(days as u64))
    } else {
        start.checked_sub_days(Days::new((-days) as u64))
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Accepts ISO dates, `YYYY/MM/DD`, `YYYY-MM`, a bare year, RFC 3339
/// timestamps and decimal years.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(stamp.with_timezone(&Utc).date_naive());
    }
    if let Some((year, month)) = trimmed.split_once('-') {
        if let (Ok(year), Ok(month)) = (year.parse::<i32>(), month.parse::<u32>()) {
            return NaiveDate::from_ymd_opt(year, month, 1);
        }
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|year| (1000.0..=3000.0).contains(year))
        .and_then(date_from_decimal_year)
}

fn value_date(value: &AttrValue) -> Option<NaiveDate> {
    match value {
        AttrValue::Scalar(Scalar::Text(text)) => parse_date(text),
        AttrValue::Scalar(Scalar::Number(year)) if (1000.0..=3000.0).contains(year) => {
            date_from_decimal_year(*year)
        }
        AttrValue::List(items) => items.iter().filter_map(value_date).max(),
        _ => None,
    }
}

/// Latest date found under any attribute whose key mentions `date` or `year`.
pub fn infer_reference_date(tree: &Tree) -> Option<NaiveDate> {
    tree.nodes
        .iter()
        .flat_map(|node| node.traits.iter())
        .filter(|(key, _)| {
            let lower = key.to_lowercase();
            lower.contains("date") || lower.contains("year")
        })
        .filter_map(|(_, value)| value_date(value))
        .max()
}

/// User date, else the inferred latest date, else today.
pub fn resolve_reference_date(user: Option<NaiveDate>, tree: &Tree) -> NaiveDate {
    user.or_else(|| infer_reference_date(tree))
        .unwrap_or_else(|| Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;

    #[test]
    fn decimal_year_conversions() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(decimal_year(date), 2024.0);
        assert_eq!(date_from_decimal_year(2019.0), NaiveDate::from_ymd_opt(2019, 1, 1));
        let mid = date_from_decimal_year(2020.5).unwrap();
        assert_eq!(mid.year(), 2020);
        assert_eq!(mid.month(), 7);
    }

    #[test]
    fn parses_supported_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4);
        assert_eq!(parse_date("2021-03-04"), expected);
        assert_eq!(parse_date("2021/03/04"), expected);
        assert_eq!(parse_date("2021-03-04T10:00:00Z"), expected);
        assert_eq!(parse_date("2021-03"), NaiveDate::from_ymd_opt(2021, 3, 1));
        assert_eq!(parse_date("2021"), NaiveDate::from_ymd_opt(2021, 1, 1));
        assert_eq!(parse_date("hello"), None);
        assert_eq!(parse_date("12"), None);
    }

    #[test]
    fn infers_latest_date_like_attribute() {
        let tree = Tree::from_payload(&payload(vec![
            with_trait(
                node("R", None, Some(3.0)),
                "collection_date",
                AttrValue::text("2019-05-01"),
            ),
            with_trait(
                node("A", Some("R"), Some(0.0)),
                "Sample_Year",
                AttrValue::number(2022.0),
            ),
            with_trait(
                node("B", Some("R"), Some(0.0)),
                "region",
                AttrValue::text("2030-01-01"),
            ),
        ]))
        .unwrap();
        assert_eq!(
            infer_reference_date(&tree),
            NaiveDate::from_ymd_opt(2022, 1, 1)
        );
        let user = NaiveDate::from_ymd_opt(2000, 1, 1);
        assert_eq!(resolve_reference_date(user, &tree), user.unwrap());
    }
}
