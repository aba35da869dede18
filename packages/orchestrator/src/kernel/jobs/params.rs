//! Date tokens in scheduled job parameters.
//!
//! `TODAY` resolves to the fire date, `TODAY+N` / `TODAY-N` to the fire date
//! shifted by N days, all as `YYYY-MM-DD`. Anything else passes through verbatim.

use chrono::{Days, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

use super::job::JobParameters;

lazy_static! {
    static ref TODAY_TOKEN: Regex = Regex::new(r"^TODAY(?:([+-])([0-9]+))?$").expect("valid regex");
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Resolve a single parameter template against `today`.
pub fn resolve(template: &str, today: NaiveDate) -> String {
    let Some(caps) = TODAY_TOKEN.captures(template) else {
        return template.to_string();
    };

    let date = match (caps.get(1), caps.get(2)) {
        (Some(sign), Some(digits)) => {
            // Offsets too large for a calendar date are left as literals
            let Ok(days) = digits.as_str().parse::<u64>() else {
                return template.to_string();
            };
            let shifted = if sign.as_str() == "+" {
                today.checked_add_days(Days::new(days))
            } else {
                today.checked_sub_days(Days::new(days))
            };
            match shifted {
                Some(date) => date,
                None => return template.to_string(),
            }
        }
        _ => today,
    };

    date.format(DATE_FORMAT).to_string()
}

/// Resolve every value of a parameter template map independently.
pub fn resolve_all(templates: &JobParameters, today: NaiveDate) -> JobParameters {
    templates
        .iter()
        .map(|(key, value)| (key.clone(), resolve(value, today)))
        .collect()
}
