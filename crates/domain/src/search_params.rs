//! Typed search parameters for registry queries.
//!
//! Only the keys the upstream registry understands are modeled; anything
//! else is dropped during deserialization. Empty strings mean "absent" and
//! are normalized away so the stored jsonb stays clean.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchParams {
    #[serde(rename = "CourtRegion", skip_serializing_if = "Option::is_none", default)]
    pub court_region: Option<String>,
    #[serde(rename = "INSType", skip_serializing_if = "Option::is_none", default)]
    pub instance_type: Option<String>,
    #[serde(rename = "ChairmenName", skip_serializing_if = "Option::is_none", default)]
    pub chairmen_name: Option<String>,
    #[serde(
        rename = "SearchExpression",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub search_expression: Option<String>,
    #[serde(rename = "RegDateBegin", skip_serializing_if = "Option::is_none", default)]
    pub reg_date_begin: Option<String>,
    #[serde(rename = "RegDateEnd", skip_serializing_if = "Option::is_none", default)]
    pub reg_date_end: Option<String>,
    #[serde(rename = "DateFrom", skip_serializing_if = "Option::is_none", default)]
    pub date_from: Option<String>,
    #[serde(rename = "DateTo", skip_serializing_if = "Option::is_none", default)]
    pub date_to: Option<String>,
}

impl SearchParams {
    /// Parse from a free-form JSON object, discarding unrecognized keys and
    /// treating empty strings as absent.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut params: SearchParams = serde_json::from_value(value)?;
        params.normalize();
        Ok(params)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Drop empty-string values.
    pub fn normalize(&mut self) {
        fn clean(field: &mut Option<String>) {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        clean(&mut self.court_region);
        clean(&mut self.instance_type);
        clean(&mut self.chairmen_name);
        clean(&mut self.search_expression);
        clean(&mut self.reg_date_begin);
        clean(&mut self.reg_date_end);
        clean(&mut self.date_from);
        clean(&mut self.date_to);
    }

    pub fn is_empty(&self) -> bool {
        self.court_region.is_none()
            && self.instance_type.is_none()
            && self.chairmen_name.is_none()
            && self.search_expression.is_none()
            && self.reg_date_begin.is_none()
            && self.reg_date_end.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    /// All date-valued fields, for edge validation.
    pub fn date_fields(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("RegDateBegin", self.reg_date_begin.as_deref()),
            ("RegDateEnd", self.reg_date_end.as_deref()),
            ("DateFrom", self.date_from.as_deref()),
            ("DateTo", self.date_to.as_deref()),
        ]
    }
}

/// Parse a registry date in `DD.MM.YYYY` form. `/` and `-` separators are
/// tolerated, two-digit years land in the 2000s.
pub fn parse_registry_date(date_str: &str) -> Option<NaiveDate> {
    let normalized = date_str.replace(['/', '-'], ".");
    let parts: Vec<&str> = normalized.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let day: u32 = parts[0].trim().parse().ok()?;
    let month: u32 = parts[1].trim().parse().ok()?;
    let mut year: i32 = parts[2].trim().parse().ok()?;
    if year < 100 {
        year += 2000;
    }

    NaiveDate::from_ymd_opt(year, month, day)
}
