//! Two-stage document classification.
//!
//! Search parameters are authoritative for the query that produced the
//! document, so they win; otherwise the court name is matched against a
//! fixed dictionary of region stems and instance keywords.

use crate::entities::ClassificationSource;
use crate::search_params::SearchParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Region stems matched case-insensitively against the court name, mapped
/// to the registry's two-digit region codes. Order matters: the first
/// matching stem wins.
const REGION_STEMS: &[(&str, &str)] = &[
    ("київ", "11"),
    ("львів", "14"),
    ("одес", "15"),
    ("харків", "19"),
    ("дніпро", "12"),
    ("запоріжж", "13"),
    ("вінниц", "05"),
    ("луцьк", "07"),
    ("донецьк", "14"),
    ("житомир", "18"),
    ("ужгород", "21"),
    ("івано-франківськ", "06"),
    ("кропивницьк", "09"),
    ("полтав", "17"),
    ("рівне", "18"),
    ("суми", "20"),
    ("тернопіль", "22"),
    ("херсон", "23"),
    ("хмельницьк", "24"),
    ("черкас", "25"),
    ("чернівці", "26"),
    ("чернігів", "27"),
];

const APPEAL_STEMS: &[&str] = &["апеляційн", "апел"];
const CASSATION_STEMS: &[&str] = &["касаційн", "касац"];
const FIRST_INSTANCE_STEMS: &[&str] = &["районн", "міськ", "окружн"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub court_region: Option<String>,
    pub instance_type: Option<String>,
    pub source: Option<ClassificationSource>,
}

impl Classification {
    /// Both fields determined; only then is the document classified.
    pub fn is_complete(&self) -> bool {
        self.court_region.is_some() && self.instance_type.is_some()
    }

    pub fn classification_date(&self) -> Option<DateTime<Utc>> {
        if self.is_complete() {
            Some(Utc::now())
        } else {
            None
        }
    }
}

/// Classify a document from its search parameters and extracted court name.
/// The source records which stage contributed first.
pub fn classify(court_name: Option<&str>, search_params: Option<&SearchParams>) -> Classification {
    let mut classification = Classification::default();

    if let Some(params) = search_params {
        if let Some(region) = params.court_region.as_deref() {
            classification.court_region = Some(region.to_string());
            classification.source = Some(ClassificationSource::SearchParams);
        }
        if let Some(instance) = params.instance_type.as_deref() {
            classification.instance_type = Some(instance.to_string());
            classification
                .source
                .get_or_insert(ClassificationSource::SearchParams);
        }
    }

    if let Some(name) = court_name {
        let lowered = name.to_lowercase();

        if classification.court_region.is_none() {
            for (stem, code) in REGION_STEMS {
                if lowered.contains(stem) {
                    classification.court_region = Some((*code).to_string());
                    classification
                        .source
                        .get_or_insert(ClassificationSource::Extracted);
                    break;
                }
            }
        }

        if classification.instance_type.is_none() {
            // Appeal stems are checked before cassation stems; a name
            // carrying both classifies as an appeal court.
            let instance = if APPEAL_STEMS.iter().any(|s| lowered.contains(s)) {
                Some("2")
            } else if CASSATION_STEMS.iter().any(|s| lowered.contains(s)) {
                Some("3")
            } else if FIRST_INSTANCE_STEMS.iter().any(|s| lowered.contains(s)) {
                Some("1")
            } else {
                None
            };

            if let Some(instance) = instance {
                classification.instance_type = Some(instance.to_string());
                classification
                    .source
                    .get_or_insert(ClassificationSource::Extracted);
            }
        }
    }

    classification
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_params_win_over_court_name() {
        let params = SearchParams {
            court_region: Some("11".to_string()),
            instance_type: Some("1".to_string()),
            ..Default::default()
        };
        let result = classify(Some("Київський районний суд"), Some(&params));

        assert!(result.is_complete());
        assert_eq!(result.court_region.as_deref(), Some("11"));
        assert_eq!(result.instance_type.as_deref(), Some("1"));
        assert_eq!(result.source, Some(ClassificationSource::SearchParams));
    }

    #[test]
    fn extraction_from_appeal_court_name() {
        let result = classify(Some("Львівський апеляційний суд"), None);

        assert!(result.is_complete());
        assert_eq!(result.court_region.as_deref(), Some("14"));
        assert_eq!(result.instance_type.as_deref(), Some("2"));
        assert_eq!(result.source, Some(ClassificationSource::Extracted));
    }

    #[test]
    fn cassation_is_third_instance() {
        let result = classify(Some("Касаційний цивільний суд у місті Харків"), None);
        assert_eq!(result.instance_type.as_deref(), Some("3"));
        assert_eq!(result.court_region.as_deref(), Some("19"));
    }

    #[test]
    fn appeal_stem_wins_over_cassation_stem() {
        let result = classify(
            Some("Апеляційна палата Касаційного цивільного суду"),
            None,
        );
        assert_eq!(result.instance_type.as_deref(), Some("2"));
    }

    #[test]
    fn district_city_circuit_are_first_instance() {
        for name in [
            "Полтавський районний суд",
            "Сумський міський суд",
            "Херсонський окружний адміністративний суд",
        ] {
            let result = classify(Some(name), None);
            assert_eq!(result.instance_type.as_deref(), Some("1"), "name: {name}");
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        let result = classify(Some("ЛЬВІВСЬКИЙ АПЕЛЯЦІЙНИЙ СУД"), None);
        assert_eq!(result.court_region.as_deref(), Some("14"));
        assert_eq!(result.instance_type.as_deref(), Some("2"));
    }

    #[test]
    fn unknown_court_is_unclassified() {
        let result = classify(Some("Верховний Суд"), None);
        assert!(!result.is_complete());
        assert!(result.court_region.is_none());
        assert!(result.instance_type.is_none());
        assert!(result.source.is_none());
        assert!(result.classification_date().is_none());
    }

    #[test]
    fn partial_extraction_is_incomplete() {
        // Region matches, instance does not.
        let result = classify(Some("Чернігівський апарат юстиції"), None);
        assert_eq!(result.court_region.as_deref(), Some("27"));
        assert!(result.instance_type.is_none());
        assert!(!result.is_complete());
        // Source still records the stage that contributed.
        assert_eq!(result.source, Some(ClassificationSource::Extracted));
    }

    #[test]
    fn mixed_sources_report_first_contributor() {
        let params = SearchParams {
            court_region: Some("25".to_string()),
            ..Default::default()
        };
        let result = classify(Some("Черкаський апеляційний суд"), Some(&params));

        assert!(result.is_complete());
        assert_eq!(result.court_region.as_deref(), Some("25"));
        assert_eq!(result.instance_type.as_deref(), Some("2"));
        assert_eq!(result.source, Some(ClassificationSource::SearchParams));
    }

    #[test]
    fn no_inputs_no_classification() {
        let result = classify(None, None);
        assert!(!result.is_complete());
        assert!(result.source.is_none());
    }
}
