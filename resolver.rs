//! Maps classifier labels onto catalog identities and splits catalog short names
//! into a (plant, condition) pair.
//!
//! Label precedence:
//! 1. `Class_<n>` looks up catalog id `n + SYNTHETIC_CLASS_ID_OFFSET`.
//! 2. A bare number `k` looks up catalog id `k`.
//! 3. Anything else is a case-insensitive short_name lookup.
//!
//! A miss (or a catalog failure) is not an error: the prediction carries
//! `has_details = false` and keeps the raw label's string form as its class.

use crate::catalog::DiseaseCatalog;
use crate::classifier::Candidate;
use crate::models::{Confidence, DiseaseRecord, RawLabel, ResolvedPrediction, SecondGuess};

/// The model's class indices are zero-based while catalog ids start at 1.
pub const SYNTHETIC_CLASS_ID_OFFSET: i64 = 1;

/// Condition used when a short name is nothing but a plant name.
pub const HEALTHY_CONDITION: &str = "healthy";

/// Checked in order; first case-insensitive prefix match wins.
pub const KNOWN_PLANTS: &[&str] = &[
    "Apple",
    "Blueberry",
    "Cherry (including sour)",
    "Cherry",
    "Corn (maize)",
    "Corn",
    "Grape",
    "Orange",
    "Peach",
    "Pepper, bell",
    "Potato",
    "Raspberry",
    "Soybean",
    "Squash",
    "Strawberry",
    "Tomato",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogKey {
    Id(i64),
    ShortName(String),
}

pub fn catalog_key(label: &RawLabel) -> CatalogKey {
    match label {
        RawLabel::SyntheticToken(n) => CatalogKey::Id(i64::from(*n) + SYNTHETIC_CLASS_ID_OFFSET),
        RawLabel::NumericIndex(k) => CatalogKey::Id(*k),
        RawLabel::TextLabel(text) => CatalogKey::ShortName(text.trim().to_string()),
    }
}

/// Looks the label up; storage failures are logged and treated as a miss.
pub fn lookup(catalog: &dyn DiseaseCatalog, label: &RawLabel) -> Option<DiseaseRecord> {
    let key = catalog_key(label);
    let found = match &key {
        CatalogKey::Id(id) => catalog.find_by_id(*id),
        CatalogKey::ShortName(name) => catalog.find_by_short_name(name),
    };
    match found {
        Ok(record) => record,
        Err(err) => {
            log::warn!("Catalog lookup for {label} ({key:?}) failed: {err}");
            None
        }
    }
}

pub fn split_plant_and_condition(name: &str) -> (String, String) {
    let name = name.trim();
    if matches!(RawLabel::parse(name), RawLabel::SyntheticToken(_)) {
        return (name.to_string(), String::new());
    }
    let name = normalize_separators(name);
    for plant in KNOWN_PLANTS {
        let Some(head) = name.get(..plant.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(plant) {
            continue;
        }
        let condition = name[plant.len()..].trim();
        if condition.is_empty() {
            return (head.to_string(), HEALTHY_CONDITION.to_string());
        }
        return (head.to_string(), condition.to_string());
    }

    if let Some((plant, rest)) = name.split_once(' ') {
        return (plant.to_string(), rest.to_string());
    }
    (name, String::new())
}

/// Model vocabularies write `Apple___Apple_scab`; catalog rows write `Apple scab`.
fn normalize_separators(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

struct Resolved {
    record: Option<DiseaseRecord>,
    plant: String,
    condition: String,
    canonical_class: String,
}

fn resolve_label(catalog: &dyn DiseaseCatalog, label: &RawLabel) -> Resolved {
    let record = lookup(catalog, label);
    let canonical_class = match &record {
        Some(record) => record.short_name.clone(),
        None => label.to_string(),
    };
    let (plant, condition) = split_plant_and_condition(&canonical_class);
    Resolved {
        record,
        plant,
        condition,
        canonical_class,
    }
}

/// Resolves the primary candidate and, independently, the runner-up.
/// Returns the prediction and the primary's catalog row, if any.
pub fn resolve(
    catalog: &dyn DiseaseCatalog,
    primary: &Candidate,
    second: Option<&Candidate>,
) -> (ResolvedPrediction, Option<DiseaseRecord>) {
    let resolved = resolve_label(catalog, &primary.label);
    if resolved.record.is_none() {
        log::info!(
            "Catalog miss for predicted class {}; returning without details",
            primary.label
        );
    }

    let second_guess = second.map(|candidate| {
        let guess = resolve_label(catalog, &candidate.label);
        SecondGuess {
            plant: guess.plant,
            condition: guess.condition,
            canonical_class: guess.canonical_class,
            raw_label: candidate.label.clone(),
            confidence: Confidence::from_score(f64::from(candidate.score)),
            has_details: guess.record.is_some(),
        }
    });

    let prediction = ResolvedPrediction {
        plant: resolved.plant,
        condition: resolved.condition,
        canonical_class: resolved.canonical_class,
        raw_label: primary.label.clone(),
        confidence: Confidence::from_score(f64::from(primary.score)),
        second_guess,
        has_details: resolved.record.is_some(),
    };
    (prediction, resolved.record)
}
