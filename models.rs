use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Token form the model falls back to when a class index has no name.
pub const SYNTHETIC_TOKEN_PREFIX: &str = "Class_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whatever the classifier emitted for one of its candidates.
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum RawLabel {
    NumericIndex(i64),
    SyntheticToken(u32),
    TextLabel(String),
}

impl RawLabel {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(n) = trimmed
            .strip_prefix(SYNTHETIC_TOKEN_PREFIX)
            .filter(|digits| is_canonical_number(digits))
            .and_then(|digits| digits.parse::<u32>().ok())
        {
            return RawLabel::SyntheticToken(n);
        }
        if is_canonical_number(trimmed) {
            if let Ok(n) = trimmed.parse::<i64>() {
                return RawLabel::NumericIndex(n);
            }
        }
        RawLabel::TextLabel(raw.to_string())
    }
}

/// Digits only, without leading zeros, so the parsed form displays as the input.
fn is_canonical_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
}

impl fmt::Display for RawLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawLabel::NumericIndex(n) => write!(f, "{n}"),
            RawLabel::SyntheticToken(n) => write!(f, "{SYNTHETIC_TOKEN_PREFIX}{n}"),
            RawLabel::TextLabel(text) => f.write_str(text),
        }
    }
}

impl FromStr for RawLabel {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RawLabel::parse(s))
    }
}

/// Classifier score in `[0, 1]`. Serialized as a two-decimal percentage.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Confidence(f64);

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        Confidence(score.clamp(0.0, 1.0))
    }

    pub fn score(self) -> f64 {
        self.0
    }

    pub fn percent(self) -> f64 {
        (self.0 * 100.0 * 100.0).round() / 100.0
    }
}

impl Serialize for Confidence {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.percent())
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let percent = f64::deserialize(deserializer)?;
        Ok(Confidence::from_score(percent / 100.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseRecord {
    pub id: i64,
    pub short_name: String,
    pub scientific_name: Option<String>,
    pub description_en: Option<String>,
    pub description_ar: Option<String>,
    pub symptoms_en: Option<String>,
    pub symptoms_ar: Option<String>,
    pub treatment_en: Option<String>,
    pub treatment_ar: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Catalog import row; `id` pins the primary key the classifier's index maps onto.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDisease {
    #[serde(default)]
    pub id: Option<i64>,
    pub short_name: String,
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub description_en: Option<String>,
    #[serde(default)]
    pub description_ar: Option<String>,
    #[serde(default)]
    pub symptoms_en: Option<String>,
    #[serde(default)]
    pub symptoms_ar: Option<String>,
    #[serde(default)]
    pub treatment_en: Option<String>,
    #[serde(default)]
    pub treatment_ar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondGuess {
    pub plant: String,
    pub condition: String,
    pub canonical_class: String,
    pub raw_label: RawLabel,
    pub confidence: Confidence,
    pub has_details: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrediction {
    pub plant: String,
    pub condition: String,
    pub canonical_class: String,
    pub raw_label: RawLabel,
    pub confidence: Confidence,
    pub second_guess: Option<SecondGuess>,
    pub has_details: bool,
}

impl ResolvedPrediction {
    /// Catalog short name when resolved, the raw label's string form otherwise.
    pub fn display_class(&self) -> &str {
        &self.canonical_class
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub user_id: UserId,
    pub image_reference: String,
    pub plant: String,
    pub condition: String,
    pub predicted_class: String,
    pub raw_label: RawLabel,
    pub confidence: Confidence,
    pub has_details: bool,
    pub second_guess: Option<String>,
    pub second_confidence: Option<Confidence>,
    pub created_at: DateTime<Utc>,
    pub disease_id: Option<i64>,
    pub scientific_name: Option<String>,
    pub description_en: Option<String>,
    pub description_ar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    /// No user on the request; anonymous predictions are never stored.
    Anonymous,
    Recorded { history_id: HistoryId },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub prediction: ResolvedPrediction,
    pub disease: Option<DiseaseRecord>,
    pub history: PersistenceOutcome,
    pub is_guest: bool,
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}
