//! Record shapes shared by every layer of the pipeline.
//!
//! Raw rows stay textual; cleaned rows are typed and carry the derived
//! `average_monthly_income`. Surrogate keys are UUID v5 values computed from
//! natural keys, so the same input always yields the same IDs.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use uuid::Uuid;

/// Namespace for all surrogate keys minted by this crate.
pub const KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6c3f_2a8e_51d4_4b0f_9a7e_c2d1_0b5e_8f31);

/// One row of the raw store, exactly as ingested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based insertion position in the raw store; assigned on append.
    #[serde(default)]
    pub row_number: u64,
    #[serde(default, deserialize_with = "lenient_text")]
    pub source_file: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub area_km2: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub population_density: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub total_nominal_income: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub occupied_population: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub sex: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub race_or_color: String,
}

/// Raw fields are opaque text; JSON numbers are kept as their literal text
/// and `null` as empty text.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => number_text(&n),
        Some(other) => other.to_string(),
    })
}

/// Plain decimal text for a JSON number: integers verbatim, floats through
/// `f64`'s `Display`, which never uses an exponent and drops a `.0` fraction.
fn number_text(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string())
    }
}

/// A typed row of the cleaned layer, one per (geography, sex, race_or_color).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub geography_id: Uuid,
    pub geography_code: String,
    pub source_file: String,
    pub area_km2: Option<f64>,
    pub population_density: Option<f64>,
    pub total_nominal_income: f64,
    pub occupied_population: Option<i64>,
    pub average_monthly_income: Option<f64>,
    pub sex: String,
    pub race_or_color: String,
}

impl CleanedRecord {
    /// Composite key that must be unique across the cleaned layer.
    pub fn key(&self) -> CompositeKey<'_> {
        CompositeKey {
            geography_code: &self.geography_code,
            sex: &self.sex,
            race_or_color: &self.race_or_color,
        }
    }

    /// Recomputes `average_monthly_income` from the current totals.
    pub fn rederive_average(&mut self) {
        self.average_monthly_income =
            average_monthly_income(self.total_nominal_income, self.occupied_population);
    }
}

/// Borrowed `(geography, sex, race_or_color)` key. Ordering follows the
/// canonical storage order of the cleaned layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey<'a> {
    pub geography_code: &'a str,
    pub sex: &'a str,
    pub race_or_color: &'a str,
}

/// `total / occupied` when `occupied > 0`, otherwise `None`.
pub fn average_monthly_income(total: f64, occupied: Option<i64>) -> Option<f64> {
    match occupied {
        Some(n) if n > 0 => safe_divide(total, n as f64),
        _ => None,
    }
}

/// Division that yields `None` for a zero denominator or a non-finite result.
pub fn safe_divide(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}

/// Natural geography identifier: file stem of the source path.
///
/// `"dados/3550308_sao_paulo.csv"` becomes `"3550308_sao_paulo"`. Both `/`
/// and `\` are treated as directory separators.
pub fn geography_code(source_file: &str) -> String {
    let trimmed = source_file.trim();
    let name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name.to_string(),
    }
}

pub fn geography_id(geography_code: &str) -> Uuid {
    Uuid::new_v5(&KEY_NAMESPACE, format!("geography|{geography_code}").as_bytes())
}

/// Surrogate key of a `(sex, race_or_color)` pair. Each part is length
/// prefixed so separators inside the values cannot make two pairs collide.
pub fn category_id(sex: &str, race_or_color: &str) -> Uuid {
    let name = format!(
        "category|{}:{sex}|{}:{race_or_color}",
        sex.len(),
        race_or_color.len()
    );
    Uuid::new_v5(&KEY_NAMESPACE, name.as_bytes())
}
