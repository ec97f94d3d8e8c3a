//! Property record types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geographic coordinates (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Canonical, fully validated property record produced by the row
/// normalizer. Construction goes through the normalizer only — required
/// fields are non-empty and coordinates are in range by the time one of
/// these exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedProperty {
    pub name: String,
    pub cidade: String,
    pub owner_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub bairro: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_rg: Option<String>,
    pub equipe: Option<String>,
    pub numero_placa: Option<String>,
    pub description: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_observations: Option<String>,
    pub observations: Option<String>,
    pub activity: Option<String>,
    pub has_cameras: bool,
    pub cameras_count: i32,
    pub has_wifi: bool,
    pub wifi_password: Option<String>,
    pub residents_count: i32,
    pub cadastro_date: NaiveDate,
}

impl NormalizedProperty {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

/// A property about to be persisted, tagged with its import provenance.
#[derive(Debug, Clone)]
pub struct NewProperty {
    pub record: NormalizedProperty,
    pub session_id: Uuid,
    pub created_by: Uuid,
}

/// Lightweight view of an existing active property, used by the
/// duplicate detector.
#[derive(Debug, Clone)]
pub struct PropertyRef {
    pub id: Uuid,
    pub name: String,
    pub coordinates: Coordinates,
}
