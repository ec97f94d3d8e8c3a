//! CSV import types: column mapping, row errors, sessions and the
//! JetStream job wire types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// RAW INPUT
// =============================================================================

/// One raw CSV data row: the original string cells plus the 1-based row
/// number within the source file (header is row 1, data starts at 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    pub row_number: usize,
    pub cells: Vec<String>,
}

// =============================================================================
// COLUMN MAPPING
// =============================================================================

/// Fixed target schema for the property import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    Name,
    Latitude,
    Longitude,
    CoordinatesCombined,
    Cidade,
    Bairro,
    OwnerName,
    OwnerPhone,
    OwnerRg,
    Equipe,
    NumeroPlaca,
    Description,
    ContactName,
    ContactPhone,
    ContactObservations,
    Observations,
    Activity,
    HasCameras,
    CamerasCount,
    HasWifi,
    WifiPassword,
    ResidentsCount,
    CadastroDate,
}

impl TargetField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::Name => "name",
            TargetField::Latitude => "latitude",
            TargetField::Longitude => "longitude",
            TargetField::CoordinatesCombined => "coordinates_combined",
            TargetField::Cidade => "cidade",
            TargetField::Bairro => "bairro",
            TargetField::OwnerName => "owner_name",
            TargetField::OwnerPhone => "owner_phone",
            TargetField::OwnerRg => "owner_rg",
            TargetField::Equipe => "equipe",
            TargetField::NumeroPlaca => "numero_placa",
            TargetField::Description => "description",
            TargetField::ContactName => "contact_name",
            TargetField::ContactPhone => "contact_phone",
            TargetField::ContactObservations => "contact_observations",
            TargetField::Observations => "observations",
            TargetField::Activity => "activity",
            TargetField::HasCameras => "has_cameras",
            TargetField::CamerasCount => "cameras_count",
            TargetField::HasWifi => "has_wifi",
            TargetField::WifiPassword => "wifi_password",
            TargetField::ResidentsCount => "residents_count",
            TargetField::CadastroDate => "cadastro_date",
        }
    }

    /// Parse a target field identifier as it appears on the wire.
    pub fn from_id(id: &str) -> Option<TargetField> {
        ALL_TARGET_FIELDS.iter().copied().find(|f| f.as_str() == id)
    }
}

pub const ALL_TARGET_FIELDS: &[TargetField] = &[
    TargetField::Name,
    TargetField::Latitude,
    TargetField::Longitude,
    TargetField::CoordinatesCombined,
    TargetField::Cidade,
    TargetField::Bairro,
    TargetField::OwnerName,
    TargetField::OwnerPhone,
    TargetField::OwnerRg,
    TargetField::Equipe,
    TargetField::NumeroPlaca,
    TargetField::Description,
    TargetField::ContactName,
    TargetField::ContactPhone,
    TargetField::ContactObservations,
    TargetField::Observations,
    TargetField::Activity,
    TargetField::HasCameras,
    TargetField::CamerasCount,
    TargetField::HasWifi,
    TargetField::WifiPassword,
    TargetField::ResidentsCount,
    TargetField::CadastroDate,
];

/// One editable mapping row as the front end sends it: a source header
/// paired with a target field id, or "" for "do not import".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub source: String,
    pub target: String,
}

/// Source header → target field correspondence, finalized before import
/// starts and immutable for the rest of the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    entries: BTreeMap<String, TargetField>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the wire representation. Unknown target ids are an
    /// error; empty targets mean the column is not imported.
    pub fn from_entries(entries: &[MappingEntry]) -> Result<Self, String> {
        let mut mapping = ColumnMapping::new();
        for entry in entries {
            if entry.target.is_empty() {
                continue;
            }
            let field = TargetField::from_id(&entry.target)
                .ok_or_else(|| format!("Campo de destino desconhecido: {}", entry.target))?;
            mapping.insert(entry.source.clone(), field);
        }
        Ok(mapping)
    }

    pub fn insert(&mut self, source: String, target: TargetField) {
        self.entries.insert(source, target);
    }

    pub fn target_of(&self, source: &str) -> Option<TargetField> {
        self.entries.get(source).copied()
    }

    /// First source header mapped to the given target, if any.
    pub fn source_for(&self, target: TargetField) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, t)| **t == target)
            .map(|(s, _)| s.as_str())
    }

    pub fn has_target(&self, target: TargetField) -> bool {
        self.entries.values().any(|t| *t == target)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TargetField)> {
        self.entries.iter()
    }

    pub fn to_entries(&self) -> Vec<MappingEntry> {
        self.entries
            .iter()
            .map(|(source, target)| MappingEntry {
                source: source.clone(),
                target: target.as_str().to_string(),
            })
            .collect()
    }

    /// Mapping-validation complaints. Import must not start while this
    /// is non-empty: `name`, `cidade` and `owner_name` must be mapped,
    /// and coordinates must arrive either split or combined.
    pub fn validate(&self) -> Vec<String> {
        let mut complaints = Vec::new();
        for required in [TargetField::Name, TargetField::Cidade, TargetField::OwnerName] {
            if !self.has_target(required) {
                complaints.push(format!(
                    "Campo obrigatório sem coluna mapeada: {}",
                    required.as_str()
                ));
            }
        }
        let has_split =
            self.has_target(TargetField::Latitude) && self.has_target(TargetField::Longitude);
        let has_combined = self.has_target(TargetField::CoordinatesCombined);
        if !has_split && !has_combined {
            complaints.push(
                "Coordenadas não mapeadas: mapeie latitude e longitude, ou coordinates_combined"
                    .to_string(),
            );
        }
        complaints
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

// =============================================================================
// ROW ERRORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowErrorType {
    MissingFields,
    InvalidCoordinates,
    DatabaseError,
    CriticalError,
    Duplicate,
}

impl RowErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowErrorType::MissingFields => "MISSING_FIELDS",
            RowErrorType::InvalidCoordinates => "INVALID_COORDINATES",
            RowErrorType::DatabaseError => "DATABASE_ERROR",
            RowErrorType::CriticalError => "CRITICAL_ERROR",
            RowErrorType::Duplicate => "DUPLICATE",
        }
    }
}

/// Per-row failure record. Carries the raw cells and the partial mapped
/// field set so the operator can debug without re-opening the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_number: usize,
    /// Best effort — empty when the name column itself was unreadable.
    pub property_name: String,
    pub error_type: RowErrorType,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    pub raw_data: String,
    pub mapped_data: BTreeMap<String, String>,
}

impl RowError {
    pub fn new(
        row_number: usize,
        property_name: impl Into<String>,
        error_type: RowErrorType,
        error_message: impl Into<String>,
        raw_data: impl Into<String>,
        mapped_data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            row_number,
            property_name: property_name.into(),
            error_type,
            error_message: error_message.into(),
            timestamp: Utc::now(),
            raw_data: raw_data.into(),
            mapped_data,
        }
    }
}

// =============================================================================
// BATCHES AND RUN OPTIONS
// =============================================================================

/// Contiguous, non-overlapping slice of the full row set. Indices are
/// 0-based positions into the row vector; batch numbers are 1-based.
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub batch_number: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Skip rows classified as duplicates instead of persisting them.
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    /// Override the adaptive batch size (mostly for tests).
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Override the inter-batch delay in milliseconds (0 in tests).
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    /// Organizational scope used to serialize concurrent runs.
    #[serde(default)]
    pub battalion: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_existing: true,
            batch_size: None,
            batch_delay_ms: None,
            battalion: None,
        }
    }
}

// =============================================================================
// IMPORT SESSIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
    Undone,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Undone => "undone",
        }
    }

    pub fn from_str(s: &str) -> Option<SessionStatus> {
        match s {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "undone" => Some(SessionStatus::Undone),
            _ => None,
        }
    }
}

/// Audit/undo boundary for one CSV import run. The session is the only
/// place that knows which properties came from which file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub total_properties: i32,
    pub success_count: i32,
    pub error_count: i32,
    pub skipped_count: i32,
    pub status: SessionStatus,
}

// =============================================================================
// RUN PROGRESS AND SUMMARY
// =============================================================================

/// Progress event emitted at least once per settled batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub message: String,
    pub batch_number: usize,
    pub total_batches: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub progress_rows: usize,
    pub total_rows: usize,
}

/// Final accounting for a run. `successful + failed + skipped` always
/// equals `total_rows`; on a cancelled run the rows never dispatched
/// count as skipped and the message names them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub session_id: Uuid,
    pub total_rows: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub status: SessionStatus,
    pub message: String,
    pub errors: Vec<RowError>,
}

// =============================================================================
// JOB WIRE TYPES
// =============================================================================

/// Payload of `patrulha.import.analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportAnalyzeRequest {
    pub filename: String,
    pub csv_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportAnalyzeResponse {
    pub headers: Vec<String>,
    pub suggested_mapping: Vec<MappingEntry>,
    pub total_rows: usize,
}

/// Payload of `patrulha.import.submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobRequest {
    pub filename: String,
    pub csv_content: String,
    pub mapping: Vec<MappingEntry>,
    #[serde(default)]
    pub options: ImportOptions,
}

/// Job as stored in the JetStream work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedImportJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub request: ImportJobRequest,
}

impl QueuedImportJob {
    pub fn new(user_id: Uuid, session_id: Uuid, request: ImportJobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            submitted_at: Utc::now(),
            request,
        }
    }
}

/// Status updates published on `patrulha.job.import.status.<job_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ImportJobStatus {
    Queued {
        position: u32,
    },
    Parsing {
        progress: u32,
    },
    #[serde(rename_all = "camelCase")]
    Importing {
        message: String,
        batch_number: usize,
        total_batches: usize,
        successful: usize,
        failed: usize,
        skipped: usize,
        progress_rows: usize,
        total_rows: usize,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        message: String,
        session_id: Uuid,
        total_rows: usize,
        successful: usize,
        failed: usize,
        skipped: usize,
        cancelled: bool,
        duration_ms: u64,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub status: ImportJobStatus,
}

impl ImportJobStatusUpdate {
    pub fn new(job_id: Uuid, status: ImportJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobSubmitResponse {
    pub job_id: Uuid,
    pub session_id: Uuid,
    pub total_rows: usize,
    pub total_batches: usize,
    pub message: String,
}

/// Payload of `patrulha.import.cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelImportRequest {
    pub job_id: Uuid,
}

/// Payload of `patrulha.import.undo`. `confirm=false` returns the
/// destructive-action preview only; `confirm=true` performs the undo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoSessionRequest {
    pub session_id: Uuid,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoPreview {
    pub session_id: Uuid,
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
    /// Exact number of records the undo will soft-delete.
    pub active_count: usize,
    pub success_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub session_id: Uuid,
    pub undone_count: usize,
}

/// Payload of `patrulha.import.errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReportRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReportResponse {
    pub session_id: Uuid,
    pub csv_content: String,
    pub error_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_field_ids_round_trip() {
        for field in ALL_TARGET_FIELDS {
            assert_eq!(TargetField::from_id(field.as_str()), Some(*field));
        }
        assert_eq!(TargetField::from_id("nope"), None);
    }

    #[test]
    fn test_mapping_valid_with_split_coordinates() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Propriedade".into(), TargetField::Name);
        mapping.insert("Cidade".into(), TargetField::Cidade);
        mapping.insert("Proprietario".into(), TargetField::OwnerName);
        mapping.insert("Lat".into(), TargetField::Latitude);
        mapping.insert("Lng".into(), TargetField::Longitude);
        assert!(mapping.is_valid());
    }

    #[test]
    fn test_mapping_valid_with_combined_coordinates() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Propriedade".into(), TargetField::Name);
        mapping.insert("Cidade".into(), TargetField::Cidade);
        mapping.insert("Proprietario".into(), TargetField::OwnerName);
        mapping.insert("Coord".into(), TargetField::CoordinatesCombined);
        assert!(mapping.is_valid());
    }

    #[test]
    fn test_mapping_invalid_without_required_fields() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Coord".into(), TargetField::CoordinatesCombined);
        let complaints = mapping.validate();
        assert_eq!(complaints.len(), 3);
        assert!(complaints.iter().any(|c| c.contains("name")));
        assert!(complaints.iter().any(|c| c.contains("cidade")));
        assert!(complaints.iter().any(|c| c.contains("owner_name")));
    }

    #[test]
    fn test_mapping_invalid_with_only_latitude() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Propriedade".into(), TargetField::Name);
        mapping.insert("Cidade".into(), TargetField::Cidade);
        mapping.insert("Proprietario".into(), TargetField::OwnerName);
        mapping.insert("Lat".into(), TargetField::Latitude);
        let complaints = mapping.validate();
        assert_eq!(complaints.len(), 1);
        assert!(complaints[0].contains("Coordenadas"));
    }

    #[test]
    fn test_mapping_from_entries_skips_empty_targets() {
        let entries = vec![
            MappingEntry { source: "A".into(), target: "name".into() },
            MappingEntry { source: "B".into(), target: "".into() },
        ];
        let mapping = ColumnMapping::from_entries(&entries).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.target_of("A"), Some(TargetField::Name));
        assert_eq!(mapping.target_of("B"), None);
    }

    #[test]
    fn test_mapping_from_entries_rejects_unknown_target() {
        let entries = vec![MappingEntry { source: "A".into(), target: "whatever".into() }];
        assert!(ColumnMapping::from_entries(&entries).is_err());
    }

    #[test]
    fn test_row_error_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&RowErrorType::InvalidCoordinates).unwrap();
        assert_eq!(json, "\"INVALID_COORDINATES\"");
    }

    #[test]
    fn test_session_status_round_trip() {
        for status in [
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Undone,
        ] {
            assert_eq!(SessionStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_import_job_status_importing_serializes() {
        let status = ImportJobStatus::Importing {
            message: "Lote 1 de 3".to_string(),
            batch_number: 1,
            total_batches: 3,
            successful: 40,
            failed: 5,
            skipped: 5,
            progress_rows: 50,
            total_rows: 120,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"importing\""));
        assert!(json.contains("batchNumber"));
        assert!(json.contains("totalRows"));
    }

    #[test]
    fn test_import_options_default_skips_existing() {
        let options: ImportOptions = serde_json::from_str("{}").unwrap();
        assert!(options.skip_existing);
        assert!(options.batch_size.is_none());
    }
}
