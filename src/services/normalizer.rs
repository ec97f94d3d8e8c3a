//! Row normalization
//!
//! Turns one raw CSV row plus a finalized column mapping into a
//! `NormalizedProperty`, or a `RowError` carrying the raw cells and the
//! partial field map for diagnostics. Never panics on bad input.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::types::{ColumnMapping, NormalizedProperty, RawRow, RowError, RowErrorType, TargetField};

/// Affirmative vocabulary for boolean columns. Everything else is false.
const AFFIRMATIVE: &[&str] = &["sim", "yes", "true", "1"];

pub fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    AFFIRMATIVE.contains(&v.as_str())
}

/// Optional counts never fail the row: unparseable or negative values
/// fall back to 0.
pub fn parse_count(value: &str) -> i32 {
    value.trim().parse::<i32>().unwrap_or(0).max(0)
}

/// Accept ISO (YYYY-MM-DD) or day-first (DD/MM/YYYY, DD-MM-YYYY).
/// Returns None on anything else; the caller substitutes the run date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    NaiveDate::parse_from_str(v, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(v, "%d/%m/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(v, "%d-%m-%Y"))
        .ok()
}

/// Split a combined coordinate cell ("-25.4,-49.2") on comma, semicolon
/// or whitespace into exactly two numeric tokens.
fn split_combined(value: &str) -> Result<(f64, f64), String> {
    let tokens: Vec<&str> = value
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() != 2 {
        return Err(format!(
            "esperados 2 valores de coordenada, encontrados {}",
            tokens.len()
        ));
    }
    let lat = tokens[0]
        .parse::<f64>()
        .map_err(|_| format!("latitude não numérica: {}", tokens[0]))?;
    let lng = tokens[1]
        .parse::<f64>()
        .map_err(|_| format!("longitude não numérica: {}", tokens[1]))?;
    Ok((lat, lng))
}

fn in_range(lat: f64, lng: f64) -> Result<(), String> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude fora do intervalo [-90, 90]: {lat}"));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(format!("longitude fora do intervalo [-180, 180]: {lng}"));
    }
    Ok(())
}

/// Resolves mapped cells by header position.
struct CellLookup<'a> {
    row: &'a RawRow,
    headers: &'a [String],
    mapping: &'a ColumnMapping,
}

impl<'a> CellLookup<'a> {
    /// Trimmed cell for a target field, empty string when the column is
    /// unmapped, out of range or blank.
    fn get(&self, target: TargetField) -> String {
        let Some(source) = self.mapping.source_for(target) else {
            return String::new();
        };
        let Some(index) = self.headers.iter().position(|h| h == source) else {
            return String::new();
        };
        self.row
            .cells
            .get(index)
            .map(|c| c.trim().to_string())
            .unwrap_or_default()
    }

    fn optional(&self, target: TargetField) -> Option<String> {
        let value = self.get(target);
        if value.is_empty() { None } else { Some(value) }
    }
}

/// Normalize one row. `today` is captured once per run so defaulted
/// cadastro dates agree across the whole import.
pub fn normalize(
    row: &RawRow,
    mapping: &ColumnMapping,
    headers: &[String],
    today: NaiveDate,
) -> Result<NormalizedProperty, RowError> {
    let lookup = CellLookup { row, headers, mapping };

    let name = lookup.get(TargetField::Name);
    let cidade = lookup.get(TargetField::Cidade);
    let owner_name = lookup.get(TargetField::OwnerName);

    let mut mapped_data: BTreeMap<String, String> = BTreeMap::new();
    for (source, target) in mapping.iter() {
        if let Some(index) = headers.iter().position(|h| h == source) {
            if let Some(cell) = row.cells.get(index) {
                mapped_data.insert(target.as_str().to_string(), cell.trim().to_string());
            }
        }
    }
    let raw_data = row.cells.join(",");

    let row_error = |error_type: RowErrorType, message: String| {
        RowError::new(
            row.row_number,
            name.clone(),
            error_type,
            message,
            raw_data.clone(),
            mapped_data.clone(),
        )
    };

    // Coordinates: combined column wins when both forms are mapped
    let coords = if mapping.has_target(TargetField::CoordinatesCombined) {
        split_combined(&lookup.get(TargetField::CoordinatesCombined))
    } else {
        let lat_raw = lookup.get(TargetField::Latitude);
        let lng_raw = lookup.get(TargetField::Longitude);
        let lat = lat_raw
            .parse::<f64>()
            .map_err(|_| format!("latitude não numérica: {lat_raw}"));
        let lng = lng_raw
            .parse::<f64>()
            .map_err(|_| format!("longitude não numérica: {lng_raw}"));
        match (lat, lng) {
            (Ok(lat), Ok(lng)) => Ok((lat, lng)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    };
    let (latitude, longitude) = match coords {
        Ok(pair) => pair,
        Err(message) => return Err(row_error(RowErrorType::InvalidCoordinates, message)),
    };
    if let Err(message) = in_range(latitude, longitude) {
        return Err(row_error(RowErrorType::InvalidCoordinates, message));
    }

    // Required-field check runs after coercion
    let mut missing = Vec::new();
    if name.is_empty() {
        missing.push("name");
    }
    if cidade.is_empty() {
        missing.push("cidade");
    }
    if owner_name.is_empty() {
        missing.push("owner_name");
    }
    if !missing.is_empty() {
        return Err(row_error(
            RowErrorType::MissingFields,
            format!("Campos obrigatórios ausentes: {}", missing.join(", ")),
        ));
    }

    let cadastro_date = parse_date(&lookup.get(TargetField::CadastroDate)).unwrap_or(today);

    Ok(NormalizedProperty {
        name,
        cidade,
        owner_name,
        latitude,
        longitude,
        bairro: lookup.optional(TargetField::Bairro),
        owner_phone: lookup.optional(TargetField::OwnerPhone),
        owner_rg: lookup.optional(TargetField::OwnerRg),
        equipe: lookup.optional(TargetField::Equipe),
        numero_placa: lookup.optional(TargetField::NumeroPlaca),
        description: lookup.optional(TargetField::Description),
        contact_name: lookup.optional(TargetField::ContactName),
        contact_phone: lookup.optional(TargetField::ContactPhone),
        contact_observations: lookup.optional(TargetField::ContactObservations),
        observations: lookup.optional(TargetField::Observations),
        activity: lookup.optional(TargetField::Activity),
        has_cameras: parse_bool(&lookup.get(TargetField::HasCameras)),
        cameras_count: parse_count(&lookup.get(TargetField::CamerasCount)),
        has_wifi: parse_bool(&lookup.get(TargetField::HasWifi)),
        wifi_password: lookup.optional(TargetField::WifiPassword),
        residents_count: parse_count(&lookup.get(TargetField::ResidentsCount)),
        cadastro_date,
    })
}
