//! Column mapping inference
//!
//! Matches arbitrary CSV headers against a fixed alias table per target
//! field. Unmatched headers are left unmapped — the operator resolves
//! them by hand, the mapper never guesses ambiguously.

use crate::types::{ColumnMapping, RawRow, TargetField};

/// Outcome of the analysis phase. The suggestion is a starting point
/// only; import never starts from it without operator confirmation.
#[derive(Debug, Clone)]
pub struct MappingAnalysis {
    pub headers: Vec<String>,
    pub suggested: ColumnMapping,
    pub rows: Vec<RawRow>,
}

/// Lowercase, strip accents and punctuation. "Proprietário" and
/// "proprietario" normalize to the same key.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .chars()
        .filter_map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => Some('a'),
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => Some('e'),
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => Some('i'),
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => Some('o'),
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => Some('u'),
            'ç' | 'Ç' => Some('c'),
            'ñ' | 'Ñ' => Some('n'),
            c if c.is_alphanumeric() => Some(c.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}

/// Known header aliases, normalized form. First match wins; headers
/// matching nothing stay unmapped.
fn alias_target(normalized: &str) -> Option<TargetField> {
    let field = match normalized {
        "nome" | "name" | "propriedade" | "nomepropriedade" | "fazenda" | "sitio" => {
            TargetField::Name
        }
        "latitude" | "lat" => TargetField::Latitude,
        "longitude" | "lng" | "lon" | "long" => TargetField::Longitude,
        "coordenadas" | "coordenada" | "coord" | "coords" | "coordinates" | "latlng" => {
            TargetField::CoordinatesCombined
        }
        "cidade" | "city" | "municipio" => TargetField::Cidade,
        "bairro" | "localidade" | "distrito" => TargetField::Bairro,
        "proprietario" | "dono" | "owner" | "ownername" | "nomeproprietario" => {
            TargetField::OwnerName
        }
        "telefone" | "telefoneproprietario" | "fone" | "celular" | "phone" => {
            TargetField::OwnerPhone
        }
        "rg" | "rgproprietario" | "documento" => TargetField::OwnerRg,
        "equipe" | "team" => TargetField::Equipe,
        "placa" | "numeroplaca" | "nplaca" => TargetField::NumeroPlaca,
        "descricao" | "description" => TargetField::Description,
        "contato" | "nomecontato" | "contactname" => TargetField::ContactName,
        "telefonecontato" | "fonecontato" | "contactphone" => TargetField::ContactPhone,
        "obscontato" | "observacoescontato" => TargetField::ContactObservations,
        "observacoes" | "observacao" | "obs" | "notes" => TargetField::Observations,
        "atividade" | "activity" | "atividadeprincipal" => TargetField::Activity,
        "cameras" | "temcameras" | "possuicameras" | "hascameras" => TargetField::HasCameras,
        "qtdcameras" | "quantidadecameras" | "numerocameras" => TargetField::CamerasCount,
        "wifi" | "temwifi" | "possuiwifi" | "haswifi" => TargetField::HasWifi,
        "senhawifi" | "wifipassword" => TargetField::WifiPassword,
        "moradores" | "qtdmoradores" | "residentes" | "numeromoradores" => {
            TargetField::ResidentsCount
        }
        "datacadastro" | "cadastro" | "data" | "dtcadastro" => TargetField::CadastroDate,
        _ => return None,
    };
    Some(field)
}

/// Best-effort mapping suggestion from raw headers. Pure and
/// deterministic; duplicate headers keep their first suggestion.
pub fn suggest_mapping(headers: &[String]) -> ColumnMapping {
    let mut mapping = ColumnMapping::new();
    for header in headers {
        if let Some(target) = alias_target(&normalize_header(header)) {
            if mapping.target_of(header).is_none() {
                mapping.insert(header.clone(), target);
            }
        }
    }
    mapping
}

/// Parse the CSV and suggest a mapping. Structural problems never
/// abort analysis: unreadable records are dropped and the suggestion
/// degrades to whatever headers were readable.
pub fn analyze(csv_content: &str) -> MappingAnalysis {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_content.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(|s| s.trim().to_string()).collect(),
        Err(_) => Vec::new(),
    };

    let mut rows = Vec::new();
    // Header is row 1; data starts at row 2
    for (idx, record) in reader.records().enumerate() {
        if let Ok(record) = record {
            rows.push(RawRow {
                row_number: idx + 2,
                cells: record.iter().map(|s| s.to_string()).collect(),
            });
        }
    }

    MappingAnalysis {
        suggested: suggest_mapping(&headers),
        headers,
        rows,
    }
}
