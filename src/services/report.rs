//! Error report and template CSV generation

use anyhow::{Context, Result};

use crate::types::RowError;

const REPORT_HEADERS: &[&str] = &[
    "Linha_CSV",
    "Nome_Propriedade",
    "Tipo_Erro",
    "Mensagem_Erro",
    "Dados_CSV_Brutos",
    "Campos_Processados",
    "Timestamp",
];

/// One report row per RowError, quoting handled by the csv writer.
pub fn error_report_csv(errors: &[RowError]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(REPORT_HEADERS)
        .context("falha ao escrever cabeçalho do relatório")?;
    for error in errors {
        let mapped = error
            .mapped_data
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        writer
            .write_record(&[
                error.row_number.to_string(),
                error.property_name.clone(),
                error.error_type.as_str().to_string(),
                error.error_message.clone(),
                error.raw_data.clone(),
                mapped,
                error.timestamp.to_rfc3339(),
            ])
            .context("falha ao escrever linha do relatório")?;
    }
    let bytes = writer
        .into_inner()
        .context("falha ao finalizar relatório")?;
    String::from_utf8(bytes).context("relatório não é UTF-8")
}

/// Static, illustrative import template. Not validated on the way in.
pub fn template_csv() -> String {
    concat!(
        "Propriedade,Cidade,Bairro,Proprietario,Telefone,Coordenadas,",
        "Equipe,Atividade,Tem Cameras,Qtd Cameras,Tem Wifi,Moradores,Data Cadastro\n",
        "Fazenda Exemplo,Curitiba,Zona Rural,João da Silva,(41) 99999-0000,",
        "\"-25.4284,-49.2733\",Alfa,Pecuária,Sim,4,Sim,5,15/01/2026\n",
        "Sítio Modelo,Londrina,Distrito Norte,Maria Souza,(43) 98888-1111,",
        "\"-23.3045,-51.1696\",Bravo,Agricultura,Não,0,Não,3,2026-02-20\n",
    )
    .to_string()
}
