// Normalization of the raw SNGPC "Manipulados" rows.
// The published files use upper case headers, comma as decimal separator and
// padded text fields.

use log::warn;
use serde::{Deserialize, Serialize};

/// One row of the published CSV, all fields as text.
///
/// Headers are matched by their published name (`ANO_VENDA`) or by the canonical
/// lower case name (`ano_venda`), so a table that has already been cleaned can be
/// read back.  Missing columns and empty fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "ANO_VENDA", alias = "ano_venda")]
    pub ano_venda: Option<String>,
    #[serde(rename = "MES_VENDA", alias = "mes_venda")]
    pub mes_venda: Option<String>,
    #[serde(rename = "UF_VENDA", alias = "uf_venda")]
    pub uf_venda: Option<String>,
    #[serde(rename = "MUNICIPIO_VENDA", alias = "municipio_venda")]
    pub municipio_venda: Option<String>,
    #[serde(rename = "DCB", alias = "dcb")]
    pub dcb: Option<String>,
    #[serde(rename = "PRINCIPIO_ATIVO", alias = "principio_ativo")]
    pub principio_ativo: Option<String>,
    #[serde(
        rename = "QTD_ATIVO_POR_UNID_FARMACOTEC",
        alias = "qtd_ativo_por_unid_farmacotec"
    )]
    pub qtd_ativo_por_unid_farmacotec: Option<String>,
    #[serde(
        rename = "UNIDADE_MEDIDA_PRINCIPIO_ATIVO",
        alias = "unidade_medida_principio_ativo"
    )]
    pub unidade_medida_principio_ativo: Option<String>,
    #[serde(
        rename = "QTD_UNIDADE_FARMACOTECNICA",
        alias = "qtd_unidade_farmacotecnica"
    )]
    pub qtd_unidade_farmacotecnica: Option<String>,
    #[serde(
        rename = "TIPO_UNIDADE_FARMACOTECNICA",
        alias = "tipo_unidade_farmacotecnica"
    )]
    pub tipo_unidade_farmacotecnica: Option<String>,
    #[serde(rename = "CONSELHO_PRESCRITOR", alias = "conselho_prescritor")]
    pub conselho_prescritor: Option<String>,
    #[serde(rename = "UF_CONSELHO_PRESCRITOR", alias = "uf_conselho_prescritor")]
    pub uf_conselho_prescritor: Option<String>,
    #[serde(rename = "TIPO_RECEITUARIO", alias = "tipo_receituario")]
    pub tipo_receituario: Option<String>,
    #[serde(rename = "CID10", alias = "cid10")]
    pub cid10: Option<String>,
    #[serde(rename = "SEXO", alias = "sexo")]
    pub sexo: Option<String>,
    #[serde(rename = "IDADE", alias = "idade")]
    pub idade: Option<String>,
    #[serde(rename = "UNIDADE_IDADE", alias = "unidade_idade")]
    pub unidade_idade: Option<String>,
}

/// A typed row, ready for insertion in `vendas_manipulados`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanRecord {
    pub ano_venda: Option<i64>,
    pub mes_venda: Option<i64>,
    pub uf_venda: Option<String>,
    pub municipio_venda: Option<String>,
    pub dcb: Option<String>,
    pub principio_ativo: Option<String>,
    pub qtd_ativo_por_unid_farmacotec: Option<f64>,
    pub unidade_medida_principio_ativo: Option<String>,
    pub qtd_unidade_farmacotecnica: Option<f64>,
    pub tipo_unidade_farmacotecnica: Option<String>,
    pub conselho_prescritor: Option<String>,
    pub uf_conselho_prescritor: Option<String>,
    pub tipo_receituario: Option<String>,
    pub cid10: Option<String>,
    pub sexo: Option<i64>,
    pub idade: Option<i64>,
    pub unidade_idade: Option<i64>,
}

/// Counts values dropped while parsing decimals because they carry both a `.` and
/// a `,`.  Those could be thousands separators and are not guessed.
#[derive(Debug, Default)]
struct Ambiguities(usize);

/// Clean the raw rows.  Never fails: anything that can't be coerced becomes `None`.
pub fn normalize(rows: &[RawRecord]) -> Vec<CleanRecord> {
    let mut ambiguities = Ambiguities::default();
    let out: Vec<CleanRecord> = rows
        .iter()
        .map(|row| normalize_row(row, &mut ambiguities))
        .collect();
    if ambiguities.0 > 0 {
        warn!(
            "{} decimal values contain both '.' and ',' (thousands separator?), set to null",
            ambiguities.0
        );
    }
    out
}

fn normalize_row(row: &RawRecord, ambiguities: &mut Ambiguities) -> CleanRecord {
    CleanRecord {
        ano_venda: to_integer(&row.ano_venda),
        mes_venda: to_integer(&row.mes_venda),
        uf_venda: to_text(&row.uf_venda),
        municipio_venda: to_text(&row.municipio_venda),
        dcb: to_text(&row.dcb),
        principio_ativo: to_text(&row.principio_ativo),
        qtd_ativo_por_unid_farmacotec: to_decimal(
            &row.qtd_ativo_por_unid_farmacotec,
            ambiguities,
        ),
        unidade_medida_principio_ativo: to_text(&row.unidade_medida_principio_ativo),
        qtd_unidade_farmacotecnica: to_decimal(&row.qtd_unidade_farmacotecnica, ambiguities),
        tipo_unidade_farmacotecnica: to_text(&row.tipo_unidade_farmacotecnica),
        conselho_prescritor: to_text(&row.conselho_prescritor),
        uf_conselho_prescritor: to_text(&row.uf_conselho_prescritor),
        tipo_receituario: to_text(&row.tipo_receituario),
        cid10: to_text(&row.cid10),
        sexo: to_integer(&row.sexo),
        idade: to_integer(&row.idade),
        unidade_idade: to_integer(&row.unidade_idade),
    }
}

fn to_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accepts `"35"` and `"35.0"`, rejects `"35.5"` and anything non numeric.
fn to_integer(value: &Option<String>) -> Option<i64> {
    let s = value.as_deref()?.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Some(v as i64)
        }
        _ => None,
    }
}

fn to_decimal(value: &Option<String>, ambiguities: &mut Ambiguities) -> Option<f64> {
    let s = value.as_deref()?.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains('.') && s.contains(',') {
        ambiguities.0 += 1;
        return None;
    }
    s.replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}
