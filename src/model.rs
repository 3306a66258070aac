use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::schema::Region;

pub const INBOUND_PATTERN: &str = "consultar_nfe";
pub const SUCCESS_PATTERN: &str = "gerar_cupom";
pub const FAILURE_PATTERN: &str = "error_consultar_nfe";

/// Lookup request as it arrives on the consumer queue. `user` and `cpf` are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub chave: String,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub cpf: Value,
}

/// Raw region texts, positional and uninterpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPageExtract {
    regions: BTreeMap<Region, Vec<String>>,
}

impl RawPageExtract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: Region, texts: Vec<String>) {
        self.regions.insert(region, texts);
    }

    pub fn with(mut self, region: Region, texts: &[&str]) -> Self {
        self.insert(region, texts.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Entries of a region in document order; empty when the region was absent.
    pub fn get(&self, region: Region) -> &[String] {
        self.regions.get(&region).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, region: Region) -> Option<&str> {
        self.get(region).first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLineItem {
    #[serde(rename = "nm_produto")]
    pub name: String,
    #[serde(rename = "cod_produtos")]
    pub code: String,
    #[serde(rename = "qnt_produtos", with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(rename = "unidade_medida_produtos")]
    pub unit: String,
    #[serde(rename = "vl_produtos", with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
}

/// Field values recovered from a page, before derived fields are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFields {
    pub merchant_name: String,
    pub merchant_lines: Vec<String>,
    pub tax_id: String,
    pub item_count: u32,
    pub total_amount: Decimal,
    pub access_key: String,
    pub emitted_on: NaiveDate,
    pub items: Vec<ParsedLineItem>,
}

/// Assembled receipt. Field names on the wire follow what the coupon service
/// already consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "razao_social")]
    pub merchant_name: String,
    #[serde(rename = "dados_empresa")]
    pub merchant_lines: Vec<String>,
    #[serde(rename = "cnpj")]
    pub tax_id: String,
    #[serde(rename = "total_itens")]
    pub item_count: u32,
    #[serde(rename = "valor_total", with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    #[serde(rename = "chave_nota_fiscal")]
    pub access_key: String,
    #[serde(rename = "quantidade_cupons")]
    pub coupon_count: u32,
    #[serde(rename = "data_emissao", with = "iso_date")]
    pub emitted_on: NaiveDate,
    #[serde(rename = "produtos")]
    pub items: Vec<ParsedLineItem>,
}

/// `YYYY-MM-DD` on the output record only.
pub mod iso_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessMessage<'a> {
    pub pattern: &'static str,
    pub user: &'a Value,
    pub cpf: &'a Value,
    #[serde(rename = "notaFiscal")]
    pub receipt: &'a Receipt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMessage {
    pub pattern: String,
    pub user: Value,
    pub cpf: Value,
    pub chave: Value,
    pub error: String,
    pub message: String,
}
