//! Turns raw region texts into typed receipt fields.
//!
//! Nothing here does I/O. Every rule depends on the exact text layout of the
//! consultation page, described in [`crate::schema`].
use crate::error::ParseError;
use crate::model::{ParsedFields, ParsedLineItem, RawPageExtract};
use crate::schema::{ItemField, Region, TOTAL_AMOUNT_LABEL};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

static DATE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").unwrap());

pub fn parse(raw: &RawPageExtract) -> Result<ParsedFields, ParseError> {
    let merchant = raw.get(Region::Merchant);
    if merchant.is_empty() {
        return Err(ParseError::MissingRegion(Region::Merchant));
    }
    let access_key = raw.get(Region::AccessKey);
    if access_key.is_empty() {
        return Err(ParseError::MissingRegion(Region::AccessKey));
    }
    let emission = raw
        .first(Region::EmissionInfo)
        .ok_or(ParseError::MissingRegion(Region::EmissionInfo))?;

    Ok(ParsedFields {
        merchant_name: merchant.join(","),
        merchant_lines: raw.get(Region::Identity).to_vec(),
        tax_id: tax_id(raw.get(Region::Identity))?,
        item_count: item_count(raw.first(Region::Totals))?,
        total_amount: total_amount(raw.first(Region::TotalRow))?,
        access_key: access_key.join(""),
        emitted_on: emission_date(emission)?,
        items: line_items(raw)?,
    })
}

/// Second token of the identity block once its lines are flattened with
/// commas turned into spaces (`"CNPJ: 12.345.678/0001-90 ..."`).
pub fn tax_id(identity: &[String]) -> Result<String, ParseError> {
    let flat = identity.join(",").replace(',', " ");
    let Some(token) = flat.split_whitespace().nth(1) else {
        return Err(ParseError::MissingTaxId(flat.clone()));
    };
    Ok(token.to_string())
}

pub fn item_count(first: Option<&str>) -> Result<u32, ParseError> {
    let raw = first.ok_or(ParseError::MissingRegion(Region::Totals))?;
    raw.trim()
        .parse()
        .map_err(|_| ParseError::InvalidItemCount(raw.to_string()))
}

pub fn total_amount(first: Option<&str>) -> Result<Decimal, ParseError> {
    let raw = first.ok_or(ParseError::MissingRegion(Region::TotalRow))?;
    let value = raw.replacen(TOTAL_AMOUNT_LABEL, "", 1);
    parse_br_decimal(&value).ok_or_else(|| ParseError::InvalidAmount(raw.to_string()))
}

/// Numbers as the page prints them: `.` groups thousands, `,` marks decimals.
pub fn parse_br_decimal(raw: &str) -> Option<Decimal> {
    let normalized = raw.trim().replace('.', "").replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    Decimal::from_str(&normalized).ok()
}

/// Multiples of `n` strictly below `limit`, starting at `n`.
pub fn multiples_below(n: usize, limit: usize) -> impl Iterator<Item = usize> {
    (1..)
        .map(move |i| n * i)
        .take_while(move |m| n > 0 && *m < limit)
}

/// Each product name is rendered twice; keep the first entry and then every
/// second one from index 2 on.
pub fn item_names(raw: &[String]) -> Vec<String> {
    let Some(first) = raw.first() else {
        return Vec::new();
    };
    let mut names = vec![first.clone()];
    names.extend(multiples_below(2, raw.len()).map(|i| raw[i].clone()));
    names
}

/// Value after `field`'s label in every entry of its region.
pub fn labelled_values(raw: &[String], field: ItemField) -> Result<Vec<String>, ParseError> {
    raw.iter()
        .enumerate()
        .map(|(index, entry)| -> Result<String, ParseError> {
            let (_, rest) =
                entry
                    .split_once(field.label())
                    .ok_or_else(|| ParseError::MissingLabel {
                        field,
                        index,
                        raw: entry.clone(),
                    })?;
            let rest = match field {
                ItemField::Code => rest.trim().trim_end_matches(')'),
                _ => rest,
            };
            Ok(rest.trim().to_string())
        })
        .collect()
}

fn numeric_values(raw: &[String], field: ItemField) -> Result<Vec<Decimal>, ParseError> {
    labelled_values(raw, field)?
        .into_iter()
        .enumerate()
        .map(|(index, v)| {
            parse_br_decimal(&v).ok_or(ParseError::InvalidNumber {
                field,
                index,
                raw: v,
            })
        })
        .collect()
}

pub fn line_items(raw: &RawPageExtract) -> Result<Vec<ParsedLineItem>, ParseError> {
    let names = item_names(raw.get(Region::ItemName));
    let codes = labelled_values(raw.get(ItemField::Code.region()), ItemField::Code)?;
    let quantities = numeric_values(raw.get(ItemField::Quantity.region()), ItemField::Quantity)?;
    let units = labelled_values(raw.get(ItemField::Unit.region()), ItemField::Unit)?;
    let prices = numeric_values(raw.get(ItemField::UnitPrice.region()), ItemField::UnitPrice)?;

    names
        .into_iter()
        .enumerate()
        .map(|(index, name)| -> Result<ParsedLineItem, ParseError> {
            let missing = |field: ItemField| ParseError::MissingItemField { field, index };
            Ok(ParsedLineItem {
                name,
                code: codes.get(index).cloned().ok_or(missing(ItemField::Code))?,
                quantity: *quantities.get(index).ok_or(missing(ItemField::Quantity))?,
                unit: units.get(index).cloned().ok_or(missing(ItemField::Unit))?,
                unit_price: *prices.get(index).ok_or(missing(ItemField::UnitPrice))?,
            })
        })
        .collect()
}

/// First whitespace token that is a real `DD/MM/YYYY` date.
pub fn emission_date(text: &str) -> Result<NaiveDate, ParseError> {
    text.split_whitespace()
        .filter(|t| DATE_TOKEN.is_match(t))
        .find_map(|t| NaiveDate::parse_from_str(t, "%d/%m/%Y").ok())
        .ok_or_else(|| ParseError::NoDateFound(text.to_string()))
}
