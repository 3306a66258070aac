use crate::model::{ParsedFields, Receipt};
use rust_decimal::prelude::ToPrimitive;

/// Purchase value, in reais, that earns one coupon.
pub const COUPON_UNIT: f64 = 30.0;

pub fn assemble(fields: ParsedFields) -> Receipt {
    let coupon_count = coupon_count(fields.total_amount.to_f64().unwrap_or(f64::NAN));
    Receipt {
        merchant_name: fields.merchant_name,
        merchant_lines: fields.merchant_lines,
        tax_id: fields.tax_id,
        item_count: fields.item_count,
        total_amount: fields.total_amount,
        access_key: normalize_key(&fields.access_key),
        coupon_count,
        emitted_on: fields.emitted_on,
        items: fields.items,
    }
}

/// Whole coupons earned for `amount`. Anything that is not a finite,
/// non-negative quotient earns none.
pub fn coupon_count(amount: f64) -> u32 {
    let quotient = amount / COUPON_UNIT;
    if !quotient.is_finite() || quotient <= 0.0 {
        return 0;
    }
    quotient.floor().to_u32().unwrap_or(u32::MAX)
}

pub fn normalize_key(key: &str) -> String {
    key.chars().filter(|c| !c.is_whitespace()).collect()
}
