//! Human readable document numbers and currency helpers.

use chrono::{DateTime, Utc};
use rand::RngCore;

fn random_suffix(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buffer);
    hex::encode_upper(buffer)
}

/// `CON-YYYYMMDD-XXXXXXXX`
pub fn contract_number(now: DateTime<Utc>) -> String {
    format!("CON-{}-{}", now.format("%Y%m%d"), random_suffix(4))
}

/// `INV-YYYYMMDDHHMMSS-XXXXXX`
pub fn invoice_number(now: DateTime<Utc>) -> String {
    format!("INV-{}-{}", now.format("%Y%m%d%H%M%S"), random_suffix(3))
}

/// Number of minor-unit digits for an ISO currency code.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "OMR" | "KWD" | "BHD" | "JOD" | "TND" => 3,
        "JPY" | "KRW" => 0,
        _ => 2,
    }
}

/// Convert a major-unit amount to the integer the gateway expects.
pub fn to_minor_units(amount: f64, currency: &str) -> i64 {
    let factor = 10_f64.powi(currency_exponent(currency) as i32);
    (amount * factor).round() as i64
}

pub fn from_minor_units(amount: i64, currency: &str) -> f64 {
    let factor = 10_f64.powi(currency_exponent(currency) as i32);
    amount as f64 / factor
}

/// Round to three decimals, the precision used for stored money.
pub fn round_money(amount: f64) -> f64 {
    (amount * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn document_numbers_have_the_expected_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let contract = contract_number(now);
        assert!(contract.starts_with("CON-20240309-"));
        assert_eq!(contract.len(), "CON-20240309-".len() + 8);

        let invoice = invoice_number(now);
        assert!(invoice.starts_with("INV-20240309140507-"));
        let suffix = invoice.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        assert_ne!(contract_number(now), contract_number(now));
    }

    #[test]
    fn minor_units_follow_currency_exponent() {
        assert_eq!(to_minor_units(12.345, "OMR"), 12_345);
        assert_eq!(to_minor_units(12.34, "usd"), 1_234);
        assert_eq!(to_minor_units(1500.0, "JPY"), 1_500);
        assert_eq!(to_minor_units(0.1 + 0.2, "EUR"), 30);
        assert_eq!(from_minor_units(12_345, "KWD"), 12.345);
    }

    #[test]
    fn money_rounds_to_three_decimals() {
        assert_eq!(round_money(100.0 * 0.05), 5.0);
        assert_eq!(round_money(33.3333), 33.333);
    }
}
