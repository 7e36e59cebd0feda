//! Input validation utilities.
//!
//! Functions here turn caller-supplied text into the validated forms stored on orders,
//! rejecting bad input before any state is touched.

use crate::{OrderError, OrderResult};
use orderly_types::Icd10Code;

/// Longest free-text note or reason accepted on an order.
pub const MAX_FREE_TEXT_LEN: usize = 2_000;

/// Parses every ICD-10 code, failing on the first malformed one.
///
/// Duplicates (after normalisation) are dropped, keeping the first occurrence.
///
/// # Errors
///
/// Returns `OrderError::Validation` naming the offending code.
pub fn parse_icd10_codes<S: AsRef<str>>(codes: &[S]) -> OrderResult<Vec<Icd10Code>> {
    let mut parsed: Vec<Icd10Code> = Vec::with_capacity(codes.len());
    for code in codes {
        let code = Icd10Code::parse(code.as_ref()).map_err(|e| OrderError::Validation(e.to_string()))?;
        if !parsed.contains(&code) {
            parsed.push(code);
        }
    }
    Ok(parsed)
}

/// Trims a required free-text field such as a cancellation reason.
///
/// # Errors
///
/// Returns `OrderError::Validation` if the text is blank or longer than
/// [`MAX_FREE_TEXT_LEN`] characters.
pub fn require_text(field: &str, value: &str) -> OrderResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(OrderError::Validation(format!("{field} cannot be empty")));
    }
    check_length(field, trimmed)?;
    Ok(trimmed.to_owned())
}

/// Trims an optional free-text field, mapping blank text to `None`.
pub fn optional_text(field: &str, value: Option<&str>) -> OrderResult<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => {
            check_length(field, v)?;
            Ok(Some(v.to_owned()))
        }
        None => Ok(None),
    }
}

fn check_length(field: &str, value: &str) -> OrderResult<()> {
    if value.chars().count() > MAX_FREE_TEXT_LEN {
        return Err(OrderError::Validation(format!(
            "{field} exceeds maximum length of {MAX_FREE_TEXT_LEN} characters"
        )));
    }
    Ok(())
}
