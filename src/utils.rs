//! Utility functions for identifiers and text normalisation

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::{Error, Result};

pub const SUBMISSION_HRP: &str = "sub_";
pub const BUDGET_HRP: &str = "budget_";
pub const EVENT_HRP: &str = "event_";
pub const AUDIT_HRP: &str = "audit_";
pub const CATEGORY_HRP: &str = "cat_";
pub const SUBCATEGORY_HRP: &str = "subcat_";
pub const YEAR_HRP: &str = "year_";
pub const FILE_HRP: &str = "file_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let parsed = bech32::Hrp::parse(hrp).map_err(|e| Error::Identifier(e.to_string()))?;
    let encode = bech32::encode::<Bech32m>(parsed, uuid7().as_bytes())
        .map_err(|e| Error::Identifier(e.to_string()))?;
    Ok(encode)
}

/// Lowercases and strips all whitespace, including zero-width joiners, so
/// that display names typed with stray spacing still compare equal.
pub fn collapse_name(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}'))
        .collect()
}

/// Trims a free-text field, mapping blank input to `None`.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        let id = new_uuid_to_bech32(SUBMISSION_HRP).unwrap();
        assert!(id.starts_with("sub_1"));
    }

    #[test]
    fn empty_hrp_is_rejected() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn collapse_removes_spacing() {
        assert_eq!(collapse_name("  ทุน ส่งเสริม\u{200b}การวิจัย "), "ทุนส่งเสริมการวิจัย");
        assert_eq!(collapse_name("Research  Fund"), "researchfund");
    }

    #[test]
    fn non_blank_trims() {
        assert_eq!(non_blank(Some("  note ")), Some("note".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
