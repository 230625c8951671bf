//! Engine configuration loaded from environment variables.
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_RESEARCH_FUND_KEYWORD: &str = "ทุนส่งเสริมการวิจัย";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of the sled database
    pub db_path: PathBuf,
    /// Root directory for uploaded attachments
    pub upload_path: PathBuf,
    /// Category ids treated as the research fund regardless of their name
    pub research_fund_category_ids: Vec<String>,
    /// Display-name keyword for legacy research-fund categories
    pub research_fund_keyword: String,
    /// Whether submitted applications go to the department head first
    pub require_dept_head_review: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./fund_ledger.db"),
            upload_path: PathBuf::from("./uploads"),
            research_fund_category_ids: vec![],
            research_fund_keyword: DEFAULT_RESEARCH_FUND_KEYWORD.to_string(),
            require_dept_head_review: true,
        }
    }
}

impl Config {
    /// Applies a `.env` file when present, then reads the environment.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(Error::Config(format!("failed to read .env: {e}")));
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Config {
            db_path: var("FUND_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            upload_path: var("UPLOAD_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_path),
            research_fund_category_ids: var("RESEARCH_FUND_CATEGORY_IDS")
                .map(|ids| {
                    ids.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            research_fund_keyword: var("RESEARCH_FUND_KEYWORD")
                .unwrap_or(defaults.research_fund_keyword),
            require_dept_head_review: match var("REQUIRE_DEPT_HEAD_REVIEW") {
                Some(value) => parse_bool(&value).ok_or_else(|| {
                    Error::Config(format!("Invalid REQUIRE_DEPT_HEAD_REVIEW: {value}"))
                })?,
                None => defaults.require_dept_head_review,
            },
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("./fund_ledger.db"));
        assert_eq!(config.research_fund_keyword, DEFAULT_RESEARCH_FUND_KEYWORD);
        assert!(config.require_dept_head_review);
        assert!(config.research_fund_category_ids.is_empty());
    }

    #[test]
    fn category_ids_are_split_and_trimmed() {
        let config =
            Config::from_lookup(lookup(&[("RESEARCH_FUND_CATEGORY_IDS", " cat_a, ,cat_b ")])).unwrap();
        assert_eq!(config.research_fund_category_ids, vec!["cat_a", "cat_b"]);
    }

    #[test]
    fn invalid_flag_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("REQUIRE_DEPT_HEAD_REVIEW", "maybe")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = Config::from_lookup(lookup(&[("REQUIRE_DEPT_HEAD_REVIEW", "off")])).unwrap();
        assert!(!config.require_dept_head_review);
    }
}
