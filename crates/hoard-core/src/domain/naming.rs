//! TableFormat - 論理名から物理テーブル名への変換
//!
//! `format` に `{name}` を 1 つだけ含め、そこに `Entity::NAME` を埋め込む。
//! 例: `"lobby_{name}"` + `"player_data"` → `lobby_player_data`
//!
//! 古い設定ファイルの `%s` も `{name}` の別名として受け付ける（`"lobby_%s"`）。
//!
//! 同じ DB に複数のストアを prefix 違いで同居させるための仕組み。
//! 解決後の名前は SQL に直接埋め込まれるので、識別子として安全な文字だけを許可する。

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const PLACEHOLDER: &str = "{name}";
const LEGACY_PLACEHOLDER: &str = "%s";
const MAX_IDENTIFIER_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("table format '{0}' must contain exactly one {{name}} placeholder")]
    Placeholder(String),

    #[error("resolved table name '{0}' is not a valid identifier")]
    InvalidIdentifier(String),
}

/// Caller-supplied pattern for physical table names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableFormat(String);

impl TableFormat {
    /// Parses a format string, checking the placeholder count.
    ///
    /// `%s` is accepted in place of `{name}` and normalized to it.
    pub fn new(format: impl Into<String>) -> Result<Self, NamingError> {
        let format = format.into();
        let placeholders =
            format.matches(PLACEHOLDER).count() + format.matches(LEGACY_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(NamingError::Placeholder(format));
        }
        Ok(Self(format.replacen(LEGACY_PLACEHOLDER, PLACEHOLDER, 1)))
    }

    /// The identity format (`{name}`).
    pub fn identity() -> Self {
        Self(PLACEHOLDER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves `logical_name` to the physical table name.
    pub fn resolve(&self, logical_name: &str) -> Result<String, NamingError> {
        let table = self.0.replacen(PLACEHOLDER, logical_name, 1);
        validate_identifier(&table)?;
        Ok(table)
    }
}

impl Default for TableFormat {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for TableFormat {
    type Error = NamingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableFormat> for String {
    fn from(value: TableFormat) -> Self {
        value.0
    }
}

fn validate_identifier(name: &str) -> Result<(), NamingError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(NamingError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("{name}", "player_data", "player_data")]
    #[case("lobby_{name}", "player_data", "lobby_player_data")]
    #[case("{name}_v2", "bans", "bans_v2")]
    #[case("s1_{name}_data", "homes", "s1_homes_data")]
    fn resolves_logical_name(#[case] format: &str, #[case] logical: &str, #[case] expected: &str) {
        let format = TableFormat::new(format).unwrap();
        assert_eq!(format.resolve(logical).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("players")]
    #[case("{name}_{name}")]
    #[case("%s_%s")]
    #[case("{name}_%s")]
    fn rejects_bad_placeholder_count(#[case] format: &str) {
        assert!(matches!(
            TableFormat::new(format),
            Err(NamingError::Placeholder(_))
        ));
    }

    #[rstest]
    #[case("{name}", "")]
    #[case("{name}", "9lives")]
    #[case("{name}; DROP TABLE x", "t")]
    #[case("my-{name}", "t")]
    #[case("{name}", "name with space")]
    fn rejects_unsafe_identifiers(#[case] format: &str, #[case] logical: &str) {
        let format = TableFormat::new(format).unwrap();
        assert!(matches!(
            format.resolve(logical),
            Err(NamingError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn rejects_overlong_identifier() {
        let logical = "x".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(TableFormat::identity().resolve(&logical).is_err());
    }

    #[rstest]
    #[case("%s", "{name}", "homes")]
    #[case("lobby_%s", "lobby_{name}", "lobby_homes")]
    fn accepts_percent_s_alias(#[case] format: &str, #[case] normalized: &str, #[case] table: &str) {
        let format = TableFormat::new(format).unwrap();
        assert_eq!(format.as_str(), normalized);
        assert_eq!(format.resolve("homes").unwrap(), table);
    }

    #[test]
    fn default_is_identity() {
        assert_eq!(TableFormat::default().resolve("profile").unwrap(), "profile");
    }

    #[test]
    fn deserializes_with_validation() {
        let ok: TableFormat = serde_json::from_str("\"pre_{name}\"").unwrap();
        assert_eq!(ok.as_str(), "pre_{name}");
        assert!(serde_json::from_str::<TableFormat>("\"no_placeholder\"").is_err());
    }
}
