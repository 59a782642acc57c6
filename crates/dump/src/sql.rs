//! Syntax differences between the engines a dump can target.

use tenant_backup_core::{DatabaseConnectionInfo, Driver};

use crate::connector::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    MySql,
    Sqlite,
}

impl From<Driver> for Flavor {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::MySql => Self::MySql,
            Driver::Sqlite => Self::Sqlite,
        }
    }
}

impl Flavor {
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", name.replace('`', "``")),
            Self::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Whether a backslash inside a quoted literal escapes the next character.
    pub fn backslash_escapes(self) -> bool {
        matches!(self, Self::MySql)
    }

    /// Appends `value` to `out` as a SQL literal.
    pub fn push_literal(self, out: &mut String, value: &SqlValue) {
        match value {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Integer(v) => out.push_str(&v.to_string()),
            SqlValue::Real(v) => self.push_real(out, *v),
            SqlValue::Text(text) => self.push_text(out, text),
            SqlValue::RawText(bytes) => self.push_raw_text(out, bytes),
            SqlValue::Blob(bytes) => self.push_blob(out, bytes),
        }
    }

    fn push_real(self, out: &mut String, v: f64) {
        if v.is_finite() {
            // Debug keeps a fractional part or exponent, so the literal reads back as a real.
            out.push_str(&format!("{v:?}"));
        } else if v.is_nan() || self == Self::MySql {
            out.push_str("NULL");
        } else if v.is_sign_positive() {
            out.push_str("9e999");
        } else {
            out.push_str("-9e999");
        }
    }

    fn push_text(self, out: &mut String, text: &str) {
        match self {
            Self::MySql => {
                out.push('\'');
                for c in text.chars() {
                    match c {
                        '\0' => out.push_str("\\0"),
                        '\'' => out.push_str("\\'"),
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\u{1a}' => out.push_str("\\Z"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
            }
            Self::Sqlite if text.contains('\0') => self.push_raw_text(out, text.as_bytes()),
            Self::Sqlite => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
        }
    }

    /// Text that a quoted literal cannot carry byte for byte.
    fn push_raw_text(self, out: &mut String, bytes: &[u8]) {
        match self {
            Self::MySql => self.push_blob(out, bytes),
            Self::Sqlite => {
                out.push_str("CAST(");
                self.push_blob(out, bytes);
                out.push_str(" AS TEXT)");
            }
        }
    }

    fn push_blob(self, out: &mut String, bytes: &[u8]) {
        match self {
            Self::MySql if bytes.is_empty() => out.push_str("''"),
            Self::MySql => {
                out.push_str("0x");
                out.push_str(&hex::encode_upper(bytes));
            }
            Self::Sqlite => {
                out.push_str("X'");
                out.push_str(&hex::encode_upper(bytes));
                out.push('\'');
            }
        }
    }

    /// Session setup emitted before any table.
    pub fn preamble(self, info: &DatabaseConnectionInfo) -> Vec<String> {
        match self {
            Self::MySql => {
                let charset = session_word(&info.charset, "utf8mb4");
                let mut names = format!("SET NAMES {charset}");
                if !info.collation.is_empty() {
                    names.push_str(&format!(" COLLATE {}", session_word(&info.collation, "utf8mb4_unicode_ci")));
                }
                vec![
                    names,
                    "SET @OLD_FOREIGN_KEY_CHECKS=@@FOREIGN_KEY_CHECKS, FOREIGN_KEY_CHECKS=0".into(),
                    "SET @OLD_UNIQUE_CHECKS=@@UNIQUE_CHECKS, UNIQUE_CHECKS=0".into(),
                    "SET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO'".into(),
                    "SET @OLD_TIME_ZONE=@@TIME_ZONE, TIME_ZONE='+00:00'".into(),
                ]
            }
            Self::Sqlite => vec![
                "PRAGMA foreign_keys=OFF".into(),
                format!("PRAGMA encoding = '{}'", sqlite_encoding(&info.charset)),
            ],
        }
    }

    /// Restores what [`Flavor::preamble`] changed.
    pub fn epilogue(self) -> Vec<String> {
        match self {
            Self::MySql => vec![
                "SET TIME_ZONE=@OLD_TIME_ZONE".into(),
                "SET SQL_MODE=@OLD_SQL_MODE".into(),
                "SET UNIQUE_CHECKS=@OLD_UNIQUE_CHECKS".into(),
                "SET FOREIGN_KEY_CHECKS=@OLD_FOREIGN_KEY_CHECKS".into(),
            ],
            Self::Sqlite => vec!["PRAGMA foreign_keys=ON".into()],
        }
    }

    /// SQLite has no table locks.
    pub fn lock_table(self, table: &str) -> Option<String> {
        match self {
            Self::MySql => Some(format!("LOCK TABLES {} WRITE", self.quote_ident(table))),
            Self::Sqlite => None,
        }
    }

    pub fn unlock_tables(self) -> Option<String> {
        match self {
            Self::MySql => Some("UNLOCK TABLES".into()),
            Self::Sqlite => None,
        }
    }
}

/// SQLite only knows UTF-8 and UTF-16 storage.
pub fn sqlite_encoding(charset: &str) -> &'static str {
    let lower = charset.to_ascii_lowercase();
    if lower.starts_with("utf16") || lower.starts_with("utf-16") {
        "UTF-16"
    } else {
        "UTF-8"
    }
}

// Charset and collation names are spliced into SET statements unquoted.
pub(crate) fn session_word<'a>(raw: &'a str, fallback: &'a str) -> &'a str {
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        raw
    } else {
        fallback
    }
}
