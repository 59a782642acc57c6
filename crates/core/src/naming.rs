use chrono::{DateTime, SecondsFormat, Utc};

use crate::backup::{BackupKind, BackupMethod};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Catalog object stored next to a tenant's backups.
pub const SIDECAR_NAME: &str = "backups.json";

const ROOT_PREFIX: &str = "backups";

/// Lower-cases a domain and replaces anything outside `[a-z0-9-]` with `_`.
pub fn sanitize_domain(domain: &str) -> String {
    domain
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Tenant ids become storage path segments, so they are restricted to a safe alphabet.
pub fn is_valid_tenant_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn backup_filename(
    database: &str,
    domain: &str,
    at: DateTime<Utc>,
    kind: BackupKind,
    method: BackupMethod,
    compressed: bool,
) -> String {
    format!(
        "{database}_{}_{}_{}_{}{}",
        sanitize_domain(domain),
        at.format(TIMESTAMP_FORMAT),
        kind.as_str(),
        method.as_str(),
        extension(compressed)
    )
}

/// Inserts `_suffix` between the stem and the `.sql[.gz]` extension.
pub fn with_suffix(filename: &str, suffix: &str) -> String {
    match filename.find(".sql") {
        Some(idx) => format!("{}_{suffix}{}", &filename[..idx], &filename[idx..]),
        None => format!("{filename}_{suffix}"),
    }
}

pub fn extension(compressed: bool) -> &'static str {
    if compressed {
        ".sql.gz"
    } else {
        ".sql"
    }
}

pub fn tenant_prefix(tenant_id: &str) -> String {
    format!("{ROOT_PREFIX}/{tenant_id}")
}

pub fn object_path(tenant_id: &str, filename: &str) -> String {
    format!("{}/{filename}", tenant_prefix(tenant_id))
}

pub fn sidecar_path(tenant_id: &str) -> String {
    object_path(tenant_id, SIDECAR_NAME)
}

/// RFC 3339 rendering used in dump headers.
pub fn header_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
