//! AWS Signature Version 4 - Request Signing
//!
//! Minimal SigV4 signer for JSON-RPC style AWS APIs (single POST to
//! `/`, no query string). HMAC-SHA256 via `hmac-sha256`, the same
//! primitive used for every other request signature in this crate.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use hmac_sha256::{HMAC, Hash};

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// `x-amz-date` format.
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Lowercase hex encoding.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex(&Hash::hash(data))
}

/// Signer bound to one credential pair, region and service.
#[derive(Clone)]
pub struct Signer {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    service: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
            service: service.into(),
        }
    }

    /// Derive the signing key for `date` (`YYYYMMDD`).
    pub fn signing_key(&self, date: &str) -> [u8; 32] {
        let secret = format!("AWS4{}", self.secret_access_key);
        let k_date = HMAC::mac(date.as_bytes(), secret.as_bytes());
        let k_region = HMAC::mac(self.region.as_bytes(), k_date);
        let k_service = HMAC::mac(self.service.as_bytes(), k_region);
        HMAC::mac(b"aws4_request", k_service)
    }

    /// `Authorization` header value for a request.
    ///
    /// `headers` maps lowercase header names to trimmed values and must
    /// contain `host` and `x-amz-date` (formatted from `now`). Every
    /// header in the map is signed.
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        headers: &BTreeMap<String, String>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let date = now.format("%Y%m%d").to_string();

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();
        let signed_headers = headers.keys().map(String::as_str).collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{method}\n{path}\n\n{canonical_headers}\n{signed_headers}\n{}",
            sha256_hex(body)
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let signature = hex(&HMAC::mac(string_to_sign.as_bytes(), self.signing_key(&date)));

        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id
        )
    }
}
