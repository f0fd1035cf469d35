// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code signing certificates and their subject metadata.

use {
    crate::SigningVaultError,
    bcder::Oid,
    regex::Regex,
    std::{
        hash::{Hash, Hasher},
        path::{Path, PathBuf},
    },
    x509_certificate::{rfc4519, CapturedX509Certificate},
};

/// Marker the certificate authority writes into the subject of revoked
/// certificates.
const REVOKED_MARKER: &str = "REVOKED";

/// A code signing certificate backed by a public/private key pair on disk.
///
/// The struct does not own the key material, only the paths to it. Identity
/// is the fingerprint alone: two records with the same fingerprint are
/// interchangeable regardless of file location.
#[derive(Clone, Debug)]
pub struct Certificate {
    pub public_key: PathBuf,
    pub private_key: PathBuf,
    pub fingerprint: String,
    pub development_team: String,
    pub name: String,
    pub is_revoked: bool,
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

/// Capability for decoding DER certificates on disk.
///
/// Fingerprints must be produced identically for standalone certificate
/// files and for certificates embedded in provisioning profiles, otherwise
/// matching silently finds nothing.
pub trait CertificateDecoder {
    /// The certificate subject rendered as a single `KEY=value` line.
    fn subject(&self, path: &Path) -> Result<String, SigningVaultError>;

    /// The certificate fingerprint: SHA-256 over the DER bytes, uppercase
    /// hex, colon separated.
    fn fingerprint(&self, path: &Path) -> Result<String, SigningVaultError>;
}

/// [CertificateDecoder] implemented with an in-process X.509 parser.
#[derive(Clone, Debug, Default)]
pub struct X509Decoder {}

impl X509Decoder {
    fn load(&self, path: &Path) -> Result<CapturedX509Certificate, SigningVaultError> {
        let data = std::fs::read(path)?;

        CapturedX509Certificate::from_der(data)
            .map_err(|_| SigningVaultError::FileParsingFailed(path.to_path_buf()))
    }
}

impl CertificateDecoder for X509Decoder {
    fn subject(&self, path: &Path) -> Result<String, SigningVaultError> {
        let cert = self.load(path)?;
        let name = cert.subject_name();

        // Same rendering openssl uses for `x509 -noout -subject`, which is
        // what the attribute regexes in [CertificateParser] understand.
        let attributes = [
            (&rfc4519::OID_COUNTRY_NAME, "C"),
            (&rfc4519::OID_ORGANIZATION_NAME, "O"),
            (&rfc4519::OID_ORGANIZATIONAL_UNIT_NAME, "OU"),
            (&rfc4519::OID_COMMON_NAME, "CN"),
        ];

        let mut parts = vec![];
        for (oid, label) in attributes {
            if let Some(value) = name
                .find_first_attribute_string(Oid(oid.as_ref().into()))
                .ok()
                .flatten()
            {
                parts.push(format!("{label}={value}"));
            }
        }

        Ok(format!("subject= /{}", parts.join("/")))
    }

    fn fingerprint(&self, path: &Path) -> Result<String, SigningVaultError> {
        let cert = self.load(path)?;

        let digest = cert
            .sha256_fingerprint()
            .map_err(|_| SigningVaultError::FileParsingFailed(path.to_path_buf()))?;

        Ok(format_fingerprint(digest.as_ref()))
    }
}

/// Parses certificates into [Certificate] records.
pub struct CertificateParser {
    decoder: Box<dyn CertificateDecoder>,
}

impl Default for CertificateParser {
    fn default() -> Self {
        Self {
            decoder: Box::<X509Decoder>::default(),
        }
    }
}

impl CertificateParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decoder(decoder: Box<dyn CertificateDecoder>) -> Self {
        Self { decoder }
    }

    /// Parse a public/private key pair into a [Certificate].
    ///
    /// Only the public half is inspected; the private key path is carried
    /// along for later keychain import.
    pub fn parse(
        &self,
        public_key: &Path,
        private_key: &Path,
    ) -> Result<Certificate, SigningVaultError> {
        let subject = self.decoder.subject(public_key)?;
        let fingerprint = self.decoder.fingerprint(public_key)?;
        let is_revoked = subject.contains(REVOKED_MARKER);

        let name = subject_attribute(&subject, "CN").ok_or_else(|| {
            SigningVaultError::NameParsingFailed(public_key.to_path_buf(), subject.clone())
        })?;

        let development_team = subject_attribute(&subject, "OU").ok_or_else(|| {
            SigningVaultError::DevelopmentTeamParsingFailed(
                public_key.to_path_buf(),
                subject.clone(),
            )
        })?;

        Ok(Certificate {
            public_key: public_key.to_path_buf(),
            private_key: private_key.to_path_buf(),
            fingerprint,
            development_team,
            name: sanitize_encoding(&name),
            is_revoked,
        })
    }

    /// Compute the fingerprint of raw certificate bytes, e.g. a developer
    /// certificate embedded in a provisioning profile.
    ///
    /// The bytes go through a scratch file so the digest takes exactly the
    /// same path as for standalone certificate files.
    pub fn parse_fingerprint(
        &self,
        developer_certificate: &[u8],
    ) -> Result<String, SigningVaultError> {
        let scratch_dir = tempfile::tempdir()?;
        let scratch_file = scratch_dir.path().join("developer_certificate.cer");
        std::fs::write(&scratch_file, developer_certificate)?;

        self.decoder.fingerprint(&scratch_file)
    }
}

/// Extract a subject attribute from `KEY = "value"` or `KEY = value` forms.
///
/// Unquoted values run until a `/` or `,` delimiter.
fn subject_attribute(subject: &str, attribute: &str) -> Option<String> {
    let pattern = format!(r#"{attribute} *= *(?:"([^/,]+)"|([^/,]+))"#);
    let regex = Regex::new(&pattern).ok()?;

    let captures = regex.captures(subject)?;
    let value = captures.get(1).or_else(|| captures.get(2))?;

    Some(value.as_str().trim().to_string())
}

/// Decode doubly hex-escaped byte pairs (`\xC3\xA9`) into their UTF-8
/// rendering.
///
/// Subject text tooling double-escapes non-ASCII organization names; without
/// this the certificate name never matches what the keychain reports.
pub fn sanitize_encoding(value: &str) -> String {
    let Ok(regex) = Regex::new(r"\\x([0-9A-Fa-f]{2})\\x([0-9A-Fa-f]{2})") else {
        return value.to_string();
    };

    regex
        .replace_all(value, |caps: &regex::Captures| {
            match (
                u8::from_str_radix(&caps[1], 16),
                u8::from_str_radix(&caps[2], 16),
            ) {
                (Ok(first), Ok(second)) => {
                    String::from_utf8_lossy(&[first, second]).into_owned()
                }
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Render a digest as an uppercase, colon separated fingerprint.
pub fn format_fingerprint(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Normalize a fingerprint for comparison.
///
/// External digest tooling may format differently (lowercase, different or
/// missing separators) than fingerprints computed over embedded certificate
/// bytes.
pub fn normalize_fingerprint(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase()
}
