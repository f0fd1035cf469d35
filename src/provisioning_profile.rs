// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning profile parsing.
//!
//! Profiles on disk are property lists wrapped in a CMS `SignedData`
//! envelope. We unwrap the envelope without verifying the signature chain
//! (Apple signs them; we only need the payload) and decode the plist into
//! a typed record. The build target and configuration a profile belongs to
//! are not stored in the payload at all, so they are recovered from the
//! file name: `<target>.<configuration>.mobileprovision`.

use {
    crate::{certificate::CertificateParser, SigningVaultError},
    chrono::{DateTime, Utc},
    cryptographic_message_syntax::SignedData,
    plist::Value,
    serde::Serialize,
    std::{
        hash::{Hash, Hasher},
        path::{Path, PathBuf},
    },
};

/// A decoded provisioning profile.
///
/// Identity is the UUID: Apple regenerates the UUID on every profile edit,
/// so two records with equal UUIDs carry identical payloads.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningProfile {
    #[serde(skip)]
    pub path: PathBuf,
    pub name: String,
    #[serde(skip)]
    pub target_name: String,
    #[serde(skip)]
    pub configuration_name: String,
    pub uuid: String,
    pub team_ids: Vec<String>,
    pub app_id: String,
    pub app_id_name: String,
    pub application_id_prefix: Vec<String>,
    pub platforms: Vec<String>,
    pub expiration_date: DateTime<Utc>,
    pub developer_certificate_fingerprints: Vec<String>,
}

impl PartialEq for ProvisioningProfile {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for ProvisioningProfile {}

impl Hash for ProvisioningProfile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl ProvisioningProfile {
    pub fn is_expired(&self) -> bool {
        self.expiration_date < Utc::now()
    }
}

/// Capability for unwrapping a CMS envelope into its signed payload.
pub trait CmsDecoder {
    fn signed_content(&self, path: &Path) -> Result<Vec<u8>, SigningVaultError>;
}

/// [CmsDecoder] implemented with an in-process CMS parser.
#[derive(Clone, Debug, Default)]
pub struct SignedDataDecoder {}

impl CmsDecoder for SignedDataDecoder {
    fn signed_content(&self, path: &Path) -> Result<Vec<u8>, SigningVaultError> {
        let data = std::fs::read(path)?;

        let signed_data = SignedData::parse_ber(&data)?;

        signed_data
            .signed_content()
            .map(|content| content.to_vec())
            .ok_or_else(|| SigningVaultError::FileParsingFailed(path.to_path_buf()))
    }
}

/// Parses provisioning profile files into [ProvisioningProfile] records.
pub struct ProvisioningProfileParser {
    cms_decoder: Box<dyn CmsDecoder>,
    certificate_parser: CertificateParser,
}

impl Default for ProvisioningProfileParser {
    fn default() -> Self {
        Self {
            cms_decoder: Box::<SignedDataDecoder>::default(),
            certificate_parser: CertificateParser::default(),
        }
    }
}

impl ProvisioningProfileParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cms_decoder(cms_decoder: Box<dyn CmsDecoder>) -> Self {
        Self {
            cms_decoder,
            certificate_parser: CertificateParser::default(),
        }
    }

    pub fn parse(&self, path: &Path) -> Result<ProvisioningProfile, SigningVaultError> {
        let (target_name, configuration_name) = parse_file_name(path)?;

        let content = self.cms_decoder.signed_content(path)?;
        let value = Value::from_reader_xml(std::io::Cursor::new(&content))
            .or_else(|_| Value::from_reader(std::io::Cursor::new(&content)))?;

        let dict = value
            .as_dictionary()
            .ok_or_else(|| SigningVaultError::FileParsingFailed(path.to_path_buf()))?;

        let string_field = |key: &str| -> Result<String, SigningVaultError> {
            dict.get(key)
                .and_then(Value::as_string)
                .map(ToString::to_string)
                .ok_or_else(|| SigningVaultError::FileParsingFailed(path.to_path_buf()))
        };
        let string_array_field = |key: &str| -> Result<Vec<String>, SigningVaultError> {
            dict.get(key)
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_string)
                        .map(ToString::to_string)
                        .collect()
                })
                .ok_or_else(|| SigningVaultError::FileParsingFailed(path.to_path_buf()))
        };

        let platforms = string_array_field("Platform")?;

        // tvOS profiles reuse the iOS entitlement key; macOS profiles carry
        // a reverse-DNS prefixed one.
        let app_id_key = if platforms.iter().any(|p| p == "iOS" || p == "tvOS") {
            "application-identifier"
        } else {
            "com.apple.application-identifier"
        };

        let entitlements = dict
            .get("Entitlements")
            .and_then(Value::as_dictionary)
            .ok_or_else(|| SigningVaultError::ProfileMissingEntitlements(path.to_path_buf()))?;
        let app_id = entitlements
            .get(app_id_key)
            .and_then(Value::as_string)
            .map(ToString::to_string)
            .ok_or_else(|| SigningVaultError::ProfileMissingEntitlements(path.to_path_buf()))?;

        let expiration_date = dict
            .get("ExpirationDate")
            .and_then(|value| match value {
                Value::Date(date) => Some(DateTime::<Utc>::from(std::time::SystemTime::from(
                    *date,
                ))),
                _ => None,
            })
            .ok_or_else(|| SigningVaultError::FileParsingFailed(path.to_path_buf()))?;

        let developer_certificate_fingerprints = dict
            .get("DeveloperCertificates")
            .and_then(Value::as_array)
            .ok_or_else(|| SigningVaultError::FileParsingFailed(path.to_path_buf()))?
            .iter()
            .filter_map(Value::as_data)
            .map(|der| self.certificate_parser.parse_fingerprint(der))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProvisioningProfile {
            path: path.to_path_buf(),
            name: string_field("Name")?,
            target_name,
            configuration_name,
            uuid: string_field("UUID")?,
            team_ids: string_array_field("TeamIdentifier")?,
            app_id,
            app_id_name: string_field("AppIDName")?,
            application_id_prefix: string_array_field("ApplicationIdentifierPrefix")?,
            platforms,
            expiration_date,
            developer_certificate_fingerprints,
        })
    }
}

/// Split a profile file name into target and configuration.
///
/// The first `.` separates the two, so configurations may themselves
/// contain dots (`App.Debug.Staging.mobileprovision` is target `App`,
/// configuration `Debug.Staging`).
fn parse_file_name(path: &Path) -> Result<(String, String), SigningVaultError> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| SigningVaultError::ProfileNameInvalid(path.to_path_buf()))?;

    let (target, configuration) = stem
        .split_once('.')
        .ok_or_else(|| SigningVaultError::ProfileNameInvalid(path.to_path_buf()))?;

    if target.is_empty() || configuration.is_empty() {
        return Err(SigningVaultError::ProfileNameInvalid(path.to_path_buf()));
    }

    Ok((target.to_string(), configuration.to_string()))
}
