// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fixtures for unit tests.

use {
    cryptographic_message_syntax::{SignedDataBuilder, SignerBuilder},
    plist::{Dictionary, Value},
    std::{
        path::{Path, PathBuf},
        time::{Duration, SystemTime},
    },
    x509_certificate::{
        CapturedX509Certificate, InMemorySigningKeyPair, KeyAlgorithm, X509CertificateBuilder,
    },
};

/// A throwaway project tree with a root marker, a `Signing` directory and
/// a master key file.
pub struct VaultFixture {
    dir: tempfile::TempDir,
}

impl VaultFixture {
    pub fn new() -> Self {
        Self::with_master_key("test master key")
    }

    pub fn with_master_key(master_key: &str) -> Self {
        let dir = tempfile::TempDir::new().unwrap();

        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::create_dir(dir.path().join("Signing")).unwrap();
        std::fs::write(dir.path().join("Signing").join("master.key"), master_key).unwrap();

        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn signing_path(&self, name: &str) -> PathBuf {
        self.root().join("Signing").join(name)
    }

    pub fn write_signing_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.signing_path(name), data).unwrap();
    }

    pub fn read_signing_file(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.signing_path(name)).unwrap()
    }
}

/// Generate a self-signed certificate whose subject carries the given
/// common name and organizational unit (team identifier).
pub fn generate_keypair(
    common_name: &str,
    organizational_unit: &str,
) -> (CapturedX509Certificate, InMemorySigningKeyPair) {
    let mut builder = X509CertificateBuilder::new(KeyAlgorithm::Ed25519);
    builder
        .subject()
        .append_common_name_utf8_string(common_name)
        .unwrap();
    builder
        .subject()
        .append_organizational_unit_utf8_string(organizational_unit)
        .unwrap();
    builder.validity_duration(chrono::Duration::hours(1));

    let (cert, key_pair, _) = builder.create_with_random_keypair().unwrap();

    (cert, key_pair)
}

/// Render a provisioning profile property list as XML bytes.
#[allow(clippy::too_many_arguments)]
pub fn profile_plist(
    name: &str,
    uuid: &str,
    team_id: &str,
    app_id_name: &str,
    application_identifier: &str,
    platforms: &[&str],
    expiration: SystemTime,
    developer_certificates: &[Vec<u8>],
) -> Vec<u8> {
    let mut dict = Dictionary::new();
    dict.insert("Name".into(), Value::String(name.into()));
    dict.insert("UUID".into(), Value::String(uuid.into()));
    dict.insert(
        "TeamIdentifier".into(),
        Value::Array(vec![Value::String(team_id.into())]),
    );
    dict.insert("AppIDName".into(), Value::String(app_id_name.into()));
    dict.insert(
        "ApplicationIdentifierPrefix".into(),
        Value::Array(vec![Value::String(team_id.into())]),
    );
    dict.insert(
        "Platform".into(),
        Value::Array(
            platforms
                .iter()
                .map(|p| Value::String((*p).into()))
                .collect(),
        ),
    );
    dict.insert(
        "ExpirationDate".into(),
        Value::Date(plist::Date::from(expiration)),
    );
    dict.insert(
        "DeveloperCertificates".into(),
        Value::Array(
            developer_certificates
                .iter()
                .map(|der| Value::Data(der.clone()))
                .collect(),
        ),
    );

    let mut entitlements = Dictionary::new();
    let app_id_key = if platforms.contains(&"tvOS") || platforms.contains(&"iOS") {
        "application-identifier"
    } else {
        "com.apple.application-identifier"
    };
    entitlements.insert(
        app_id_key.into(),
        Value::String(application_identifier.into()),
    );
    dict.insert("Entitlements".into(), Value::Dictionary(entitlements));

    let mut buffer = vec![];
    Value::Dictionary(dict).to_writer_xml(&mut buffer).unwrap();

    buffer
}

/// An expiration timestamp comfortably in the future.
pub fn future_expiration() -> SystemTime {
    SystemTime::now() + Duration::from_secs(365 * 24 * 3600)
}

/// Wrap content in a CMS `SignedData` envelope the way Apple wraps
/// provisioning profiles.
pub fn cms_wrap(
    content: &[u8],
    cert: &CapturedX509Certificate,
    key_pair: &InMemorySigningKeyPair,
) -> Vec<u8> {
    SignedDataBuilder::default()
        .certificate(cert.clone())
        .content_inline(content.to_vec())
        .signer(SignerBuilder::new(key_pair, cert.clone()))
        .build_der()
        .unwrap()
}
