// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Matching signing files to build targets.
//!
//! Certificates and private keys pair by file stem (`Dev.cer` goes with
//! `Dev.p12`); provisioning profiles map to targets and configurations via
//! their file names. A profile then finds its certificate through the
//! developer certificate fingerprints embedded in its payload.

use {
    crate::{
        certificate::{normalize_fingerprint, Certificate, CertificateParser},
        provisioning_profile::{ProvisioningProfile, ProvisioningProfileParser},
        signing_files::SigningFilesLocator,
        SigningVaultError,
    },
    log::warn,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
    },
};

/// Everything in the store, indexed for lookup during install and export.
#[derive(Debug, Default)]
pub struct SigningMatch {
    /// Certificates keyed by normalized fingerprint. When two certificate
    /// files share a fingerprint the lexicographically later one wins.
    pub certificates: HashMap<String, Certificate>,
    /// Profiles keyed by target name, then configuration name.
    pub provisioning_profiles: HashMap<String, HashMap<String, ProvisioningProfile>>,
}

impl SigningMatch {
    pub fn profile(&self, target: &str, configuration: &str) -> Option<&ProvisioningProfile> {
        self.provisioning_profiles
            .get(target)?
            .get(configuration)
    }

    /// The certificate whose fingerprint appears in the profile's embedded
    /// developer certificates.
    pub fn certificate_for(&self, profile: &ProvisioningProfile) -> Option<&Certificate> {
        find_certificate(&self.certificates, profile)
    }
}

/// Builds a [SigningMatch] from the decrypted contents of the store.
pub struct SigningMatcher {
    files_locator: SigningFilesLocator,
    certificate_parser: CertificateParser,
    profile_parser: ProvisioningProfileParser,
}

impl Default for SigningMatcher {
    fn default() -> Self {
        Self {
            files_locator: SigningFilesLocator::default(),
            certificate_parser: CertificateParser::default(),
            profile_parser: ProvisioningProfileParser::default(),
        }
    }
}

impl SigningMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parsers(
        certificate_parser: CertificateParser,
        profile_parser: ProvisioningProfileParser,
    ) -> Self {
        Self {
            files_locator: SigningFilesLocator::default(),
            certificate_parser,
            profile_parser,
        }
    }

    /// Parse and index every signing file under the given path.
    ///
    /// The store must already be decrypted. A certificate without a private
    /// key of the same stem cannot be imported anywhere, so it is skipped
    /// with a warning rather than failing the whole run.
    pub fn match_signing(&self, path: &Path) -> Result<SigningMatch, SigningVaultError> {
        let mut matched = SigningMatch::default();

        let certificate_files = self.files_locator.locate_unencrypted_certificates(path)?;
        let private_key_files = self.files_locator.locate_unencrypted_private_keys(path)?;

        let private_keys_by_stem: HashMap<String, PathBuf> = private_key_files
            .into_iter()
            .filter_map(|path| Some((file_stem(&path)?, path)))
            .collect();

        for certificate_file in certificate_files {
            let Some(stem) = file_stem(&certificate_file) else {
                continue;
            };

            let Some(private_key) = private_keys_by_stem.get(&stem) else {
                warn!(
                    "certificate {} has no matching {}.p12 private key; skipping",
                    certificate_file.display(),
                    stem
                );
                continue;
            };

            let certificate = self
                .certificate_parser
                .parse(&certificate_file, private_key)?;

            matched.certificates.insert(
                normalize_fingerprint(&certificate.fingerprint),
                certificate,
            );
        }

        for profile_file in self.files_locator.locate_provisioning_profiles(path)? {
            let profile = self.profile_parser.parse(&profile_file)?;

            matched
                .provisioning_profiles
                .entry(profile.target_name.clone())
                .or_default()
                .insert(profile.configuration_name.clone(), profile);
        }

        Ok(matched)
    }
}

/// The certificate (if any) referenced by the profile's embedded developer
/// certificate fingerprints.
///
/// Comparison happens on normalized fingerprints so formatting differences
/// between digest sources cannot hide a match.
pub fn find_certificate<'a>(
    certificates: &'a HashMap<String, Certificate>,
    profile: &ProvisioningProfile,
) -> Option<&'a Certificate> {
    profile
        .developer_certificate_fingerprints
        .iter()
        .find_map(|fingerprint| certificates.get(&normalize_fingerprint(fingerprint)))
}

fn file_stem(path: &Path) -> Option<String> {
    Some(path.file_stem()?.to_str()?.to_string())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::test_support::{self, VaultFixture},
    };

    fn write_pair(fixture: &VaultFixture, stem: &str, team: &str) -> String {
        let (cert, _) = test_support::generate_keypair(&format!("{stem} Developer"), team);
        let der = cert.encode_der().unwrap();

        fixture.write_signing_file(&format!("{stem}.cer"), &der);
        fixture.write_signing_file(&format!("{stem}.p12"), b"private key material");

        CertificateParser::new().parse_fingerprint(&der).unwrap()
    }

    fn write_profile(fixture: &VaultFixture, file_name: &str, certificate_der: &[u8]) {
        let (signer, key_pair) = test_support::generate_keypair("Signer", "TEAM123");

        let plist = test_support::profile_plist(
            "Profile",
            file_name,
            "TEAM123",
            "App",
            "TEAM123.io.example.app",
            &["iOS"],
            test_support::future_expiration(),
            &[certificate_der.to_vec()],
        );

        fixture.write_signing_file(file_name, &test_support::cms_wrap(&plist, &signer, &key_pair));
    }

    #[test]
    fn pairs_certificates_by_stem_and_indexes_profiles() {
        let fixture = VaultFixture::new();

        let fingerprint = write_pair(&fixture, "Dev", "TEAM123");

        let (cert, _) = test_support::generate_keypair("Dev Developer", "TEAM123");
        write_profile(
            &fixture,
            "App.Debug.mobileprovision",
            &cert.encode_der().unwrap(),
        );

        let matched = SigningMatcher::new().match_signing(fixture.root()).unwrap();

        assert_eq!(matched.certificates.len(), 1);
        assert!(matched
            .certificates
            .contains_key(&normalize_fingerprint(&fingerprint)));
        assert!(matched.profile("App", "Debug").is_some());
        assert!(matched.profile("App", "Release").is_none());
        assert!(matched.profile("Other", "Debug").is_none());
    }

    #[test]
    fn certificate_without_private_key_is_skipped() {
        let fixture = VaultFixture::new();

        let (cert, _) = test_support::generate_keypair("Orphan", "TEAM123");
        fixture.write_signing_file("Orphan.cer", &cert.encode_der().unwrap());

        let matched = SigningMatcher::new().match_signing(fixture.root()).unwrap();

        assert!(matched.certificates.is_empty());
    }

    #[test]
    fn profile_finds_its_certificate_by_embedded_fingerprint() {
        let fixture = VaultFixture::new();

        let (cert, _) = test_support::generate_keypair("Dev Developer", "TEAM123");
        let der = cert.encode_der().unwrap();
        fixture.write_signing_file("Dev.cer", &der);
        fixture.write_signing_file("Dev.p12", b"private key material");

        write_profile(&fixture, "App.Debug.mobileprovision", &der);

        let matched = SigningMatcher::new().match_signing(fixture.root()).unwrap();
        let profile = matched.profile("App", "Debug").unwrap();

        let certificate = matched.certificate_for(profile).unwrap();
        assert_eq!(certificate.name, "Dev Developer");
    }

    #[test]
    fn profile_without_matching_certificate_finds_nothing() {
        let fixture = VaultFixture::new();

        write_pair(&fixture, "Dev", "TEAM123");

        let (unrelated, _) = test_support::generate_keypair("Someone Else", "TEAM999");
        write_profile(
            &fixture,
            "App.Debug.mobileprovision",
            &unrelated.encode_der().unwrap(),
        );

        let matched = SigningMatcher::new().match_signing(fixture.root()).unwrap();
        let profile = matched.profile("App", "Debug").unwrap();

        assert!(matched.certificate_for(profile).is_none());
    }

    #[test]
    fn fingerprint_comparison_is_format_insensitive() {
        let mut certificates = HashMap::new();
        certificates.insert(
            normalize_fingerprint("AA:BB:CC"),
            Certificate {
                public_key: "a.cer".into(),
                private_key: "a.p12".into(),
                fingerprint: "AA:BB:CC".into(),
                development_team: "TEAM".into(),
                name: "Dev".into(),
                is_revoked: false,
            },
        );

        let fixture = VaultFixture::new();
        let (cert, key_pair) = test_support::generate_keypair("Dev", "TEAM");
        let plist = test_support::profile_plist(
            "Profile",
            "uuid",
            "TEAM",
            "App",
            "TEAM.io.example.app",
            &["iOS"],
            test_support::future_expiration(),
            &[],
        );
        fixture.write_signing_file(
            "App.Debug.mobileprovision",
            &test_support::cms_wrap(&plist, &cert, &key_pair),
        );
        let mut profile = ProvisioningProfileParser::new()
            .parse(&fixture.signing_path("App.Debug.mobileprovision"))
            .unwrap();
        profile.developer_certificate_fingerprints = vec!["aabbcc".to_string()];

        assert!(find_certificate(&certificates, &profile).is_some());
    }
}
