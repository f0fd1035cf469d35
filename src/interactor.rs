// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High level install and export flows.
//!
//! Both flows decrypt the store, do their work, and then restore the
//! at-rest state: re-encrypt the signing files and lock the keychain. The
//! restore step runs on every exit path, including failures, so secrets are
//! never left decrypted on disk because a parse failed halfway through.

use {
    crate::{
        certificate::Certificate,
        cipher::SigningCipher,
        installer::SigningInstaller,
        keychain::{Keychain, SecurityCommandKeychain},
        matcher::{SigningMatch, SigningMatcher},
        provisioning_profile::ProvisioningProfile,
        SigningVaultError,
    },
    log::{info, warn},
    serde::Serialize,
    std::{
        collections::{BTreeMap, HashSet},
        path::{Path, PathBuf},
    },
};

/// Name of the directory holding generated artifacts, relative to the
/// project root.
const OUTPUT_DIRECTORY_NAME: &str = "CodeSigning";
const KEYCHAIN_FILE_NAME: &str = "CodeSigning.keychain";
const PROFILES_EXPORT_FILE_NAME: &str = "ProvisioningProfiles.json";
const CERTIFICATES_EXPORT_FILE_NAME: &str = "Certificates.json";

/// A build target to install signing assets for.
///
/// An empty configuration list means every configuration the store has a
/// profile for.
#[derive(Clone, Debug)]
pub struct BuildTarget {
    pub name: String,
    pub configurations: Vec<String>,
}

/// Certificate fields safe to publish in an export.
///
/// Paths and key material stay out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateExport {
    name: String,
    fingerprint: String,
    development_team: String,
    is_revoked: bool,
}

impl From<&Certificate> for CertificateExport {
    fn from(certificate: &Certificate) -> Self {
        Self {
            name: certificate.name.clone(),
            fingerprint: certificate.fingerprint.clone(),
            development_team: certificate.development_team.clone(),
            is_revoked: certificate.is_revoked,
        }
    }
}

/// Drives installs and exports against a signing store.
pub struct SigningInteractor {
    cipher: SigningCipher,
    matcher: SigningMatcher,
    installer: SigningInstaller,
    keychain: Box<dyn Keychain>,
}

impl Default for SigningInteractor {
    fn default() -> Self {
        Self {
            cipher: SigningCipher::default(),
            matcher: SigningMatcher::default(),
            installer: SigningInstaller::default(),
            keychain: Box::<SecurityCommandKeychain>::default(),
        }
    }
}

impl SigningInteractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_components(
        keychain: Box<dyn Keychain>,
        installer: SigningInstaller,
    ) -> Self {
        Self {
            cipher: SigningCipher::default(),
            matcher: SigningMatcher::default(),
            installer,
            keychain,
        }
    }

    /// Decrypt the store, install profiles and certificates for the given
    /// targets, then re-encrypt and lock.
    ///
    /// With an empty target list everything in the store is installed.
    pub fn install(
        &self,
        path: &Path,
        targets: &[BuildTarget],
    ) -> Result<(), SigningVaultError> {
        let root_directory = self.locate_root(path)?;
        let keychain_path = self.prepare_keychain(path, &root_directory)?;

        // From this point on the keychain is unlocked, so every exit path
        // must run the restore step - including a failed decryption, which
        // may already have touched the directory.
        let result = self
            .cipher
            .decrypt_signing(path, true)
            .and_then(|()| self.install_decrypted(path, &keychain_path, targets));

        self.restore_at_rest_state(path, &keychain_path);

        result
    }

    /// Decrypt the store, write JSON summaries of its contents, then
    /// re-encrypt and lock.
    pub fn export(&self, path: &Path) -> Result<(), SigningVaultError> {
        let root_directory = self.locate_root(path)?;
        let keychain_path = self.prepare_keychain(path, &root_directory)?;

        let result = self
            .cipher
            .decrypt_signing(path, true)
            .and_then(|()| self.export_decrypted(path, &root_directory));

        self.restore_at_rest_state(path, &keychain_path);

        result
    }

    fn locate_root(&self, path: &Path) -> Result<PathBuf, SigningVaultError> {
        let files_locator = crate::signing_files::SigningFilesLocator::default();

        let root_directory = files_locator
            .locate_root_directory(path)
            .ok_or_else(|| SigningVaultError::RootDirectoryNotFound(path.to_path_buf()))?;

        files_locator
            .locate_signing_directory(path)?
            .ok_or_else(|| SigningVaultError::NoSigningOrRootDirectory(path.to_path_buf()))?;

        Ok(root_directory)
    }

    /// Create the keychain if it does not exist yet and unlock it.
    ///
    /// The master key doubles as the keychain password. It is passed to the
    /// keychain layer but never logged.
    fn prepare_keychain(
        &self,
        path: &Path,
        root_directory: &Path,
    ) -> Result<PathBuf, SigningVaultError> {
        let output_directory = root_directory.join(OUTPUT_DIRECTORY_NAME);
        std::fs::create_dir_all(&output_directory)?;

        let keychain_path = output_directory.join(KEYCHAIN_FILE_NAME);
        let password = self.cipher.read_master_key(path)?;

        if !keychain_path.exists() {
            self.keychain.create_keychain(&keychain_path, &password)?;
        }
        self.keychain.unlock_keychain(&keychain_path, &password)?;

        Ok(keychain_path)
    }

    fn install_decrypted(
        &self,
        path: &Path,
        keychain_path: &Path,
        targets: &[BuildTarget],
    ) -> Result<(), SigningVaultError> {
        let matched = self.matcher.match_signing(path)?;
        let password = self.cipher.read_master_key(path)?;

        let profiles = if targets.is_empty() {
            matched
                .provisioning_profiles
                .values()
                .flat_map(|configurations| configurations.values())
                .collect::<Vec<_>>()
        } else {
            self.requested_profiles(&matched, targets)
        };

        let mut installed_fingerprints = HashSet::new();
        for profile in profiles {
            if profile.is_expired() {
                warn!(
                    "provisioning profile {} ({}) is expired",
                    profile.name, profile.uuid
                );
            }

            self.installer.install_provisioning_profile(profile)?;

            let Some(certificate) = matched.certificate_for(profile) else {
                warn!(
                    "no certificate in the store matches profile {} ({}); skipping import",
                    profile.name, profile.uuid
                );
                continue;
            };

            if certificate.is_revoked {
                warn!("certificate {} is revoked", certificate.name);
            }

            if installed_fingerprints.insert(certificate.fingerprint.clone()) {
                self.installer.install_certificate(
                    self.keychain.as_ref(),
                    keychain_path,
                    certificate,
                    &password,
                )?;
            }
        }

        Ok(())
    }

    fn requested_profiles<'a>(
        &self,
        matched: &'a SigningMatch,
        targets: &[BuildTarget],
    ) -> Vec<&'a ProvisioningProfile> {
        let mut profiles = vec![];

        for target in targets {
            let Some(configurations) = matched.provisioning_profiles.get(&target.name) else {
                warn!("no provisioning profiles in the store for target {}", target.name);
                continue;
            };

            if target.configurations.is_empty() {
                profiles.extend(configurations.values());
                continue;
            }

            for configuration in &target.configurations {
                match configurations.get(configuration) {
                    Some(profile) => profiles.push(profile),
                    None => warn!(
                        "no provisioning profile for {}:{} in the store",
                        target.name, configuration
                    ),
                }
            }
        }

        profiles
    }

    fn export_decrypted(
        &self,
        path: &Path,
        root_directory: &Path,
    ) -> Result<(), SigningVaultError> {
        let matched = self.matcher.match_signing(path)?;

        let output_directory = root_directory.join(OUTPUT_DIRECTORY_NAME);
        std::fs::create_dir_all(&output_directory)?;

        // BTreeMaps so the JSON is stable across runs and diffs cleanly.
        let profiles: BTreeMap<&String, BTreeMap<&String, &ProvisioningProfile>> = matched
            .provisioning_profiles
            .iter()
            .map(|(target, configurations)| {
                (
                    target,
                    configurations
                        .iter()
                        .map(|(configuration, profile)| (configuration, profile))
                        .collect(),
                )
            })
            .collect();

        let mut certificates = matched
            .certificates
            .values()
            .map(CertificateExport::from)
            .collect::<Vec<_>>();
        certificates.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        let profiles_path = output_directory.join(PROFILES_EXPORT_FILE_NAME);
        std::fs::write(&profiles_path, serde_json::to_string_pretty(&profiles)?)?;
        info!("wrote {}", profiles_path.display());

        let certificates_path = output_directory.join(CERTIFICATES_EXPORT_FILE_NAME);
        std::fs::write(
            &certificates_path,
            serde_json::to_string_pretty(&certificates)?,
        )?;
        info!("wrote {}", certificates_path.display());

        Ok(())
    }

    /// Re-encrypt the store and lock the keychain.
    ///
    /// Each step is best effort: a failure here is logged but must not mask
    /// whatever the flow itself returned.
    fn restore_at_rest_state(&self, path: &Path, keychain_path: &Path) {
        if let Err(err) = self.cipher.encrypt_signing(path, false) {
            warn!("failed to re-encrypt signing files under {}: {}", path.display(), err);
        }

        if let Err(err) = self.keychain.lock_keychain(keychain_path) {
            warn!("failed to lock keychain {}: {}", keychain_path.display(), err);
        }
    }
}
