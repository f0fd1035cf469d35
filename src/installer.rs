// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Installing signing assets where the toolchain finds them.

use {
    crate::{
        certificate::Certificate, keychain::Keychain, provisioning_profile::ProvisioningProfile,
        SigningVaultError,
    },
    log::{debug, info},
    std::path::{Path, PathBuf},
};

/// Installs provisioning profiles and certificates onto the local machine.
pub struct SigningInstaller {
    profiles_directory: PathBuf,
}

impl Default for SigningInstaller {
    fn default() -> Self {
        Self {
            profiles_directory: default_profiles_directory(),
        }
    }
}

impl SigningInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles_directory(profiles_directory: PathBuf) -> Self {
        Self { profiles_directory }
    }

    /// Copy a provisioning profile into the user's profiles directory.
    ///
    /// Xcode resolves profiles by UUID, so the installed copy is named
    /// `<uuid>.<extension>` regardless of its name in the store. An
    /// existing file for the same UUID is replaced.
    pub fn install_provisioning_profile(
        &self,
        profile: &ProvisioningProfile,
    ) -> Result<(), SigningVaultError> {
        let extension = profile
            .path
            .extension()
            .and_then(|extension| extension.to_str())
            .ok_or_else(|| SigningVaultError::ProfileNameInvalid(profile.path.clone()))?;

        std::fs::create_dir_all(&self.profiles_directory)?;

        let destination = self
            .profiles_directory
            .join(format!("{}.{}", profile.uuid, extension));

        if destination.exists() {
            debug!("replacing installed profile {}", destination.display());
            std::fs::remove_file(&destination)?;
        }

        std::fs::copy(&profile.path, &destination)?;
        info!(
            "installed provisioning profile {} ({})",
            profile.name, profile.uuid
        );

        Ok(())
    }

    /// Import a certificate and private key into the given keychain unless
    /// a certificate with the same name is already present.
    pub fn install_certificate(
        &self,
        keychain: &dyn Keychain,
        keychain_path: &Path,
        certificate: &Certificate,
        password: &str,
    ) -> Result<(), SigningVaultError> {
        if keychain.certificate_exists(keychain_path, &certificate.name)? {
            debug!(
                "certificate {} already present in {}",
                certificate.name,
                keychain_path.display()
            );
            return Ok(());
        }

        keychain.import_certificate(
            keychain_path,
            &certificate.public_key,
            &certificate.private_key,
            password,
        )?;
        info!("imported certificate {}", certificate.name);

        Ok(())
    }
}

/// `~/Library/Developer/Xcode/UserData/Provisioning Profiles`.
fn default_profiles_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library")
        .join("Developer")
        .join("Xcode")
        .join("UserData")
        .join("Provisioning Profiles")
}
