// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keychain management via the `security` command line tool.

use {
    crate::SigningVaultError,
    log::debug,
    std::{
        path::Path,
        process::{Command, Output},
    },
};

/// Operations against a macOS keychain.
///
/// Passwords passed here are secrets and must never be logged.
pub trait Keychain {
    fn create_keychain(&self, path: &Path, password: &str) -> Result<(), SigningVaultError>;

    fn unlock_keychain(&self, path: &Path, password: &str) -> Result<(), SigningVaultError>;

    fn lock_keychain(&self, path: &Path) -> Result<(), SigningVaultError>;

    /// Import a certificate and its private key into the keychain.
    ///
    /// The two halves are imported independently; a failure on one does not
    /// abort the other. Private keys are imported with access granted to
    /// `codesign` and `security` so signing does not prompt interactively.
    fn import_certificate(
        &self,
        keychain_path: &Path,
        certificate_path: &Path,
        private_key_path: &Path,
        password: &str,
    ) -> Result<(), SigningVaultError>;

    fn certificate_exists(
        &self,
        keychain_path: &Path,
        certificate_name: &str,
    ) -> Result<bool, SigningVaultError>;
}

/// [Keychain] implemented by shelling out to `/usr/bin/security`.
#[derive(Clone, Debug, Default)]
pub struct SecurityCommandKeychain {}

impl SecurityCommandKeychain {
    fn run(&self, args: &[&str]) -> Result<Output, SigningVaultError> {
        let output = Command::new("/usr/bin/security").args(args).output()?;

        if !output.status.success() {
            return Err(SigningVaultError::Keychain(format!(
                "security {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output)
    }
}

impl Keychain for SecurityCommandKeychain {
    fn create_keychain(&self, path: &Path, password: &str) -> Result<(), SigningVaultError> {
        debug!("creating keychain at {}", path.display());

        self.run(&[
            "create-keychain",
            "-p",
            password,
            &path.display().to_string(),
        ])?;

        Ok(())
    }

    fn unlock_keychain(&self, path: &Path, password: &str) -> Result<(), SigningVaultError> {
        debug!("unlocking keychain at {}", path.display());

        self.run(&[
            "unlock-keychain",
            "-p",
            password,
            &path.display().to_string(),
        ])?;

        Ok(())
    }

    fn lock_keychain(&self, path: &Path) -> Result<(), SigningVaultError> {
        debug!("locking keychain at {}", path.display());

        self.run(&["lock-keychain", &path.display().to_string()])?;

        Ok(())
    }

    fn import_certificate(
        &self,
        keychain_path: &Path,
        certificate_path: &Path,
        private_key_path: &Path,
        password: &str,
    ) -> Result<(), SigningVaultError> {
        let keychain = keychain_path.display().to_string();

        let certificate_result = self.run(&[
            "import",
            &certificate_path.display().to_string(),
            "-k",
            &keychain,
        ]);
        if let Err(err) = certificate_result {
            debug!(
                "importing {} failed (may already be present): {}",
                certificate_path.display(),
                err
            );
        }

        let private_key_result = self.run(&[
            "import",
            &private_key_path.display().to_string(),
            "-P",
            password,
            "-T",
            "/usr/bin/codesign",
            "-T",
            "/usr/bin/security",
            "-k",
            &keychain,
        ]);
        if let Err(err) = private_key_result {
            debug!(
                "importing {} failed (may already be present): {}",
                private_key_path.display(),
                err
            );
        }

        Ok(())
    }

    fn certificate_exists(
        &self,
        keychain_path: &Path,
        certificate_name: &str,
    ) -> Result<bool, SigningVaultError> {
        let result = self.run(&[
            "find-certificate",
            "-c",
            certificate_name,
            "-a",
            &keychain_path.display().to_string(),
        ]);

        match result {
            Ok(output) => Ok(!output.stdout.is_empty()),
            // find-certificate exits non-zero when nothing matches.
            Err(_) => Ok(false),
        }
    }
}
