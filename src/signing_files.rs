// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Locating signing material on the filesystem.

use {
    crate::SigningVaultError,
    std::path::{Path, PathBuf},
};

/// Name of the directory holding signing material under the project root.
pub const SIGNING_DIRECTORY_NAME: &str = "Signing";

/// Name of the master key file inside the signing directory.
pub const MASTER_KEY_FILE_NAME: &str = "master.key";

/// Suffix appended to encrypted credential files.
pub const ENCRYPTED_EXTENSION: &str = "encrypted";

/// Locates signing files inside a project's conventional signing directory.
///
/// All operations are pure filesystem reads. Listings can race with
/// concurrent mutation by the cipher, so callers should snapshot the
/// returned lists before acting on them within one logical phase.
#[derive(Clone, Debug, Default)]
pub struct SigningFilesLocator {}

impl SigningFilesLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk upward from `path` looking for the project root marker (a `.git`
    /// entry).
    pub fn locate_root_directory(&self, path: &Path) -> Option<PathBuf> {
        let mut current = Some(path);

        while let Some(dir) = current {
            if dir.join(".git").exists() {
                return Some(dir.to_path_buf());
            }

            current = dir.parent();
        }

        None
    }

    /// Resolve the conventional signing directory for the project containing
    /// `path`.
    ///
    /// Returns `Ok(None)` when the project root exists but has no signing
    /// directory; callers must treat that as "nothing to do", not an error.
    pub fn locate_signing_directory(
        &self,
        path: &Path,
    ) -> Result<Option<PathBuf>, SigningVaultError> {
        let root_directory = self
            .locate_root_directory(path)
            .ok_or_else(|| SigningVaultError::RootDirectoryNotFound(path.to_path_buf()))?;

        let signing_directory = root_directory.join(SIGNING_DIRECTORY_NAME);

        Ok(if signing_directory.is_dir() {
            Some(signing_directory)
        } else {
            None
        })
    }

    pub fn locate_provisioning_profiles(
        &self,
        path: &Path,
    ) -> Result<Vec<PathBuf>, SigningVaultError> {
        Ok(self
            .locate_signing_files(path)?
            .into_iter()
            .filter(|p| {
                has_extension(p, "mobileprovision") || has_extension(p, "provisionprofile")
            })
            .collect())
    }

    pub fn locate_unencrypted_certificates(
        &self,
        path: &Path,
    ) -> Result<Vec<PathBuf>, SigningVaultError> {
        Ok(self
            .locate_signing_files(path)?
            .into_iter()
            .filter(|p| has_extension(p, "cer"))
            .collect())
    }

    pub fn locate_encrypted_certificates(
        &self,
        path: &Path,
    ) -> Result<Vec<PathBuf>, SigningVaultError> {
        Ok(self
            .locate_signing_files(path)?
            .into_iter()
            .filter(|p| has_suffix(p, "cer.encrypted"))
            .collect())
    }

    pub fn locate_unencrypted_private_keys(
        &self,
        path: &Path,
    ) -> Result<Vec<PathBuf>, SigningVaultError> {
        Ok(self
            .locate_signing_files(path)?
            .into_iter()
            .filter(|p| has_extension(p, "p12"))
            .collect())
    }

    pub fn locate_encrypted_private_keys(
        &self,
        path: &Path,
    ) -> Result<Vec<PathBuf>, SigningVaultError> {
        Ok(self
            .locate_signing_files(path)?
            .into_iter()
            .filter(|p| has_suffix(p, "p12.encrypted"))
            .collect())
    }

    /// Flat, sorted listing of the signing directory.
    ///
    /// Returns an empty list when no project root or signing directory
    /// exists.
    fn locate_signing_files(&self, path: &Path) -> Result<Vec<PathBuf>, SigningVaultError> {
        let Some(root_directory) = self.locate_root_directory(path) else {
            return Ok(vec![]);
        };

        let signing_directory = root_directory.join(SIGNING_DIRECTORY_NAME);

        let pattern = format!("{}/*", signing_directory.display());

        let mut paths = glob::glob(&pattern)
            .map_err(|e| {
                SigningVaultError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    e.to_string(),
                ))
            })?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect::<Vec<_>>();

        paths.sort();

        Ok(paths)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext == extension)
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.to_string_lossy().ends_with(suffix)
}
