// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types.

use std::path::PathBuf;

/// Unified error type for signing vault operations.
#[derive(Debug, thiserror::Error)]
pub enum SigningVaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not find a project root directory from {0}")]
    RootDirectoryNotFound(PathBuf),

    #[error("could not find a signing directory from {0}")]
    SigningDirectoryNotFound(PathBuf),

    #[error("no signing or root directory found from {0}")]
    NoSigningOrRootDirectory(PathBuf),

    #[error("could not find master.key at {0}")]
    MasterKeyNotFound(PathBuf),

    #[error("no signing files to encrypt at {0}")]
    SigningKeyFilesEmpty(PathBuf),

    #[error("generation of IV failed: {0}")]
    IvGenerationFailed(String),

    #[error("could not decrypt data: {0}")]
    FailedToDecrypt(String),

    #[error("could not parse the certificate name from {0}; subject was: {1}")]
    NameParsingFailed(PathBuf, String),

    #[error("could not parse the development team from {0}; subject was: {1}")]
    DevelopmentTeamParsingFailed(PathBuf, String),

    #[error("could not parse the file {0}")]
    FileParsingFailed(PathBuf),

    #[error("invalid provisioning profile file name {0}; expected <target>.<configuration>.<ext>")]
    ProfileNameInvalid(PathBuf),

    #[error("provisioning profile {0} has no usable entitlements")]
    ProfileMissingEntitlements(PathBuf),

    #[error("X.509 certificate error: {0}")]
    X509(#[from] x509_certificate::X509CertificateError),

    #[error("CMS error: {0}")]
    Cms(#[from] cryptographic_message_syntax::CmsError),

    #[error("property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("keychain operation failed: {0}")]
    Keychain(String),
}
