// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manage repository-committed, encrypted code signing credentials.
//!
//! This crate implements a store of code signing material - X.509
//! certificates, private keys, and provisioning profiles - that lives in
//! version control in encrypted form and is decrypted transiently at build
//! time.
//!
//! The main areas of functionality are:
//!
//! * Symmetric encryption of credential files against a shared master key
//!   with idempotency detection, so re-running encryption never perturbs
//!   files that are already correctly encrypted ([cipher::SigningCipher]).
//! * Parsing of certificate and provisioning profile binary formats to
//!   recover identity metadata ([certificate::CertificateParser],
//!   [provisioning_profile::ProvisioningProfileParser]).
//! * Matching certificates to provisioning profiles via the developer
//!   certificate fingerprints embedded in profiles ([matcher::SigningMatcher]).
//! * Installing matched pairs into a keychain for a build, always leaving the
//!   on-disk store locked and encrypted afterwards - even on failure
//!   ([interactor::SigningInteractor]).

pub mod certificate;
pub mod cipher;
pub mod cli;
mod error;
pub mod installer;
pub mod interactor;
pub mod keychain;
pub mod matcher;
pub mod provisioning_profile;
pub mod signing_files;
#[cfg(test)]
pub(crate) mod test_support;

pub use error::SigningVaultError;
