// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Symmetric encryption of signing files against a shared master key.
//!
//! Encrypted files are committed to version control, so encryption must be
//! idempotent: re-running it over an unchanged store has to produce
//! byte-identical output. [SigningCipher::encrypt_signing] therefore re-uses
//! the IV of an existing ciphertext to decide whether a file actually needs
//! re-encryption before generating any new randomness.
//!
//! On-disk format (UTF-8 text):
//!
//! ```text
//! base64(IV) "-" base64(AES-256-CTR ciphertext) "-" base64(SHA-256(plaintext))
//! ```
//!
//! The trailing checksum exists because CTR mode has no integrity tag: a
//! wrong master key would otherwise decrypt to garbage without any error.
//! The historical two-field form without the checksum is still accepted when
//! reading and is upgraded the next time the file is encrypted.

use {
    crate::{
        signing_files::{
            SigningFilesLocator, ENCRYPTED_EXTENSION, MASTER_KEY_FILE_NAME, SIGNING_DIRECTORY_NAME,
        },
        SigningVaultError,
    },
    base64::{engine::general_purpose::STANDARD as STANDARD_ENGINE, Engine},
    ctr::cipher::{KeyIvInit, StreamCipher},
    log::debug,
    rand::{rngs::OsRng, RngCore},
    sha2::{Digest, Sha256},
    std::path::{Path, PathBuf},
};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// The derived AES-256 key. Always SHA-256 of the master key file's text.
pub type MasterKey = [u8; 32];

const IV_LENGTH: usize = 16;

/// Encrypts and decrypts the credential files of a signing directory.
#[derive(Clone, Debug, Default)]
pub struct SigningCipher {
    files_locator: SigningFilesLocator,
}

impl SigningCipher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the plain text master key for the project containing `path`.
    ///
    /// The returned string is trimmed of trailing whitespace. It is the
    /// secret itself, not the cipher key; see [Self::master_key].
    pub fn read_master_key(&self, path: &Path) -> Result<String, SigningVaultError> {
        let root_directory = self
            .files_locator
            .locate_root_directory(path)
            .ok_or_else(|| SigningVaultError::SigningDirectoryNotFound(path.to_path_buf()))?;

        let master_key_file = root_directory
            .join(SIGNING_DIRECTORY_NAME)
            .join(MASTER_KEY_FILE_NAME);

        if !master_key_file.is_file() {
            return Err(SigningVaultError::MasterKeyNotFound(master_key_file));
        }

        Ok(std::fs::read_to_string(&master_key_file)?
            .trim_end()
            .to_string())
    }

    /// Derive the AES-256 key from the master key file.
    ///
    /// This is a deliberate key derivation step: the cipher key is always
    /// `SHA256(utf8(master key))`, never the raw string bytes.
    pub fn master_key(&self, path: &Path) -> Result<MasterKey, SigningVaultError> {
        let plain = self.read_master_key(path)?;

        Ok(Sha256::digest(plain.as_bytes()).into())
    }

    /// Encrypt every unencrypted certificate and private key in the signing
    /// directory.
    ///
    /// Files whose existing ciphertext already matches their current
    /// plaintext are left byte-for-byte untouched. Encrypted files whose
    /// source is gone or stale are deleted before new output is written.
    /// When `keep_files` is false the plaintext originals are removed after
    /// all of them encrypted successfully.
    pub fn encrypt_signing(&self, path: &Path, keep_files: bool) -> Result<(), SigningVaultError> {
        let master_key = self.master_key(path)?;

        let signing_key_files = self.locate_unencrypted_signing_files(path)?;
        if signing_key_files.is_empty() {
            return Err(SigningVaultError::SigningKeyFilesEmpty(path.to_path_buf()));
        }

        let correctly_encrypted = self.correctly_encrypted_signing_files(path, &master_key)?;

        for encrypted_file in self.locate_encrypted_signing_files(path)? {
            if !correctly_encrypted
                .iter()
                .any(|(_, encrypted)| encrypted == &encrypted_file)
            {
                debug!("removing stale ciphertext {}", encrypted_file.display());
                std::fs::remove_file(&encrypted_file)?;
            }
        }

        for file in &signing_key_files {
            if correctly_encrypted
                .iter()
                .any(|(unencrypted, _)| unencrypted == file)
            {
                continue;
            }

            let plaintext = std::fs::read(file)?;
            let encrypted = self.encrypt_data(&plaintext, &master_key)?;
            std::fs::write(encrypted_sibling(file), encrypted)?;
        }

        if !keep_files {
            for file in &signing_key_files {
                std::fs::remove_file(file)?;
            }
        }

        Ok(())
    }

    /// Decrypt every encrypted certificate and private key in the signing
    /// directory.
    ///
    /// Having no encrypted files is a no-op success: a project need not hold
    /// signing material. Every file is decrypted in memory before any
    /// plaintext is written so a corrupted member cannot leave the directory
    /// half decrypted. When `keep_files` is false the encrypted sources are
    /// removed after all plaintexts are on disk.
    pub fn decrypt_signing(&self, path: &Path, keep_files: bool) -> Result<(), SigningVaultError> {
        let encrypted_files = self.locate_encrypted_signing_files(path)?;
        if encrypted_files.is_empty() {
            return Ok(());
        }

        let master_key = self.master_key(path)?;

        let mut plaintexts = Vec::with_capacity(encrypted_files.len());
        for file in &encrypted_files {
            let data = std::fs::read(file)?;
            plaintexts.push((decrypted_sibling(file), self.decrypt_data(&data, &master_key)?));
        }

        // Unencrypted leftovers without an encrypted source would otherwise
        // survive as stale credentials.
        for unencrypted in self.locate_unencrypted_signing_files(path)? {
            if !encrypted_files
                .iter()
                .any(|encrypted| decrypted_sibling(encrypted) == unencrypted)
            {
                debug!("removing stale plaintext {}", unencrypted.display());
                std::fs::remove_file(&unencrypted)?;
            }
        }

        for (destination, plaintext) in &plaintexts {
            std::fs::write(destination, plaintext)?;
        }

        if !keep_files {
            for file in &encrypted_files {
                std::fs::remove_file(file)?;
            }
        }

        Ok(())
    }

    /// Whether `unencrypted_file` needs to be re-encrypted.
    ///
    /// The existing ciphertext's IV is reused to re-encrypt the current
    /// plaintext; only a byte-identical result counts as already encrypted.
    /// Re-encrypting with a fresh IV on every run would generate spurious
    /// diffs for unchanged content.
    fn is_encryption_needed(
        &self,
        encrypted_file: &Path,
        unencrypted_file: &Path,
        master_key: &MasterKey,
    ) -> Result<bool, SigningVaultError> {
        let existing = std::fs::read(encrypted_file)?;
        let text = std::str::from_utf8(&existing)
            .map_err(|_| SigningVaultError::FailedToDecrypt("corrupted data".into()))?;

        let (iv_part, _) = text
            .split_once('-')
            .ok_or_else(|| SigningVaultError::FailedToDecrypt("corrupted data".into()))?;
        let iv = decode_iv(iv_part)?;

        let plaintext = std::fs::read(unencrypted_file)?;
        let encoded = encode_encrypted(&iv, &plaintext, master_key);

        Ok(encoded.as_bytes() != existing.as_slice())
    }

    fn encrypt_data(
        &self,
        plaintext: &[u8],
        master_key: &MasterKey,
    ) -> Result<Vec<u8>, SigningVaultError> {
        let iv = generate_iv()?;

        Ok(encode_encrypted(&iv, plaintext, master_key).into_bytes())
    }

    fn decrypt_data(
        &self,
        data: &[u8],
        master_key: &MasterKey,
    ) -> Result<Vec<u8>, SigningVaultError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| SigningVaultError::FailedToDecrypt("corrupted data".into()))?;

        let parts = text.trim_end().split('-').collect::<Vec<_>>();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(SigningVaultError::FailedToDecrypt("corrupted data".into()));
        }

        let iv = decode_iv(parts[0])?;
        let mut plaintext = STANDARD_ENGINE
            .decode(parts[1])
            .map_err(|_| SigningVaultError::FailedToDecrypt("corrupted data".into()))?;

        apply_ctr(master_key, &iv, &mut plaintext);

        // Three-field form carries a plaintext checksum; the legacy two-field
        // form has nothing to verify against.
        if let Some(checksum) = parts.get(2) {
            let expected = STANDARD_ENGINE
                .decode(checksum)
                .map_err(|_| SigningVaultError::FailedToDecrypt("corrupted data".into()))?;

            if Sha256::digest(&plaintext).as_slice() != expected.as_slice() {
                return Err(SigningVaultError::FailedToDecrypt(
                    "plaintext checksum mismatch; is the master key correct?".into(),
                ));
            }
        }

        Ok(plaintext)
    }

    /// The (unencrypted, encrypted) pairs whose ciphertext is already
    /// current.
    fn correctly_encrypted_signing_files(
        &self,
        path: &Path,
        master_key: &MasterKey,
    ) -> Result<Vec<(PathBuf, PathBuf)>, SigningVaultError> {
        let mut pairs = vec![];

        for unencrypted in self.locate_unencrypted_signing_files(path)? {
            let encrypted = encrypted_sibling(&unencrypted);
            if !encrypted.is_file() {
                continue;
            }

            if !self.is_encryption_needed(&encrypted, &unencrypted, master_key)? {
                pairs.push((unencrypted, encrypted));
            }
        }

        Ok(pairs)
    }

    fn locate_unencrypted_signing_files(
        &self,
        path: &Path,
    ) -> Result<Vec<PathBuf>, SigningVaultError> {
        let mut files = self.files_locator.locate_unencrypted_certificates(path)?;
        files.extend(self.files_locator.locate_unencrypted_private_keys(path)?);

        Ok(files)
    }

    fn locate_encrypted_signing_files(
        &self,
        path: &Path,
    ) -> Result<Vec<PathBuf>, SigningVaultError> {
        let mut files = self.files_locator.locate_encrypted_certificates(path)?;
        files.extend(self.files_locator.locate_encrypted_private_keys(path)?);

        Ok(files)
    }
}

/// `A.cer` -> `A.cer.encrypted`.
fn encrypted_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);

    PathBuf::from(name)
}

/// `A.cer.encrypted` -> `A.cer`.
fn decrypted_sibling(path: &Path) -> PathBuf {
    path.with_extension("")
}

fn encode_encrypted(iv: &[u8; IV_LENGTH], plaintext: &[u8], master_key: &MasterKey) -> String {
    let mut ciphertext = plaintext.to_vec();
    apply_ctr(master_key, iv, &mut ciphertext);

    format!(
        "{}-{}-{}",
        STANDARD_ENGINE.encode(iv),
        STANDARD_ENGINE.encode(&ciphertext),
        STANDARD_ENGINE.encode(Sha256::digest(plaintext))
    )
}

fn apply_ctr(master_key: &MasterKey, iv: &[u8; IV_LENGTH], data: &mut [u8]) {
    let mut cipher = Aes256Ctr::new(master_key.into(), iv.into());
    cipher.apply_keystream(data);
}

fn decode_iv(encoded: &str) -> Result<[u8; IV_LENGTH], SigningVaultError> {
    let bytes = STANDARD_ENGINE
        .decode(encoded)
        .map_err(|_| SigningVaultError::FailedToDecrypt("corrupted data".into()))?;

    bytes
        .try_into()
        .map_err(|_| SigningVaultError::FailedToDecrypt("corrupted data".into()))
}

fn generate_iv() -> Result<[u8; IV_LENGTH], SigningVaultError> {
    let mut iv = [0u8; IV_LENGTH];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| SigningVaultError::IvGenerationFailed(e.to_string()))?;

    Ok(iv)
}

#[cfg(test)]
mod test {
    use {super::*, crate::test_support::VaultFixture};

    #[test]
    fn data_round_trips() {
        let cipher = SigningCipher::new();
        let key: MasterKey = Sha256::digest(b"secret").into();

        let plaintext = b"arbitrary \x00 binary \xff bytes".to_vec();
        let encrypted = cipher.encrypt_data(&plaintext, &key).unwrap();

        assert_eq!(cipher.decrypt_data(&encrypted, &key).unwrap(), plaintext);
    }

    #[test]
    fn legacy_two_field_format_still_decrypts() {
        let cipher = SigningCipher::new();
        let key: MasterKey = Sha256::digest(b"secret").into();

        let encrypted = cipher.encrypt_data(b"legacy content", &key).unwrap();
        let text = String::from_utf8(encrypted).unwrap();
        let legacy = text.rsplit_once('-').unwrap().0.to_string();

        assert_eq!(
            cipher.decrypt_data(legacy.as_bytes(), &key).unwrap(),
            b"legacy content"
        );
    }

    #[test]
    fn wrong_key_is_detected_by_checksum() {
        let cipher = SigningCipher::new();
        let key: MasterKey = Sha256::digest(b"right").into();
        let other: MasterKey = Sha256::digest(b"wrong").into();

        let encrypted = cipher.encrypt_data(b"content", &key).unwrap();

        assert!(matches!(
            cipher.decrypt_data(&encrypted, &other),
            Err(SigningVaultError::FailedToDecrypt(_))
        ));
    }

    #[test]
    fn directory_round_trip() {
        let fixture = VaultFixture::new();
        fixture.write_signing_file("A.cer", b"certificate bytes");
        fixture.write_signing_file("A.p12", b"private key bytes");

        let cipher = SigningCipher::new();
        cipher.encrypt_signing(fixture.root(), false).unwrap();

        assert!(!fixture.signing_path("A.cer").exists());
        assert!(fixture.signing_path("A.cer.encrypted").exists());

        cipher.decrypt_signing(fixture.root(), false).unwrap();

        assert_eq!(fixture.read_signing_file("A.cer"), b"certificate bytes");
        assert_eq!(fixture.read_signing_file("A.p12"), b"private key bytes");
        assert!(!fixture.signing_path("A.cer.encrypted").exists());
    }

    #[test]
    fn encrypting_twice_is_byte_identical() {
        let fixture = VaultFixture::new();
        fixture.write_signing_file("A.cer", b"certificate bytes");
        fixture.write_signing_file("A.p12", b"private key bytes");

        let cipher = SigningCipher::new();
        cipher.encrypt_signing(fixture.root(), true).unwrap();

        let first_cer = fixture.read_signing_file("A.cer.encrypted");
        let first_p12 = fixture.read_signing_file("A.p12.encrypted");

        cipher.encrypt_signing(fixture.root(), true).unwrap();

        assert_eq!(fixture.read_signing_file("A.cer.encrypted"), first_cer);
        assert_eq!(fixture.read_signing_file("A.p12.encrypted"), first_p12);
    }

    #[test]
    fn changed_plaintext_is_re_encrypted_and_siblings_are_not() {
        let fixture = VaultFixture::new();
        fixture.write_signing_file("A.cer", b"certificate bytes");
        fixture.write_signing_file("A.p12", b"private key bytes");

        let cipher = SigningCipher::new();
        cipher.encrypt_signing(fixture.root(), true).unwrap();

        let first_cer = fixture.read_signing_file("A.cer.encrypted");
        let first_p12 = fixture.read_signing_file("A.p12.encrypted");

        fixture.write_signing_file("A.cer", b"certificate bytes v2");
        cipher.encrypt_signing(fixture.root(), true).unwrap();

        assert_ne!(fixture.read_signing_file("A.cer.encrypted"), first_cer);
        assert_eq!(fixture.read_signing_file("A.p12.encrypted"), first_p12);
    }

    #[test]
    fn orphaned_ciphertext_is_removed() {
        let fixture = VaultFixture::new();
        fixture.write_signing_file("A.cer", b"certificate bytes");
        fixture.write_signing_file("A.p12", b"private key bytes");

        let cipher = SigningCipher::new();
        cipher.encrypt_signing(fixture.root(), true).unwrap();

        std::fs::remove_file(fixture.signing_path("A.p12")).unwrap();
        cipher.encrypt_signing(fixture.root(), false).unwrap();

        assert!(fixture.signing_path("A.cer.encrypted").exists());
        assert!(!fixture.signing_path("A.p12.encrypted").exists());
    }

    #[test]
    fn decrypt_removes_stale_plaintext() {
        let fixture = VaultFixture::new();
        fixture.write_signing_file("A.cer", b"certificate bytes");
        fixture.write_signing_file("A.p12", b"private key bytes");

        let cipher = SigningCipher::new();
        cipher.encrypt_signing(fixture.root(), false).unwrap();

        // A leftover plaintext with no encrypted counterpart.
        fixture.write_signing_file("Old.cer", b"stale");

        cipher.decrypt_signing(fixture.root(), true).unwrap();

        assert!(!fixture.signing_path("Old.cer").exists());
        assert_eq!(fixture.read_signing_file("A.cer"), b"certificate bytes");
    }

    #[test]
    fn empty_directory_decrypt_is_a_noop() {
        let fixture = VaultFixture::new();

        let cipher = SigningCipher::new();
        cipher.decrypt_signing(fixture.root(), false).unwrap();
    }

    #[test]
    fn empty_directory_encrypt_is_guarded() {
        let fixture = VaultFixture::new();

        let cipher = SigningCipher::new();
        assert!(matches!(
            cipher.encrypt_signing(fixture.root(), false),
            Err(SigningVaultError::SigningKeyFilesEmpty(_))
        ));
    }

    #[test]
    fn corrupted_framing_fails_without_partial_output() {
        let fixture = VaultFixture::new();
        fixture.write_signing_file("A.cer", b"certificate bytes");
        fixture.write_signing_file("B.cer", b"other bytes");

        let cipher = SigningCipher::new();
        cipher.encrypt_signing(fixture.root(), false).unwrap();

        fixture.write_signing_file("A.cer.encrypted", b"no separator here");

        assert!(matches!(
            cipher.decrypt_signing(fixture.root(), false),
            Err(SigningVaultError::FailedToDecrypt(_))
        ));

        // The healthy sibling must not have been written either.
        assert!(!fixture.signing_path("A.cer").exists());
        assert!(!fixture.signing_path("B.cer").exists());
    }

    #[test]
    fn master_key_is_trimmed_and_hashed() {
        let fixture = VaultFixture::with_master_key("s3cret\n");

        let cipher = SigningCipher::new();
        assert_eq!(cipher.read_master_key(fixture.root()).unwrap(), "s3cret");
        assert_eq!(
            cipher.master_key(fixture.root()).unwrap(),
            <MasterKey>::from(Sha256::digest(b"s3cret"))
        );
    }

    #[test]
    fn missing_master_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();

        let cipher = SigningCipher::new();
        assert!(matches!(
            cipher.read_master_key(dir.path()),
            Err(SigningVaultError::MasterKeyNotFound(_))
        ));
    }
}
