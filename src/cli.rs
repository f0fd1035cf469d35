// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        cipher::SigningCipher,
        interactor::{BuildTarget, SigningInteractor},
        SigningVaultError,
    },
    clap::{ArgAction, Args, Parser, Subcommand},
    log::LevelFilter,
    std::path::PathBuf,
};

const INSTALL_ABOUT: &str = "\
Install signing assets from the encrypted store onto this machine.

The store is decrypted in place, provisioning profiles are copied into
~/Library/Developer/Xcode/UserData/Provisioning Profiles under their UUIDs,
and certificates with their private keys are imported into the project
keychain at <root>/CodeSigning/CodeSigning.keychain. The store is then
re-encrypted and the keychain locked, whether or not installation
succeeded.

By default everything in the store is installed. Pass --target to restrict
installation to specific build targets, optionally narrowed to particular
configurations:

    signing-vault install --target App
    signing-vault install --target App:Debug,Release --target Widget
";

const EXPORT_ABOUT: &str = "\
Write JSON summaries of the store contents.

Two files are produced under <root>/CodeSigning/:

ProvisioningProfiles.json
   Profiles keyed by target, then configuration: name, UUID, app ID,
   team IDs, platforms, expiration date and developer certificate
   fingerprints.
Certificates.json
   Certificate name, fingerprint, development team and revocation flag.
   Key material and file paths are never exported.

The store is decrypted for the duration of the export and re-encrypted
afterwards.
";

fn parse_build_target(value: &str) -> Result<BuildTarget, String> {
    let (name, configurations) = match value.split_once(':') {
        Some((name, configurations)) => (
            name,
            configurations
                .split(',')
                .filter(|configuration| !configuration.is_empty())
                .map(ToString::to_string)
                .collect(),
        ),
        None => (value, vec![]),
    };

    if name.is_empty() {
        return Err("target name must not be empty".to_string());
    }

    Ok(BuildTarget {
        name: name.to_string(),
        configurations,
    })
}

#[derive(Args)]
struct PathArgs {
    /// Directory to resolve the project root and Signing directory from
    #[arg(short = 'p', long, default_value = ".")]
    path: PathBuf,
}

#[derive(Args)]
struct Encrypt {
    #[command(flatten)]
    path: PathArgs,

    /// Keep the plaintext files next to the encrypted ones
    #[arg(long)]
    keep_files: bool,
}

fn command_encrypt(args: &Encrypt) -> Result<(), SigningVaultError> {
    SigningCipher::new().encrypt_signing(&args.path.path, args.keep_files)
}

#[derive(Args)]
struct Decrypt {
    #[command(flatten)]
    path: PathArgs,

    /// Keep the encrypted files next to the decrypted ones
    #[arg(long)]
    keep_files: bool,
}

fn command_decrypt(args: &Decrypt) -> Result<(), SigningVaultError> {
    SigningCipher::new().decrypt_signing(&args.path.path, args.keep_files)
}

#[derive(Args)]
struct Install {
    #[command(flatten)]
    path: PathArgs,

    /// Build target to install for, as NAME or NAME:CONFIG[,CONFIG...].
    /// Can be specified multiple times
    #[arg(long = "target", value_parser = parse_build_target)]
    targets: Vec<BuildTarget>,
}

fn command_install(args: &Install) -> Result<(), SigningVaultError> {
    SigningInteractor::new().install(&args.path.path, &args.targets)
}

#[derive(Args)]
struct Export {
    #[command(flatten)]
    path: PathArgs,
}

fn command_export(args: &Export) -> Result<(), SigningVaultError> {
    SigningInteractor::new().export(&args.path.path)
}

#[derive(Subcommand)]
enum Subcommands {
    /// Encrypt certificates and private keys in the Signing directory
    Encrypt(Encrypt),

    /// Decrypt certificates and private keys in the Signing directory
    Decrypt(Decrypt),

    /// Install provisioning profiles and certificates from the store
    #[command(long_about = INSTALL_ABOUT)]
    Install(Install),

    /// Write JSON summaries of the store contents
    #[command(long_about = EXPORT_ABOUT)]
    Export(Export),
}

/// Manage a repository-committed store of encrypted code signing assets
#[derive(Parser)]
#[command(author, version, arg_required_else_help = true)]
struct Cli {
    /// Increase logging verbosity. Can be specified multiple times
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Subcommands,
}

pub fn main_impl() -> Result<(), SigningVaultError> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match &cli.command {
        Subcommands::Encrypt(args) => command_encrypt(args),
        Subcommands::Decrypt(args) => command_decrypt(args),
        Subcommands::Install(args) => command_install(args),
        Subcommands::Export(args) => command_export(args),
    }
}
