use anyhow::{bail, Context};
use bitcoin::NetworkKind;
use clap::{Parser, Subcommand};
use hd_keystore::utils::logging;
use hd_keystore::{
    AbsoluteKeypath, BitcoinCoin, Coin, Keystore, KeystoreSettings, ScriptType, SigningMode,
    SoftwareKeystore,
};
use serde_json::json;
use zeroize::Zeroizing;

/// Derive public keys and keystore identifiers from a seed
#[derive(Parser)]
#[command(name = "hd-keystore", version)]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extended public key at an absolute keypath
    Xpub {
        #[command(flatten)]
        source: SeedSource,

        #[arg(long)]
        path: AbsoluteKeypath,

        /// Encode as tpub
        #[arg(long)]
        testnet: bool,
    },
    /// Stable keystore identifier
    Identifier {
        #[command(flatten)]
        source: SeedSource,

        /// Use the multisig identity root
        #[arg(long)]
        multisig: bool,
    },
    /// Check an address keypath against a script type
    CheckPath {
        #[arg(long)]
        path: AbsoluteKeypath,

        #[arg(long)]
        script_type: ScriptType,

        #[arg(long)]
        testnet: bool,

        /// Use the strict preset
        #[arg(long)]
        strict: bool,
    },
}

#[derive(clap::Args)]
struct SeedSource {
    /// Hex-encoded BIP32 seed (16-64 bytes)
    #[arg(long, conflicts_with = "mnemonic")]
    seed: Option<String>,

    /// BIP39 mnemonic phrase
    #[arg(long)]
    mnemonic: Option<String>,

    #[arg(long, default_value = "")]
    passphrase: String,
}

impl SeedSource {
    fn open(&self, mode: SigningMode, settings: &KeystoreSettings) -> anyhow::Result<SoftwareKeystore> {
        let keystore = match (&self.seed, &self.mnemonic) {
            (Some(seed), None) => {
                let bytes = Zeroizing::new(hex::decode(seed.trim()).context("seed is not valid hex")?);
                SoftwareKeystore::from_seed(&bytes, mode)?
            }
            (None, Some(phrase)) => SoftwareKeystore::from_mnemonic(phrase, &self.passphrase, mode)?,
            _ => bail!("provide exactly one of --seed or --mnemonic"),
        };
        Ok(keystore.with_settings(settings.clone()))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = KeystoreSettings::from_env()?;
    logging::apply_settings(&settings);
    for warning in settings.validate() {
        hd_keystore::log_warn!("cli", warning);
    }

    match cli.command {
        Command::Xpub { source, path, testnet } => {
            let network = if testnet { NetworkKind::Test } else { NetworkKind::Main };
            let keystore = source
                .open(SigningMode::SingleSig, &settings)?
                .with_network(network);
            let xpub = keystore.extended_public_key(&path)?;

            if cli.json {
                let out = json!({
                    "keypath": path.to_string(),
                    "xpub": xpub.to_string(),
                    "public_key": hex::encode(xpub.public_key.serialize()),
                    "fingerprint": xpub.fingerprint().to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", xpub);
            }
        }
        Command::Identifier { source, multisig } => {
            let mode = if multisig { SigningMode::Multisig } else { SigningMode::SingleSig };
            let keystore = source.open(mode, &settings)?;
            let identifier = keystore.identifier()?;

            if cli.json {
                let out = json!({
                    "identifier": identifier,
                    "mode": mode,
                    "root": AbsoluteKeypath::identity_root(mode).to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", identifier);
            }
        }
        Command::CheckPath { path, script_type, testnet, strict } => {
            let coin = if testnet { BitcoinCoin::testnet() } else { BitcoinCoin::mainnet() };
            let check_settings = if strict { KeystoreSettings::strict() } else { settings };
            let result = coin.validate_keypath(&path, script_type, &check_settings);

            if cli.json {
                let out = json!({
                    "keypath": path.to_string(),
                    "script_type": script_type,
                    "coin": coin.code(),
                    "valid": result.is_ok(),
                    "error": result.as_ref().err(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if let Err(err) = &result {
                println!("invalid: {}", err);
            } else {
                println!("valid");
            }

            if result.is_err() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
