use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use serde_json::json;
use spore::{KeyPair, bech32, hex, nip19};

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommand,
}

#[derive(Subcommand, Debug)]
pub enum KeysCommand {
    /// Generate a fresh key pair, or derive one from a BIP-39 mnemonic
    Generate {
        #[arg(long)]
        mnemonic: Option<String>,
        #[arg(long, default_value_t = 0)]
        account: u32,
    },
    /// Show the public key for --secret-key or SPORE_SECRET_KEY
    Public,
    /// Encode 32 hex bytes as npub, nsec or note
    Encode {
        #[arg(long, value_enum)]
        prefix: Prefix,
        hex: String,
    },
    /// Decode an npub, nsec or note back to hex
    Decode { value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Prefix {
    Npub,
    Nsec,
    Note,
}

impl Prefix {
    fn as_str(self) -> &'static str {
        match self {
            Self::Npub => nip19::PUBLIC_KEY_PREFIX,
            Self::Nsec => nip19::SECRET_KEY_PREFIX,
            Self::Note => nip19::NOTE_PREFIX,
        }
    }
}

pub fn run(args: KeysArgs, global: &GlobalArgs) -> Result<()> {
    let output = match args.command {
        KeysCommand::Generate { mnemonic, account } => {
            let keys = match mnemonic {
                Some(words) => KeyPair::from_mnemonic(&words, account)
                    .context("failed to derive key from mnemonic")?,
                None => KeyPair::generate(),
            };
            describe(&keys, true)?
        }
        KeysCommand::Public => {
            let keys = configured_keys(global)?;
            describe(&keys, false)?
        }
        KeysCommand::Encode { prefix, hex: text } => json!({
            "prefix": prefix.as_str(),
            "encoded": encode(prefix, &text)?,
        }),
        KeysCommand::Decode { value } => {
            let (prefix, payload) = bech32::decode(value.trim())
                .with_context(|| format!("failed to decode {value}"))?;
            json!({ "prefix": prefix, "hex": hex::encode(payload) })
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn configured_keys(global: &GlobalArgs) -> Result<KeyPair> {
    let config = crate::client_config(global)?;
    config
        .secret_key
        .context("no secret key: pass --secret-key or set SPORE_SECRET_KEY")
}

fn describe(keys: &KeyPair, include_secret: bool) -> Result<serde_json::Value> {
    let mut output = json!({
        "public_key": keys.public_key_hex(),
        "npub": keys.npub()?,
    });
    if include_secret {
        output["secret_key"] = json!(keys.secret_key_hex());
        output["nsec"] = json!(keys.nsec()?);
    }
    Ok(output)
}

fn encode(prefix: Prefix, text: &str) -> Result<String> {
    let Some(bytes) = hex::decode_array::<32>(text.trim())? else {
        bail!("expected 32 bytes of hex, got {text}");
    };
    let encoded = match prefix {
        Prefix::Npub => nip19::encode_npub(&bytes)?,
        Prefix::Nsec => nip19::encode_nsec(&bytes)?,
        Prefix::Note => nip19::encode_note(&bytes)?,
    };
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Commands, SporeCli};
    use clap::Parser;

    const PUBKEY: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
    const NPUB: &str = "npub180cvv07tjdrrgpa0j7j7tmnyl2yr6yr7l8j4s3evf6u64th6gkwsyjh6w6";

    #[test]
    fn encode_npub_matches_known_vector() -> Result<()> {
        assert_eq!(encode(Prefix::Npub, PUBKEY)?, NPUB);
        Ok(())
    }

    #[test]
    fn encode_rejects_short_hex() {
        assert!(encode(Prefix::Note, "abcd").is_err());
    }

    #[test]
    fn describe_hides_secret_unless_asked() -> Result<()> {
        let keys = KeyPair::generate();
        let public = describe(&keys, false)?;
        assert!(public.get("nsec").is_none());
        assert_eq!(public["public_key"], json!(keys.public_key_hex()));

        let full = describe(&keys, true)?;
        assert_eq!(full["secret_key"], json!(keys.secret_key_hex()));
        Ok(())
    }

    #[test]
    fn parses_encode_with_prefix() -> Result<(), clap::Error> {
        let cli = SporeCli::try_parse_from(["spore", "keys", "encode", "--prefix", "note", PUBKEY])?;
        let Commands::Keys(KeysArgs {
            command: KeysCommand::Encode { prefix, hex },
        }) = cli.command
        else {
            panic!("expected keys encode");
        };
        assert_eq!(prefix, Prefix::Note);
        assert_eq!(hex, PUBKEY);
        Ok(())
    }

    #[test]
    fn generate_defaults_to_account_zero() -> Result<(), clap::Error> {
        let cli = SporeCli::try_parse_from(["spore", "keys", "generate"])?;
        assert!(matches!(
            cli.command,
            Commands::Keys(KeysArgs {
                command: KeysCommand::Generate {
                    mnemonic: None,
                    account: 0
                }
            })
        ));
        Ok(())
    }
}
