// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::default_trait_access,
    clippy::let_unit_value,
    clippy::too_many_lines
)]

use keystore_client::KeystoreClient;
use keystore_common::{
    Algorithm, AuthorizationSetBuilder, BlockMode, Digest, KeyCharacteristics, KeyFormat,
    KeyOrigin, KeyParameterValue, Padding, Purpose, Tag,
};

fn main() -> Result<(), Error> {
    logger::try_init()?;

    let command = <Command as clap::Parser>::parse();

    let config = keystore_client_config::Config::load()?;
    log::debug!("using keystore service at {}", config.endpoints.keystored);
    let client = keystore_client::Client::from_config(&config);

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    run(&client, command, &mut stdout)
}

fn run(
    client: &dyn KeystoreClient,
    command: Command,
    out: &mut dyn std::io::Write,
) -> Result<(), Error> {
    match command {
        Command::List { prefix } => {
            let names = client.list_keys(&prefix).ok_or("could not list keys")?;
            for name in names {
                writeln!(out, "{}", name)?;
            }
        }

        Command::Exists { name } => writeln!(out, "{}", client.key_exists(&name))?,

        Command::Characteristics { name } => {
            let characteristics = client
                .get_key_characteristics(&name)
                .map_err(failed("get_key_characteristics"))?;
            write_characteristics(out, &characteristics)?;
        }

        Command::Generate {
            name,
            algorithm,
            size,
            purposes,
            digests,
            paddings,
            block_modes,
            min_mac_length,
            caller_nonce,
        } => {
            let mut params = AuthorizationSetBuilder::new()
                .algorithm(algorithm)
                .key_size(size);
            for purpose in purposes {
                params = params.purpose(purpose);
            }
            for digest in digests {
                params = params.digest(digest);
            }
            for padding in paddings {
                params = params.padding(padding);
            }
            for block_mode in block_modes {
                params = params.block_mode(block_mode);
            }
            if let Some(min_mac_length) = min_mac_length {
                params = params.min_mac_length(min_mac_length);
            }
            if caller_nonce {
                params = params.caller_nonce();
            }

            let characteristics = client
                .generate_key(&name, &params.build())
                .map_err(failed("generate_key"))?;
            log::info!("generated key {:?}", name);
            write_characteristics(out, &characteristics)?;
        }

        Command::Export { name, out_file } => {
            let public_key = client
                .export_key(KeyFormat::X509, &name)
                .map_err(failed("export_key"))?;

            match out_file {
                Some(out_file) => std::fs::write(out_file, &public_key)?,
                None => {
                    let public_key = openssl::pkey::PKey::public_key_from_der(&public_key)?;
                    out.write_all(&public_key.public_key_to_pem()?)?;
                }
            }
        }

        Command::Delete { name } => {
            client.delete_key(&name).map_err(failed("delete_key"))?;
            log::info!("deleted key {:?}", name);
        }

        Command::DeleteAll => {
            client.delete_all_keys().map_err(failed("delete_all_keys"))?;
            log::info!("deleted all keys");
        }

        Command::AddEntropy { file } => {
            let entropy = std::fs::read(file)?;
            client
                .add_entropy(&entropy)
                .map_err(failed("add_entropy"))?;
        }
    }

    Ok(())
}

fn write_characteristics(
    out: &mut dyn std::io::Write,
    characteristics: &KeyCharacteristics,
) -> std::io::Result<()> {
    for (enforcement, set) in [
        ("hardware", &characteristics.hardware_enforced),
        ("software", &characteristics.software_enforced),
    ] {
        for param in set {
            writeln!(
                out,
                "{}\t{}\t{}",
                enforcement,
                param.tag,
                describe(param.tag, &param.value)
            )?;
        }
    }

    Ok(())
}

fn describe(tag: Tag, value: &KeyParameterValue) -> String {
    fn name<T>(value: u32) -> String
    where
        T: TryFrom<u32> + std::fmt::Display,
    {
        T::try_from(value).map_or_else(|_| value.to_string(), |value| value.to_string())
    }

    match (tag, value) {
        (Tag::PURPOSE, KeyParameterValue::Enum(value)) => name::<Purpose>(*value),
        (Tag::ALGORITHM, KeyParameterValue::Enum(value)) => name::<Algorithm>(*value),
        (Tag::DIGEST, KeyParameterValue::Enum(value)) => name::<Digest>(*value),
        (Tag::PADDING, KeyParameterValue::Enum(value)) => name::<Padding>(*value),
        (Tag::BLOCK_MODE, KeyParameterValue::Enum(value)) => name::<BlockMode>(*value),
        (Tag::ORIGIN, KeyParameterValue::Enum(value)) => name::<KeyOrigin>(*value),
        (_, KeyParameterValue::Bytes(value)) => {
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, value)
        }
        (_, value) => value.to_string(),
    }
}

/// A keystore call that failed, reported with its collapsed status.
#[derive(Debug)]
struct CallError {
    operation: &'static str,
    err: keystore_common::Error,
}

fn failed(operation: &'static str) -> impl FnOnce(keystore_common::Error) -> CallError {
    move |err| CallError { operation, err }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed with status {}",
            self.operation,
            self.err.status()
        )
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

struct Error(Box<dyn std::error::Error>, backtrace::Backtrace);

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(err) = source {
            writeln!(f, "caused by: {}", err)?;
            source = err.source();
        }

        writeln!(f)?;

        writeln!(f, "{:?}", self.1)?;

        Ok(())
    }
}

impl<E> From<E> for Error
where
    E: Into<Box<dyn std::error::Error>>,
{
    fn from(err: E) -> Self {
        Error(err.into(), Default::default())
    }
}

/// Manage keys held by the keystore service.
///
/// The service endpoint is read from the file named by KEYSTORE_CLIENT_CONFIG
/// (default /etc/keystore/client.toml) and the drop-ins in KEYSTORE_CLIENT_CONFIG_DIR
/// (default /etc/keystore/client.d).
#[derive(clap::Parser)]
#[command(name = "keystorectl")]
enum Command {
    /// List the names of keys, one per line.
    List {
        /// Only list keys whose names start with this prefix.
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Print whether a key exists.
    Exists { name: String },

    /// Print the hardware- and software-enforced characteristics of a key.
    Characteristics { name: String },

    /// Generate a new key.
    Generate {
        name: String,

        /// One of "rsa", "ec", "aes" or "hmac".
        #[arg(long)]
        algorithm: Algorithm,

        /// Key size in bits. For EC keys, one of 256, 384 or 521.
        #[arg(long)]
        size: u32,

        /// An allowed purpose: "encrypt", "decrypt", "sign" or "verify". May be repeated.
        #[arg(long = "purpose", required = true)]
        purposes: Vec<Purpose>,

        /// An allowed digest, eg "sha256". May be repeated.
        #[arg(long = "digest")]
        digests: Vec<Digest>,

        /// An allowed padding mode, eg "rsa-pss" or "pkcs7". May be repeated.
        #[arg(long = "padding")]
        paddings: Vec<Padding>,

        /// An allowed AES block mode: "ecb", "cbc" or "gcm". May be repeated.
        #[arg(long = "block-mode")]
        block_modes: Vec<BlockMode>,

        /// Minimum MAC length in bits for HMAC and AES-GCM keys.
        #[arg(long)]
        min_mac_length: Option<u32>,

        /// Allow callers to supply their own nonce or IV.
        #[arg(long)]
        caller_nonce: bool,
    },

    /// Export the public key of an RSA or EC key as SubjectPublicKeyInfo.
    Export {
        name: String,

        /// Write DER to this file instead of PEM to stdout.
        #[arg(long = "out")]
        out_file: Option<std::path::PathBuf>,
    },

    /// Delete a key.
    Delete { name: String },

    /// Delete every key.
    DeleteAll,

    /// Mix the contents of a file into the service's random number generator.
    AddEntropy { file: std::path::PathBuf },
}

#[cfg(test)]
mod tests {
    use keystore_client::KeystoreClient;

    fn parse(args: &[&str]) -> super::Command {
        <super::Command as clap::Parser>::try_parse_from(
            std::iter::once("keystorectl").chain(args.iter().copied()),
        )
        .unwrap()
    }

    fn run(client: &dyn KeystoreClient, args: &[&str]) -> Result<String, super::Error> {
        let mut out = vec![];
        super::run(client, parse(args), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn command_definition() {
        <super::Command as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn generate_requires_purpose() {
        let result = <super::Command as clap::Parser>::try_parse_from([
            "keystorectl",
            "generate",
            "k1",
            "--algorithm",
            "ec",
            "--size",
            "256",
        ]);
        assert!(result.is_err());

        let result = <super::Command as clap::Parser>::try_parse_from([
            "keystorectl",
            "generate",
            "k1",
            "--algorithm",
            "dsa",
            "--size",
            "256",
            "--purpose",
            "sign",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn generate_then_characteristics() {
        let client = test_common::client::MockKeystoreClient::default();

        let generated = run(
            &client,
            &[
                "generate",
                "k1",
                "--algorithm",
                "EC",
                "--size",
                "256",
                "--purpose",
                "sign",
                "--purpose",
                "verify",
                "--digest",
                "sha256",
            ],
        )
        .unwrap();

        let lines: Vec<&str> = generated.lines().collect();
        assert!(lines.contains(&"hardware\tALGORITHM\tec"));
        assert!(lines.contains(&"hardware\tKEY_SIZE\t256"));
        assert!(lines.contains(&"hardware\tPURPOSE\tsign"));
        assert!(lines.contains(&"hardware\tPURPOSE\tverify"));
        assert!(lines.contains(&"hardware\tDIGEST\tsha256"));
        assert!(lines.contains(&"software\tORIGIN\tgenerated"));

        let characteristics = run(&client, &["characteristics", "k1"]).unwrap();
        assert_eq!(characteristics, generated);

        assert_eq!(run(&client, &["exists", "k1"]).unwrap(), "true\n");
        assert_eq!(run(&client, &["exists", "k2"]).unwrap(), "false\n");
    }

    #[test]
    fn list_and_delete() {
        let client = test_common::client::MockKeystoreClient::default();
        let params = keystore_common::AuthorizationSetBuilder::new()
            .aes_encryption_key(128)
            .build();
        for name in ["app/a", "app/b", "other"] {
            client.generate_key(name, &params).unwrap();
        }

        assert_eq!(run(&client, &["list"]).unwrap(), "app/a\napp/b\nother\n");
        assert_eq!(
            run(&client, &["list", "--prefix", "app/"]).unwrap(),
            "app/a\napp/b\n"
        );

        run(&client, &["delete", "app/a"]).unwrap();
        assert_eq!(run(&client, &["list"]).unwrap(), "app/b\nother\n");

        let err = run(&client, &["delete", "app/a"]).unwrap_err();
        assert_eq!(err.0.to_string(), "delete_key failed with status 7");

        run(&client, &["delete-all"]).unwrap();
        assert_eq!(run(&client, &["list"]).unwrap(), "");
    }

    #[test]
    fn export_prints_pem() {
        let client = test_common::client::MockKeystoreClient::default();
        let params = keystore_common::AuthorizationSetBuilder::new()
            .ec_signing_key(384)
            .build();
        client.generate_key("ec", &params).unwrap();

        let pem = run(&client, &["export", "ec"]).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(pem.ends_with("-----END PUBLIC KEY-----\n"));
        assert!(pem.lines().all(|line| line.len() <= 64));

        let public_key = openssl::pkey::PKey::public_key_from_pem(pem.as_bytes()).unwrap();
        assert_eq!(public_key.bits(), 384);
        assert_eq!(
            public_key.public_key_to_der().unwrap(),
            client.export_key(keystore_common::KeyFormat::X509, "ec").unwrap()
        );

        let params = keystore_common::AuthorizationSetBuilder::new()
            .aes_encryption_key(128)
            .build();
        client.generate_key("aes", &params).unwrap();
        let err = run(&client, &["export", "aes"]).unwrap_err();
        assert_eq!(err.0.to_string(), "export_key failed with status -17");
    }

    #[test]
    fn unreachable_service() {
        let mut client = test_common::client::MockKeystoreClient::default();
        client.transport_failure = true;

        let err = run(&client, &["list"]).unwrap_err();
        assert_eq!(err.0.to_string(), "could not list keys");

        let err = run(&client, &["delete-all"]).unwrap_err();
        assert_eq!(err.0.to_string(), "delete_all_keys failed with status -1000");

        assert_eq!(run(&client, &["exists", "anything"]).unwrap(), "false\n");
    }
}
