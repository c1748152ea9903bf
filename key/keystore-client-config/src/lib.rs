// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::default_trait_access, clippy::missing_errors_doc)]

mod read;
pub use read::{read_config, Error};

pub const CONFIG_PATH_ENV_VAR: &str = "KEYSTORE_CLIENT_CONFIG";
pub const CONFIG_DIRECTORY_PATH_ENV_VAR: &str = "KEYSTORE_CLIENT_CONFIG_DIR";

const DEFAULT_CONFIG_PATH: &str = "/etc/keystore/client.toml";
const DEFAULT_CONFIG_DIRECTORY_PATH: &str = "/etc/keystore/client.d";

/// Configuration of a process that talks to the keystore service.
#[derive(Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Map of service names to endpoint URIs.
    #[serde(default)]
    pub endpoints: Endpoints,

    /// Bound on every read and write to the service, in seconds. Unset or 0 means no bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Reads the config from the paths named by `KEYSTORE_CLIENT_CONFIG` and
    /// `KEYSTORE_CLIENT_CONFIG_DIR`, or their defaults.
    ///
    /// A missing config file is not an error; the defaults are used and drop-ins still apply.
    pub fn load() -> Result<Self, Error> {
        let config_path: std::path::PathBuf = std::env::var_os(CONFIG_PATH_ENV_VAR)
            .map_or_else(|| DEFAULT_CONFIG_PATH.into(), Into::into);
        let config_directory_path: std::path::PathBuf =
            std::env::var_os(CONFIG_DIRECTORY_PATH_ENV_VAR)
                .map_or_else(|| DEFAULT_CONFIG_DIRECTORY_PATH.into(), Into::into);

        read_config(&config_path, &config_directory_path)
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        match self.timeout_secs {
            None | Some(0) => None,
            Some(secs) => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

/// Map of service names to endpoint URIs.
#[derive(Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Endpoints {
    /// The endpoint that the keystore service listens on.
    pub keystored: http_common::Connector,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            keystored: http_common::Connector::Unix {
                socket_path: std::path::Path::new("/run/keystore/keystored.sock").into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn parse_config() {
        let actual = r#"
timeout_secs = 30

[endpoints]
keystored = "http://localhost:8901"
"#;
        let actual: super::Config = toml::from_str(actual).unwrap();

        assert_eq!(
            actual,
            super::Config {
                endpoints: super::Endpoints {
                    keystored: http_common::Connector::Http {
                        host: "localhost".into(),
                        port: 8901,
                    },
                },
                timeout_secs: Some(30),
            }
        );
        assert_eq!(actual.timeout(), Some(std::time::Duration::from_secs(30)));
    }

    #[test]
    fn parse_empty_config() {
        let actual: super::Config = toml::from_str("").unwrap();

        assert_eq!(
            actual,
            super::Config {
                endpoints: super::Endpoints {
                    keystored: http_common::Connector::Unix {
                        socket_path: std::path::Path::new("/run/keystore/keystored.sock").into()
                    },
                },
                timeout_secs: None,
            }
        );
        assert_eq!(actual.timeout(), None);
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let actual: super::Config = toml::from_str("timeout_secs = 0").unwrap();
        assert_eq!(actual.timeout(), None);
    }

    #[test]
    fn reject_unsupported_endpoint() {
        let _ = toml::from_str::<super::Config>(
            r#"
[endpoints]
keystored = "fd://keystored.socket"
"#,
        )
        .unwrap_err();
    }
}
