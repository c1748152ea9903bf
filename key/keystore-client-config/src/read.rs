// Copyright (c) Microsoft. All rights reserved.

/// Reads `config_path` and applies every `*.toml` file in `config_directory_path` on top of it,
/// in file name order.
///
/// Either may be missing. If both are, the result is `TConfig`'s deserialization of an empty table.
pub fn read_config<TConfig>(
    config_path: &std::path::Path,
    config_directory_path: &std::path::Path,
) -> Result<TConfig, Error>
where
    TConfig: serde::de::DeserializeOwned,
{
    let mut config = match read_toml(config_path) {
        Ok(config) => config,
        Err(Error::ReadConfig(_, err))
            if matches!(
                err.downcast_ref::<std::io::Error>(),
                Some(err) if err.kind() == std::io::ErrorKind::NotFound
            ) =>
        {
            toml::Value::Table(Default::default())
        }
        Err(err) => return Err(err),
    };

    match std::fs::read_dir(config_directory_path) {
        Ok(entries) => {
            let mut patch_paths = vec![];
            for entry in entries {
                let entry = entry.map_err(|err| {
                    Error::ReadConfig(Some(config_directory_path.to_owned()), Box::new(err))
                })?;

                let entry_file_type = entry.file_type().map_err(|err| {
                    Error::ReadConfig(Some(config_directory_path.to_owned()), Box::new(err))
                })?;
                if !entry_file_type.is_file() {
                    continue;
                }

                let patch_path = entry.path();
                if patch_path.extension().and_then(std::ffi::OsStr::to_str) != Some("toml") {
                    continue;
                }

                patch_paths.push(patch_path);
            }
            patch_paths.sort();

            for patch_path in patch_paths {
                let patch = read_toml(&patch_path)?;
                merge_toml(&mut config, patch);
            }
        }

        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),

        Err(err) => {
            return Err(Error::ReadConfig(
                Some(config_directory_path.to_owned()),
                Box::new(err),
            ))
        }
    }

    let config: TConfig = serde::Deserialize::deserialize(config)
        .map_err(|err| Error::ReadConfig(None, Box::new(err)))?;

    Ok(config)
}

fn read_toml(path: &std::path::Path) -> Result<toml::Value, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| Error::ReadConfig(Some(path.to_owned()), Box::new(err)))?;
    let value = toml::from_str(&contents)
        .map_err(|err| Error::ReadConfig(Some(path.to_owned()), Box::new(err)))?;
    Ok(value)
}

/// Tables are merged key by key, arrays are concatenated, and anything else in `patch` replaces `base`.
fn merge_toml(base: &mut toml::Value, patch: toml::Value) {
    if let toml::Value::Table(base) = base {
        if let toml::Value::Table(patch) = patch {
            for (key, value) in patch {
                // The placeholder is overwritten by `value` since it is not a table or array.
                let original_value = base.entry(key).or_insert(toml::Value::Boolean(false));
                merge_toml(original_value, value);
            }

            return;
        }
    }

    if let toml::Value::Array(base) = base {
        if let toml::Value::Array(patch) = patch {
            base.extend(patch);
            return;
        }
    }

    *base = patch;
}

#[derive(Debug)]
pub enum Error {
    ReadConfig(
        Option<std::path::PathBuf>,
        Box<dyn std::error::Error + Send + Sync>,
    ),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ReadConfig(Some(path), _) => {
                write!(f, "could not read config from {}", path.display())
            }
            Error::ReadConfig(None, _) => f.write_str("could not read config"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ReadConfig(_, err) => Some(&**err),
        }
    }
}

#[cfg(test)]
mod tests {
    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "keystore-client-config-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn merge_toml() {
        let mut base: toml::Value = toml::from_str(
            r#"
timeout_secs = 5
names = ["a"]

[endpoints]
keystored = "unix:///run/keystore/keystored.sock"
"#,
        )
        .unwrap();

        let patch: toml::Value = toml::from_str(
            r#"
names = ["b"]

[endpoints]
keystored = "http://localhost:8901"
"#,
        )
        .unwrap();

        super::merge_toml(&mut base, patch);

        let expected: toml::Value = toml::from_str(
            r#"
timeout_secs = 5
names = ["a", "b"]

[endpoints]
keystored = "http://localhost:8901"
"#,
        )
        .unwrap();
        assert_eq!(expected, base);
    }

    #[test]
    fn drop_ins_apply_in_name_order() {
        let dir = scratch_dir("drop-ins");
        let config_path = dir.join("client.toml");
        let config_directory_path = dir.join("client.d");
        std::fs::create_dir_all(&config_directory_path).unwrap();

        std::fs::write(&config_path, "timeout_secs = 5\n").unwrap();
        std::fs::write(
            config_directory_path.join("10-endpoint.toml"),
            "[endpoints]\nkeystored = \"http://localhost:8901\"\n",
        )
        .unwrap();
        std::fs::write(
            config_directory_path.join("20-timeout.toml"),
            "timeout_secs = 60\n",
        )
        .unwrap();
        std::fs::write(
            config_directory_path.join("30-ignored.txt"),
            "timeout_secs = 1\n",
        )
        .unwrap();

        let config: crate::Config =
            super::read_config(&config_path, &config_directory_path).unwrap();
        assert_eq!(config.timeout_secs, Some(60));
        assert_eq!(
            config.endpoints.keystored,
            http_common::Connector::Http {
                host: "localhost".into(),
                port: 8901,
            }
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_files_give_defaults() {
        let dir = scratch_dir("missing");

        let config: crate::Config =
            super::read_config(&dir.join("client.toml"), &dir.join("client.d")).unwrap();
        assert_eq!(config, crate::Config::default());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_file_names_path() {
        let dir = scratch_dir("malformed");
        let config_path = dir.join("client.toml");
        std::fs::write(&config_path, "timeout_secs = ").unwrap();

        let err = super::read_config::<crate::Config>(&config_path, &dir.join("client.d"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("could not read config from {}", config_path.display())
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
