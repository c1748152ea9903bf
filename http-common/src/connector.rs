// Copyright (c) Microsoft. All rights reserved.

/// Where the keystore service listens.
#[derive(Clone, Debug, PartialEq)]
pub enum Connector {
    Http {
        host: std::sync::Arc<str>,
        port: u16,
    },
    Unix {
        socket_path: std::sync::Arc<std::path::Path>,
    },
}

#[derive(Debug)]
pub enum Stream {
    Http(std::net::TcpStream),
    Unix(std::os::unix::net::UnixStream),
}

impl Connector {
    pub fn new(uri: &url::Url) -> Result<Self, ConnectorError> {
        match uri.scheme() {
            "http" => {
                let host = uri
                    .host_str()
                    .ok_or_else(|| ConnectorError {
                        uri: uri.clone(),
                        inner: "http URI does not have a host".into(),
                    })?
                    .into();
                let port = uri.port().unwrap_or(80);
                Ok(Connector::Http { host, port })
            }

            "unix" => {
                let socket_path = uri
                    .to_file_path()
                    .map_err(|()| ConnectorError {
                        uri: uri.clone(),
                        inner: "unix URI could not be converted to a file path".into(),
                    })?
                    .into();
                Ok(Connector::Unix { socket_path })
            }

            scheme => Err(ConnectorError {
                uri: uri.clone(),
                inner: format!("unrecognized scheme {:?}", scheme).into(),
            }),
        }
    }

    /// Opens a new stream to the service.
    ///
    /// `timeout` bounds every individual read and write on the stream. `None` blocks indefinitely.
    pub fn connect(&self, timeout: Option<std::time::Duration>) -> std::io::Result<Stream> {
        match self {
            Connector::Http { host, port } => {
                let inner = std::net::TcpStream::connect((&**host, *port))?;
                inner.set_read_timeout(timeout)?;
                inner.set_write_timeout(timeout)?;
                Ok(Stream::Http(inner))
            }

            Connector::Unix { socket_path } => {
                let inner = std::os::unix::net::UnixStream::connect(socket_path)?;
                inner.set_read_timeout(timeout)?;
                inner.set_write_timeout(timeout)?;
                Ok(Stream::Unix(inner))
            }
        }
    }
}

impl std::fmt::Display for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connector::Http { host, port } => write!(f, "http://{}:{}", host, port),
            Connector::Unix { socket_path } => write!(f, "unix://{}", socket_path.display()),
        }
    }
}

impl<'de> serde::Deserialize<'de> for Connector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Connector;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("an endpoint URI")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let uri: url::Url = s.parse().map_err(serde::de::Error::custom)?;
                let connector = Connector::new(&uri).map_err(serde::de::Error::custom)?;
                Ok(connector)
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

impl serde::Serialize for Connector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        let url = match self {
            Connector::Http { host, port } => {
                let mut url: url::Url = "http://foo"
                    .parse()
                    .expect("hard-coded URL parses successfully");
                url.set_host(Some(host)).map_err(|err| {
                    serde::ser::Error::custom(format!("could not set host {:?}: {:?}", host, err))
                })?;
                if *port != 80 {
                    url.set_port(Some(*port)).map_err(|()| {
                        serde::ser::Error::custom(format!("could not set port {:?}", port))
                    })?;
                }
                url
            }

            Connector::Unix { socket_path } => {
                let socket_path = socket_path.to_str().ok_or_else(|| {
                    serde::ser::Error::custom(format!(
                        "socket path {} cannot be serialized as a utf-8 string",
                        socket_path.display()
                    ))
                })?;

                let mut url: url::Url = "unix:///foo"
                    .parse()
                    .expect("hard-coded URL parses successfully");
                url.set_path(socket_path);
                url
            }
        };
        url.serialize(serializer)
    }
}

impl std::io::Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Http(inner) => inner.read(buf),
            Stream::Unix(inner) => inner.read(buf),
        }
    }
}

impl std::io::Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Http(inner) => inner.write(buf),
            Stream::Unix(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Http(inner) => inner.flush(),
            Stream::Unix(inner) => inner.flush(),
        }
    }
}

#[derive(Debug)]
pub struct ConnectorError {
    uri: url::Url,
    inner: Box<dyn std::error::Error + Send + Sync>,
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed URI {:?}", self.uri)
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.inner)
    }
}
