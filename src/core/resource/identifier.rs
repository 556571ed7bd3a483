// src/core/resource/identifier.rs

//! Parsing of resource identifiers. Every function here is pure: the same string
//! yields the same `ResourceId` on every node, so identifiers are never broadcast.

use crate::core::ClusterError;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// A parsed resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// A path on the head's filesystem (`file://path` or a bare path).
    Local(PathBuf),
    /// `tcp://host:port`
    Tcp { host: String, port: u16 },
    /// `tls://host:port`
    Tls { host: String, port: u16 },
    /// `http://…` or `https://…`
    Http(Url),
}

impl ResourceId {
    /// Parses an identifier, dispatching on its scheme.
    pub fn parse(identifier: &str) -> Result<Self, ClusterError> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            return Err(ClusterError::InvalidResourceIdentifier(
                "identifier is empty".into(),
            ));
        }

        let Some((scheme, rest)) = trimmed.split_once("://") else {
            return Ok(ResourceId::Local(PathBuf::from(trimmed)));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "file" => {
                if rest.is_empty() {
                    return Err(ClusterError::InvalidResourceIdentifier(format!(
                        "'{identifier}' has no path"
                    )));
                }
                Ok(ResourceId::Local(PathBuf::from(rest)))
            }
            "tcp" => {
                let (host, port) = parse_host_port(identifier, rest)?;
                Ok(ResourceId::Tcp { host, port })
            }
            "tls" => {
                let (host, port) = parse_host_port(identifier, rest)?;
                Ok(ResourceId::Tls { host, port })
            }
            "http" | "https" => {
                let url = Url::parse(trimmed).map_err(|e| {
                    ClusterError::InvalidResourceIdentifier(format!("'{identifier}': {e}"))
                })?;
                if url.host_str().is_none_or(str::is_empty) {
                    return Err(ClusterError::InvalidResourceIdentifier(format!(
                        "'{identifier}' has no host"
                    )));
                }
                Ok(ResourceId::Http(url))
            }
            "" => Err(ClusterError::InvalidResourceIdentifier(format!(
                "'{identifier}' has an empty scheme"
            ))),
            other => Err(ClusterError::InvalidResourceIdentifier(format!(
                "unsupported scheme '{other}' in '{identifier}'"
            ))),
        }
    }

    /// The scheme family, used as a metrics label and in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceId::Local(_) => "local",
            ResourceId::Tcp { .. } => "tcp",
            ResourceId::Tls { .. } => "tls",
            ResourceId::Http(_) => "http",
        }
    }

    /// Whether the resource can be opened as a directory.
    pub fn supports_directories(&self) -> bool {
        matches!(self, ResourceId::Local(_) | ResourceId::Http(_))
    }

    /// The identifier of `name` inside this directory.
    pub fn join(&self, name: &str) -> Result<Self, ClusterError> {
        if name.is_empty() {
            return Err(ClusterError::InvalidResourceIdentifier(
                "child name is empty".into(),
            ));
        }
        match self {
            ResourceId::Local(path) => {
                let child = Path::new(name);
                if child.is_absolute() {
                    return Err(ClusterError::InvalidResourceIdentifier(format!(
                        "child name '{name}' is absolute"
                    )));
                }
                Ok(ResourceId::Local(path.join(child)))
            }
            ResourceId::Http(url) => {
                let base = directory_url(url);
                let encoded = name
                    .split('/')
                    .map(|segment| urlencoding::encode(segment).into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                Ok(ResourceId::Http(base.join(&encoded)?))
            }
            ResourceId::Tcp { .. } | ResourceId::Tls { .. } => {
                Err(ClusterError::InvalidResourceIdentifier(format!(
                    "'{self}' is a stream and has no children"
                )))
            }
        }
    }

    /// The identifier of the directory containing this resource.
    pub fn parent(&self) -> Result<Self, ClusterError> {
        match self {
            ResourceId::Local(path) => match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    Ok(ResourceId::Local(parent.to_path_buf()))
                }
                Some(_) => Ok(ResourceId::Local(PathBuf::from("."))),
                None => Err(ClusterError::InvalidResourceIdentifier(format!(
                    "'{self}' has no parent"
                ))),
            },
            ResourceId::Http(url) => {
                let current = directory_url(url);
                let parent = current.join("..")?;
                if parent == current {
                    return Err(ClusterError::InvalidResourceIdentifier(format!(
                        "'{self}' has no parent"
                    )));
                }
                Ok(ResourceId::Http(parent))
            }
            ResourceId::Tcp { .. } | ResourceId::Tls { .. } => {
                Err(ClusterError::InvalidResourceIdentifier(format!(
                    "'{self}' is a stream and has no parent"
                )))
            }
        }
    }

    /// The same resource in directory form. HTTP directory URLs end in `/`.
    pub fn as_directory(&self) -> Self {
        match self {
            ResourceId::Http(url) => ResourceId::Http(directory_url(url)),
            other => other.clone(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Local(path) => write!(f, "{}", path.display()),
            ResourceId::Tcp { host, port } => write!(f, "tcp://{}", join_host_port(host, *port)),
            ResourceId::Tls { host, port } => write!(f, "tls://{}", join_host_port(host, *port)),
            ResourceId::Http(url) => write!(f, "{url}"),
        }
    }
}

impl std::str::FromStr for ResourceId {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceId::parse(s)
    }
}

/// Returns `url` with a trailing slash on its path and no query or fragment.
pub(crate) fn directory_url(url: &Url) -> Url {
    let mut dir = url.clone();
    dir.set_query(None);
    dir.set_fragment(None);
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir
}

fn parse_host_port(identifier: &str, rest: &str) -> Result<(String, u16), ClusterError> {
    let authority = rest.strip_suffix('/').unwrap_or(rest);
    if authority.contains('/') {
        return Err(ClusterError::InvalidResourceIdentifier(format!(
            "'{identifier}' must be of the form scheme://host:port"
        )));
    }
    let Some((host, port)) = authority.rsplit_once(':') else {
        return Err(ClusterError::InvalidResourceIdentifier(format!(
            "'{identifier}' is missing a port"
        )));
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ClusterError::InvalidResourceIdentifier(format!(
            "'{identifier}' is missing a host"
        )));
    }
    let port: u16 = port.parse().map_err(|_| {
        ClusterError::InvalidResourceIdentifier(format!("'{identifier}' has an invalid port"))
    })?;
    if port == 0 {
        return Err(ClusterError::InvalidResourceIdentifier(format!(
            "'{identifier}' has port 0"
        )));
    }
    Ok((host.to_string(), port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
