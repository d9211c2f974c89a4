//! Connection descriptors and their secrets
//!
//! A [`Descriptor`] identifies a connection target (endpoint URI) plus the
//! auth, TLS and SSH tunnel options needed to reach it. Secret-bearing fields
//! are split out with [`Descriptor::extract_secrets`] before anything is
//! persisted, and joined back with [`Descriptor::merge_secrets`] right before
//! the descriptor is handed to a connector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::{Result, TetherError};

/// Option holding the seeds after the first one, comma separated
pub const HOSTS_OPTION: &str = "hosts";

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() { "<redacted>" } else { "<none>" }
}

/// Authentication mechanism for the data service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    /// Let the server negotiate (username/password)
    #[default]
    Default,
    ScramSha256,
    Kerberos,
    Ldap,
    X509,
}

/// Credentials used to authenticate against the endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOptions {
    #[serde(default)]
    pub mechanism: AuthMechanism,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Database/realm the credentials are defined in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl AuthOptions {
    pub fn new(mechanism: AuthMechanism, username: impl Into<String>) -> Self {
        Self {
            mechanism,
            username: username.into(),
            password: None,
            source: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("source", &self.source)
            .finish()
    }
}

/// How the TLS layer validates the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    #[default]
    Disabled,
    /// Validate against the system CA store
    System,
    /// Encrypt without validating the server certificate
    Unvalidated,
    /// Validate the server against a custom CA
    Server,
    /// Validate the server and present a client certificate
    All,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsOptions {
    #[serde(default)]
    pub mode: TlsMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("mode", &self.mode)
            .field("ca_file", &self.ca_file)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("key_passphrase", &redact(&self.key_passphrase))
            .finish()
    }
}

/// Authentication method for the SSH tunnel host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SshAuth {
    Password {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    IdentityFile {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    Agent,
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password { password } => f
                .debug_struct("Password")
                .field("password", &redact(password))
                .finish(),
            SshAuth::IdentityFile { path, passphrase } => f
                .debug_struct("IdentityFile")
                .field("path", path)
                .field("passphrase", &redact(passphrase))
                .finish(),
            SshAuth::Agent => write!(f, "Agent"),
        }
    }
}

/// SSH tunnel through a bastion host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTunnel {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

fn default_ssh_port() -> u16 {
    22
}

/// Placeholder left in a persisted descriptor where its secrets used to be.
///
/// The value is the key under which the secrets live in the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(pub String);

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every secret a descriptor may carry, stored together as one payload
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSecrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key_passphrase: Option<String>,
}

impl ConnectionSecrets {
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.ssh_password.is_none()
            && self.ssh_passphrase.is_none()
            && self.tls_key_passphrase.is_none()
    }

    /// Serialize into the opaque payload handed to a secret store
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        if payload.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(payload)?)
    }
}

impl fmt::Debug for ConnectionSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSecrets")
            .field("password", &redact(&self.password))
            .field("ssh_password", &redact(&self.ssh_password))
            .field("ssh_passphrase", &redact(&self.ssh_passphrase))
            .field("tls_key_passphrase", &redact(&self.tls_key_passphrase))
            .finish()
    }
}

/// Opaque description of a connection target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Endpoint URI, never carrying credentials once parsed
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_tunnel: Option<SshTunnel>,
    /// Driver-specific options passed through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,
}

impl Descriptor {
    /// Parse an endpoint URI into a descriptor.
    ///
    /// Credentials embedded in the URI userinfo are moved into [`AuthOptions`]
    /// so the stored URI never contains them. For a seed list
    /// (`scheme://a:1,b:2/`) the URI keeps the first host and the others go
    /// to the `hosts` option.
    pub fn parse(uri: &str) -> Result<Self> {
        let Endpoint {
            mut url,
            extra_hosts,
        } = parse_endpoint(uri)?;

        let username = decode_component(url.username())?;
        let password = url.password().map(decode_component).transpose()?;

        let auth = if username.is_empty() {
            None
        } else {
            Some(AuthOptions {
                mechanism: AuthMechanism::Default,
                username,
                password,
                source: None,
            })
        };

        strip_userinfo(&mut url)?;

        let mut options = BTreeMap::new();
        if !extra_hosts.is_empty() {
            options.insert(HOSTS_OPTION.to_string(), extra_hosts.join(","));
        }

        Ok(Self {
            uri: url.to_string(),
            auth,
            tls: None,
            ssh_tunnel: None,
            options,
            secret_ref: None,
        })
    }

    pub fn with_auth(mut self, auth: AuthOptions) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_ssh_tunnel(mut self, tunnel: SshTunnel) -> Self {
        self.ssh_tunnel = Some(tunnel);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Check that the descriptor names a reachable-looking endpoint
    pub fn validate(&self) -> Result<()> {
        parse_endpoint(&self.uri)?;

        if let Some(tunnel) = &self.ssh_tunnel {
            if tunnel.host.trim().is_empty() {
                return Err(TetherError::Validation(
                    "SSH tunnel host must not be empty".into(),
                ));
            }
            if tunnel.port == 0 {
                return Err(TetherError::Validation(
                    "SSH tunnel port must be between 1 and 65535".into(),
                ));
            }
        }

        Ok(())
    }

    /// Human readable title, `host[:port]`
    pub fn title(&self) -> String {
        match parse_endpoint(&self.uri) {
            Ok(Endpoint { url, .. }) => {
                let host = url.host_str().unwrap_or_default();
                match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                }
            }
            Err(_) => self.uri.clone(),
        }
    }

    /// Whether any secret-bearing field is populated
    pub fn has_inline_secrets(&self) -> bool {
        let (_, secrets) = self.split_secrets();
        !secrets.is_empty()
    }

    /// Split this descriptor into a secret-free copy and the secrets it held.
    ///
    /// When any secret was present the returned descriptor carries
    /// `secret_ref` so it can be joined with its secrets later.
    pub fn extract_secrets(&self, secret_ref: SecretRef) -> (Descriptor, ConnectionSecrets) {
        let (mut clean, secrets) = self.split_secrets();
        if secrets.is_empty() {
            clean.secret_ref = self.secret_ref.clone();
        } else {
            clean.secret_ref = Some(secret_ref);
        }
        (clean, secrets)
    }

    /// Rebuild the live descriptor from a secret-free one and its secrets.
    ///
    /// The result is self-contained and drops the `secret_ref` placeholder.
    pub fn merge_secrets(&self, secrets: &ConnectionSecrets) -> Descriptor {
        let mut merged = self.clone();
        merged.secret_ref = None;

        if let (Some(auth), Some(password)) = (merged.auth.as_mut(), &secrets.password) {
            auth.password = Some(password.clone());
        }

        if let Some(tunnel) = merged.ssh_tunnel.as_mut() {
            match &mut tunnel.auth {
                SshAuth::Password { password } => {
                    if secrets.ssh_password.is_some() {
                        *password = secrets.ssh_password.clone();
                    }
                }
                SshAuth::IdentityFile { passphrase, .. } => {
                    if secrets.ssh_passphrase.is_some() {
                        *passphrase = secrets.ssh_passphrase.clone();
                    }
                }
                SshAuth::Agent => {}
            }
        }

        if let (Some(tls), Some(passphrase)) = (merged.tls.as_mut(), &secrets.tls_key_passphrase) {
            tls.key_passphrase = Some(passphrase.clone());
        }

        merged
    }

    fn split_secrets(&self) -> (Descriptor, ConnectionSecrets) {
        let mut clean = self.clone();
        let mut secrets = ConnectionSecrets::default();

        // Credentials typed straight into a URI are treated like auth fields
        if let Ok(Endpoint {
            mut url,
            extra_hosts,
        }) = parse_endpoint(&clean.uri)
            && url.password().is_some()
        {
            let uri_password = url.password().and_then(|p| decode_component(p).ok());
            let uri_username = decode_component(url.username()).unwrap_or_default();
            if strip_userinfo(&mut url).is_ok() {
                clean.uri = url.to_string();
                if !extra_hosts.is_empty() {
                    let hosts = clean.options.entry(HOSTS_OPTION.to_string()).or_default();
                    if !hosts.is_empty() {
                        hosts.push(',');
                    }
                    hosts.push_str(&extra_hosts.join(","));
                }
                if clean.auth.is_none() && !uri_username.is_empty() {
                    clean.auth = Some(AuthOptions::new(AuthMechanism::Default, uri_username));
                }
                secrets.password = uri_password;
            }
        }

        if let Some(auth) = clean.auth.as_mut()
            && let Some(password) = auth.password.take()
        {
            secrets.password = Some(password);
        }

        if let Some(tunnel) = clean.ssh_tunnel.as_mut() {
            match &mut tunnel.auth {
                SshAuth::Password { password } => secrets.ssh_password = password.take(),
                SshAuth::IdentityFile { passphrase, .. } => {
                    secrets.ssh_passphrase = passphrase.take()
                }
                SshAuth::Agent => {}
            }
        }

        if let Some(tls) = clean.tls.as_mut() {
            secrets.tls_key_passphrase = tls.key_passphrase.take();
        }

        (clean, secrets)
    }
}

struct Endpoint {
    /// The URI with only the first seed as its host
    url: Url,
    extra_hosts: Vec<String>,
}

fn parse_endpoint(uri: &str) -> Result<Endpoint> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(TetherError::Validation("Connection URI must not be empty".into()));
    }

    let (primary, extra_hosts) = split_seed_list(trimmed)?;
    let url = Url::parse(&primary)
        .map_err(|e| TetherError::Validation(format!("Invalid connection URI: {}", e)))?;

    if url.host_str().is_none_or(str::is_empty) {
        return Err(TetherError::Validation(format!(
            "Connection URI has no host: {}",
            url.scheme()
        )));
    }

    Ok(Endpoint { url, extra_hosts })
}

/// `url` accepts a single host, so a comma separated seed list is cut down
/// to its first seed and the rest are returned alongside.
fn split_seed_list(uri: &str) -> Result<(String, Vec<String>)> {
    let Some(scheme_end) = uri.find("://") else {
        return Ok((uri.to_string(), Vec::new()));
    };
    let authority_start = scheme_end + 3;
    let authority_end = uri[authority_start..]
        .find(['/', '?', '#'])
        .map_or(uri.len(), |i| authority_start + i);
    let authority = &uri[authority_start..authority_end];
    let hosts_start = authority_start + authority.rfind('@').map_or(0, |i| i + 1);

    let mut seeds = uri[hosts_start..authority_end].split(',');
    let first = seeds.next().unwrap_or_default();
    let extra: Vec<String> = seeds.map(|seed| seed.trim().to_string()).collect();
    if extra.is_empty() {
        return Ok((uri.to_string(), extra));
    }
    if first.trim().is_empty() || extra.iter().any(String::is_empty) {
        return Err(TetherError::Validation(
            "Connection URI has an empty host in its seed list".into(),
        ));
    }

    let primary = format!("{}{}{}", &uri[..hosts_start], first, &uri[authority_end..]);
    Ok((primary, extra))
}

fn decode_component(raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| TetherError::Validation(format!("Invalid URI encoding: {}", e)))
}

fn strip_userinfo(url: &mut Url) -> Result<()> {
    url.set_password(None)
        .and_then(|_| url.set_username(""))
        .map_err(|_| TetherError::Validation("Connection URI cannot carry credentials".into()))
}
