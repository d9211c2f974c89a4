//! The nested connection-model shape written by format 1

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tether_core::{
    AuthMechanism, AuthOptions, Descriptor, HOSTS_OPTION, Result, SshAuth, SshTunnel, TetherError,
    TlsMode, TlsOptions,
};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 27017;

/// A saved connection as format 1 persisted it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub connection_model: LegacyConnectionModel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegacyHost {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegacyAuthStrategy {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "MONGODB")]
    Mongodb,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "KERBEROS")]
    Kerberos,
    #[serde(rename = "LDAP")]
    Ldap,
    #[serde(rename = "X509")]
    X509,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegacySslMethod {
    #[default]
    None,
    Systemca,
    Ifavailable,
    Unvalidated,
    Server,
    All,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacySshTunnel {
    #[default]
    None,
    UserPassword,
    IdentityFile,
}

/// Connection settings flattened into one object, secrets inline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyConnectionModel {
    pub is_srv_record: bool,
    pub hostname: String,
    pub port: u16,
    pub hosts: Vec<LegacyHost>,
    pub replica_set: Option<String>,
    pub read_preference: Option<String>,

    pub auth_strategy: LegacyAuthStrategy,
    pub mongodb_username: Option<String>,
    pub mongodb_password: Option<String>,
    pub mongodb_database_name: Option<String>,
    pub kerberos_principal: Option<String>,
    pub kerberos_password: Option<String>,
    pub kerberos_service_name: Option<String>,
    pub ldap_username: Option<String>,
    pub ldap_password: Option<String>,
    pub x509_username: Option<String>,

    pub ssl_method: LegacySslMethod,
    #[serde(rename = "sslCA")]
    pub ssl_ca: Option<Vec<String>>,
    pub ssl_cert: Option<Vec<String>>,
    pub ssl_key: Option<Vec<String>>,
    pub ssl_pass: Option<String>,

    pub ssh_tunnel: LegacySshTunnel,
    pub ssh_tunnel_hostname: Option<String>,
    pub ssh_tunnel_port: u16,
    pub ssh_tunnel_username: Option<String>,
    pub ssh_tunnel_password: Option<String>,
    pub ssh_tunnel_identity_file: Option<Vec<String>>,
    pub ssh_tunnel_passphrase: Option<String>,
}

impl Default for LegacyConnectionModel {
    fn default() -> Self {
        Self {
            is_srv_record: false,
            hostname: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            hosts: Vec::new(),
            replica_set: None,
            read_preference: None,
            auth_strategy: LegacyAuthStrategy::None,
            mongodb_username: None,
            mongodb_password: None,
            mongodb_database_name: None,
            kerberos_principal: None,
            kerberos_password: None,
            kerberos_service_name: None,
            ldap_username: None,
            ldap_password: None,
            x509_username: None,
            ssl_method: LegacySslMethod::None,
            ssl_ca: None,
            ssl_cert: None,
            ssl_key: None,
            ssl_pass: None,
            ssh_tunnel: LegacySshTunnel::None,
            ssh_tunnel_hostname: None,
            ssh_tunnel_port: 22,
            ssh_tunnel_username: None,
            ssh_tunnel_password: None,
            ssh_tunnel_identity_file: None,
            ssh_tunnel_passphrase: None,
        }
    }
}

impl LegacyConnectionModel {
    fn endpoints(&self) -> Vec<LegacyHost> {
        if self.hosts.is_empty() {
            vec![LegacyHost {
                host: self.hostname.clone(),
                port: self.port,
            }]
        } else {
            self.hosts.clone()
        }
    }

    /// Name shown for a format 1 record saved without one
    pub fn title(&self) -> String {
        let joined = || {
            self.endpoints()
                .iter()
                .map(|h| format!("{}:{}", h.host, h.port))
                .collect::<Vec<_>>()
                .join(",")
        };

        if self.ssh_tunnel != LegacySshTunnel::None && self.ssh_tunnel_hostname.is_some() {
            return format!("SSH to {}", joined());
        }
        if self.is_srv_record {
            return self.hostname.clone();
        }
        joined()
    }

    /// Build a full (secret-bearing) descriptor from the flattened model.
    ///
    /// Errors are always `Validation`: the stored data cannot be expressed in
    /// the current format and retrying will not help.
    pub fn to_descriptor(&self) -> Result<Descriptor> {
        let uri = self.uri()?;
        let mut descriptor = Descriptor::parse(&uri)?;

        if let Some(replica_set) = non_empty(&self.replica_set) {
            descriptor = descriptor.with_option("replicaSet", replica_set);
        }
        if let Some(read_preference) = non_empty(&self.read_preference) {
            descriptor = descriptor.with_option("readPreference", read_preference);
        }
        if let Some(service_name) = non_empty(&self.kerberos_service_name) {
            descriptor = descriptor.with_option("authMechanismProperties.SERVICE_NAME", service_name);
        }
        let extra_hosts: Vec<String> = if self.is_srv_record {
            Vec::new()
        } else {
            self.endpoints()
                .iter()
                .skip(1)
                .map(|h| format!("{}:{}", h.host, h.port))
                .collect()
        };
        if !extra_hosts.is_empty() {
            descriptor = descriptor.with_option(HOSTS_OPTION, extra_hosts.join(","));
        }

        if let Some(auth) = self.auth()? {
            descriptor = descriptor.with_auth(auth);
        }
        if let Some(tls) = self.tls()? {
            descriptor = descriptor.with_tls(tls);
        }
        if let Some(tunnel) = self.tunnel()? {
            descriptor = descriptor.with_ssh_tunnel(tunnel);
        }

        descriptor.validate()?;
        Ok(descriptor)
    }

    fn uri(&self) -> Result<String> {
        let endpoints = self.endpoints();
        let Some(primary) = endpoints.first().filter(|h| !h.host.trim().is_empty()) else {
            return Err(TetherError::Validation(
                "Legacy connection has no host".into(),
            ));
        };

        if self.is_srv_record {
            Ok(format!("mongodb+srv://{}/", primary.host))
        } else {
            Ok(format!("mongodb://{}:{}/", primary.host, primary.port))
        }
    }

    fn auth(&self) -> Result<Option<AuthOptions>> {
        let (mechanism, username, password, label) = match self.auth_strategy {
            LegacyAuthStrategy::None => return Ok(None),
            LegacyAuthStrategy::Mongodb => (
                AuthMechanism::Default,
                &self.mongodb_username,
                &self.mongodb_password,
                "mongodbUsername",
            ),
            LegacyAuthStrategy::ScramSha256 => (
                AuthMechanism::ScramSha256,
                &self.mongodb_username,
                &self.mongodb_password,
                "mongodbUsername",
            ),
            LegacyAuthStrategy::Kerberos => (
                AuthMechanism::Kerberos,
                &self.kerberos_principal,
                &self.kerberos_password,
                "kerberosPrincipal",
            ),
            LegacyAuthStrategy::Ldap => (
                AuthMechanism::Ldap,
                &self.ldap_username,
                &self.ldap_password,
                "ldapUsername",
            ),
            LegacyAuthStrategy::X509 => {
                (AuthMechanism::X509, &self.x509_username, &None, "x509Username")
            }
        };

        let username = match non_empty(username) {
            Some(username) => username.to_string(),
            // x509 may take the subject from the client certificate
            None if mechanism == AuthMechanism::X509 => String::new(),
            None => {
                return Err(TetherError::Validation(format!(
                    "Legacy connection is missing {}",
                    label
                )));
            }
        };

        Ok(Some(AuthOptions {
            mechanism,
            username,
            password: non_empty(password).map(str::to_string),
            source: non_empty(&self.mongodb_database_name).map(str::to_string),
        }))
    }

    fn tls(&self) -> Result<Option<TlsOptions>> {
        let mode = match self.ssl_method {
            LegacySslMethod::None => return Ok(None),
            LegacySslMethod::Systemca => TlsMode::System,
            LegacySslMethod::Ifavailable | LegacySslMethod::Unvalidated => TlsMode::Unvalidated,
            LegacySslMethod::Server => TlsMode::Server,
            LegacySslMethod::All => TlsMode::All,
        };

        let ca_file = first_path(&self.ssl_ca);
        if matches!(mode, TlsMode::Server | TlsMode::All) && ca_file.is_none() {
            return Err(TetherError::Validation(
                "Legacy connection requires sslCA for server validation".into(),
            ));
        }
        let cert_file = first_path(&self.ssl_cert);
        if mode == TlsMode::All && cert_file.is_none() {
            return Err(TetherError::Validation(
                "Legacy connection requires sslCert for client validation".into(),
            ));
        }

        Ok(Some(TlsOptions {
            mode,
            ca_file,
            cert_file,
            key_file: first_path(&self.ssl_key),
            key_passphrase: non_empty(&self.ssl_pass).map(str::to_string),
        }))
    }

    fn tunnel(&self) -> Result<Option<SshTunnel>> {
        let auth = match self.ssh_tunnel {
            LegacySshTunnel::None => return Ok(None),
            LegacySshTunnel::UserPassword => SshAuth::Password {
                password: non_empty(&self.ssh_tunnel_password).map(str::to_string),
            },
            LegacySshTunnel::IdentityFile => {
                let Some(path) = first_path(&self.ssh_tunnel_identity_file) else {
                    return Err(TetherError::Validation(
                        "Legacy SSH tunnel is missing its identity file".into(),
                    ));
                };
                SshAuth::IdentityFile {
                    path,
                    passphrase: non_empty(&self.ssh_tunnel_passphrase).map(str::to_string),
                }
            }
        };

        let (Some(host), Some(username)) = (
            non_empty(&self.ssh_tunnel_hostname),
            non_empty(&self.ssh_tunnel_username),
        ) else {
            return Err(TetherError::Validation(
                "Legacy SSH tunnel needs both a hostname and a username".into(),
            ));
        };

        Ok(Some(SshTunnel {
            host: host.to_string(),
            port: self.ssh_tunnel_port,
            username: username.to_string(),
            auth,
        }))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn first_path(paths: &Option<Vec<String>>) -> Option<PathBuf> {
    paths
        .as_ref()
        .and_then(|p| p.iter().find(|s| !s.trim().is_empty()))
        .map(PathBuf::from)
}
