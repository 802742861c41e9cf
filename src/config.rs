//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//! Configuration representation and configuration file parsing
//!
//! Both programs read TOML. Raw structures deserialize the file as
//! written; "cooking" validates them semantically, fills in defaults,
//! and builds the TLS machinery, collecting every complaint rather
//! than stopping at the first.

use crate::ke::{ServerContext, DEFAULT_NTP_PORT};
use crate::records::NTSKE_ALPN;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io;
use std::net::{self, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls;
use tokio_rustls::webpki::DNSNameRef;

///Default polling interval in seconds (16m40s)
pub const DEFAULT_INTERVAL: u64 = 1000;

///Lowest polling interval accepted outside of debug mode
pub const LOWEST_INTERVAL: u64 = 15;

///NTP host the server advertises unless configured otherwise
pub const DEFAULT_NTP_SERVER: &str = "ntp1.glypnod.com";

///Contents of the client configuration file, rawly deserialized from
/// serde. Field names match the file keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawClientConfig {
    #[serde(rename = "Server")]
    pub server: Option<String>,
    #[serde(rename = "CACert")]
    pub cacert: Option<String>,
    #[serde(rename = "Interval")]
    pub interval: Option<u64>,
}

///Contents of the server configuration file, rawly deserialized from
/// serde.
#[derive(Debug, Clone, Deserialize)]
pub struct RawServerConfig {
    #[serde(rename = "Listen")]
    pub listen: String,
    #[serde(rename = "Certfile")]
    pub certfile: String,
    #[serde(rename = "Privatefile")]
    pub privatefile: String,
    #[serde(rename = "CookieKeyID")]
    pub cookie_key_id: u16,
    #[serde(rename = "CookieSecret")]
    pub cookie_secret: String,
    #[serde(rename = "NtpServer")]
    pub ntp_server: Option<String>,
    #[serde(rename = "NtpPort")]
    pub ntp_port: Option<u16>,
}

///A semantic error in a configuration
#[derive(Clone, Debug)]
pub struct SemanticError {
    ///Text of the error message
    pub text: String,
}

impl SemanticError {
    fn new<S: Into<String>>(text: S) -> SemanticError {
        SemanticError { text: text.into() }
    }
}

///An error in a configuration file
#[derive(Debug)]
pub enum ConfigError {
    Read(io::Error),
    Syntactic(toml::de::Error),
    Semantic(Vec<SemanticError>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConfigError::*;
        match self {
            Read(e) => write!(f, "Reading configuration file: {}", e),
            Syntactic(e) => write!(f, "Syntax error in configuration file: {}", e),
            Semantic(evec) => {
                for e in evec {
                    write!(f, "In configuration: {}", e.text)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

///Settings for the client after the command line, environment, and
/// configuration file have been merged, but before validation.
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub server: Option<String>,
    pub cacert: Option<String>,
    pub interval: Option<u64>,
    pub insecure: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub debug: bool,
}

///"Cooked" client configuration, semantically validated and with
/// defaults filled in
#[derive(Clone)]
pub struct ClientConfig {
    ///NTS-KE server, as a `host` or `host:port` string
    pub server: String,
    ///Seconds to sleep between NTP queries
    pub interval: u64,
    ///Connector for NTS-KE client sessions
    pub tls_connector: tokio_rustls::TlsConnector,
    ///Report offsets without setting the clock
    pub dry_run: bool,
    pub verbose: bool,
    pub debug: bool,
}

///Certificate verifier that accepts anything, for `--insecure`
struct DisabledVerification;

impl rustls::ServerCertVerifier for DisabledVerification {
    fn verify_server_cert(
        &self,
        _roots: &rustls::RootCertStore,
        _presented_certs: &[rustls::Certificate],
        _dns_name: DNSNameRef<'_>,
        _ocsp_response: &[u8],
    ) -> Result<rustls::ServerCertVerified, rustls::TLSError> {
        Ok(rustls::ServerCertVerified::assertion())
    }
}

///Build the rustls client configuration: TLS 1.2, NTS-KE ALPN, and
/// either the provided CA bundle or the bundled web PKI roots.
pub fn make_tls_client_config(
    cacert: Option<&Path>,
    insecure: bool,
    errors: &mut Vec<SemanticError>,
) -> rustls::ClientConfig {
    let mut tls_config = rustls::ClientConfig::new();
    tls_config.versions = vec![rustls::ProtocolVersion::TLSv1_2];
    tls_config.alpn_protocols = vec![NTSKE_ALPN.to_vec()];

    match cacert {
        Some(path) => match fs::File::open(path) {
            Ok(f) => {
                let mut bufreader = io::BufReader::new(f);
                match tls_config.root_store.add_pem_file(&mut bufreader) {
                    Ok((valid, _invalid)) => {
                        if valid == 0 {
                            errors.push(SemanticError::new(
                                "`CACert` file contains no valid certificate authorities",
                            ))
                        }
                    }
                    Err(_) => errors.push(SemanticError::new(
                        "`CACert` file is not a valid PEM file",
                    )),
                }
            }
            Err(e) => errors.push(SemanticError::new(format!(
                "`CACert` file could not be opened: {}",
                e
            ))),
        },
        None => {
            tls_config
                .root_store
                .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
        }
    }

    if insecure {
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(DisabledVerification));
    }

    tls_config
}

///Parse a client configuration file.
pub fn load_client_file(path: &Path) -> Result<RawClientConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
    toml::from_str(&contents).map_err(ConfigError::Syntactic)
}

impl ClientConfig {
    ///Semantically validate merged client settings and fill in
    /// defaults. `settings` already reflects the precedence
    /// command line > environment > configuration file.
    pub fn cook(settings: ClientSettings) -> Result<ClientConfig, ConfigError> {
        let mut errors: Vec<SemanticError> = Vec::new();

        let server = settings.server.unwrap_or_else(|| {
            errors.push(SemanticError::new("No server configured, try --help"));
            String::new()
        });

        let interval = settings.interval.unwrap_or(DEFAULT_INTERVAL);
        if interval < LOWEST_INTERVAL && !settings.debug {
            errors.push(SemanticError::new(format!(
                "Refusing polling interval less than {} in non-debug mode",
                LOWEST_INTERVAL
            )));
        }

        let tls_config = make_tls_client_config(
            settings.cacert.as_ref().map(Path::new),
            settings.insecure,
            &mut errors,
        );

        if errors.is_empty() {
            Ok(ClientConfig {
                server,
                interval,
                tls_connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
                dry_run: settings.dry_run,
                verbose: settings.verbose,
                debug: settings.debug,
            })
        } else {
            Err(ConfigError::Semantic(errors))
        }
    }
}

///"Cooked" server configuration
pub struct ServerConfig {
    ///Address to listen for NTS-KE connections on
    pub listen: net::SocketAddr,
    ///Acceptor for NTS-KE server sessions
    pub tls_acceptor: tokio_rustls::TlsAcceptor,
    ///Read-only state for NTS-KE sessions: cookie secret and the
    /// advertised NTP endpoint
    pub context: ServerContext,
}

fn load_certs(path: &Path, errors: &mut Vec<SemanticError>) -> Vec<rustls::Certificate> {
    match fs::File::open(path) {
        Ok(f) => {
            let mut bufreader = io::BufReader::new(f);
            match rustls::internal::pemfile::certs(&mut bufreader) {
                Ok(certs) if !certs.is_empty() => certs,
                Ok(_) => {
                    errors.push(SemanticError::new(
                        "`Certfile` contains no certificates",
                    ));
                    Vec::new()
                }
                Err(()) => {
                    errors.push(SemanticError::new(
                        "`Certfile` does not contain valid PEM",
                    ));
                    Vec::new()
                }
            }
        }
        Err(e) => {
            errors.push(SemanticError::new(format!(
                "`Certfile` could not be opened: {}",
                e
            )));
            Vec::new()
        }
    }
}

///Read the private key as PKCS#8, falling back to the older RSA
/// format.
fn load_key(path: &Path, errors: &mut Vec<SemanticError>) -> Option<rustls::PrivateKey> {
    let read_keys = |f: fs::File, rsa: bool| {
        let mut bufreader = io::BufReader::new(f);
        if rsa {
            rustls::internal::pemfile::rsa_private_keys(&mut bufreader)
        } else {
            rustls::internal::pemfile::pkcs8_private_keys(&mut bufreader)
        }
    };

    let f = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            errors.push(SemanticError::new(format!(
                "`Privatefile` could not be opened: {}",
                e
            )));
            return None;
        }
    };

    if let Ok(mut keys) = read_keys(f, false) {
        if let Some(key) = keys.pop() {
            return Some(key);
        }
    }
    if let Ok(f) = fs::File::open(path) {
        if let Ok(mut keys) = read_keys(f, true) {
            if let Some(key) = keys.pop() {
                return Some(key);
            }
        }
    }
    errors.push(SemanticError::new(
        "`Privatefile` contains no PKCS#8 or RSA private key",
    ));
    None
}

///Semantically validate a parsed server configuration and fill in
/// defaults.
fn cook_server_config(raw: RawServerConfig) -> Result<ServerConfig, Vec<SemanticError>> {
    let mut errors: Vec<SemanticError> = Vec::new();

    let listen = match raw.listen.to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(_) => None,
    }
    .unwrap_or_else(|| {
        errors.push(SemanticError::new(
            "`Listen` must be a resolvable host:port address",
        ));
        net::SocketAddr::new(net::IpAddr::V6(net::Ipv6Addr::UNSPECIFIED), 0)
    });

    let secret = raw.cookie_secret.into_bytes();
    if secret.len() != 32 && secret.len() != 64 {
        errors.push(SemanticError::new(format!(
            "`CookieSecret` is {} bytes; must be 32 or 64",
            secret.len()
        )));
    }

    let certs = load_certs(Path::new(&raw.certfile), &mut errors);
    let key = load_key(Path::new(&raw.privatefile), &mut errors);

    let mut tls_config = rustls::ServerConfig::new(rustls::NoClientAuth::new());
    tls_config.versions = vec![rustls::ProtocolVersion::TLSv1_2];
    tls_config.alpn_protocols = vec![NTSKE_ALPN.to_vec()];
    if let (false, Some(key)) = (certs.is_empty(), key) {
        if tls_config.set_single_cert(certs, key).is_err() {
            errors.push(SemanticError::new(
                "`Certfile` and `Privatefile` do not form a usable identity",
            ));
        }
    }

    if errors.is_empty() {
        Ok(ServerConfig {
            listen,
            tls_acceptor: tokio_rustls::TlsAcceptor::from(Arc::new(tls_config)),
            context: ServerContext {
                key_id: raw.cookie_key_id,
                secret,
                ntp_server: raw
                    .ntp_server
                    .unwrap_or_else(|| String::from(DEFAULT_NTP_SERVER)),
                ntp_port: raw.ntp_port.unwrap_or(DEFAULT_NTP_PORT),
            },
        })
    } else {
        Err(errors)
    }
}

impl ServerConfig {
    ///Load, parse, and validate a server configuration file.
    pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
        let raw: RawServerConfig = toml::from_str(&contents).map_err(ConfigError::Syntactic)?;
        cook_server_config(raw).map_err(ConfigError::Semantic)
    }
}
