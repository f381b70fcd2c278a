//! TLS certificate descriptors keyed by hostname.
//!
//! Hostname forms:
//! - `www.example.com` matches that host only
//! - `*.example.com` matches exactly one extra label (`a.example.com`)
//! - `*` matches any host
//!
//! Exact names win over wildcards; a longer wildcard domain wins over a
//! shorter one, so `*` is the last resort.

use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::CertificateConfig;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("cannot read certificate {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("certificate '{id}' contains no PEM certificate")]
    Empty { id: String },

    #[error("certificate '{id}' has invalid PEM data: {source}")]
    Pem {
        id: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslCertificate {
    pub id: String,
    /// Lower-cased host, or the domain after `*.` for wildcards, or empty for `*`.
    pub hostname: String,
    pub wildcard: bool,
    /// DER certificates, leaf first.
    pub der_chain: Vec<Vec<u8>>,
}

impl SslCertificate {
    /// Decode a PEM chain for `hostname`.
    pub fn from_pem(id: &str, hostname: &str, pem: &[u8]) -> Result<Self, CertificateError> {
        let der_chain = rustls_pemfile::certs(&mut BufReader::new(pem))
            .map(|cert| cert.map(|der| der.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| CertificateError::Pem {
                id: id.to_string(),
                source,
            })?;
        if der_chain.is_empty() {
            return Err(CertificateError::Empty { id: id.to_string() });
        }

        let hostname = hostname.trim().to_ascii_lowercase();
        let (hostname, wildcard) = if hostname == "*" {
            (String::new(), true)
        } else if let Some(domain) = hostname.strip_prefix("*.") {
            (domain.to_string(), true)
        } else {
            (hostname, false)
        };

        Ok(Self {
            id: id.to_string(),
            hostname,
            wildcard,
            der_chain,
        })
    }

    pub fn load(config: &CertificateConfig) -> Result<Self, CertificateError> {
        let path = Path::new(&config.cert_path);
        let pem = fs::read(path).map_err(|source| CertificateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&config.id, &config.hostname, &pem)
    }

    /// Leaf certificate, DER encoded.
    pub fn leaf(&self) -> &[u8] {
        self.der_chain.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// Match strength against `host`: `None` if it does not apply,
    /// higher is more specific.
    fn specificity(&self, host: &str) -> Option<usize> {
        if !self.wildcard {
            return (self.hostname == host).then_some(usize::MAX);
        }
        if self.hostname.is_empty() {
            return Some(0);
        }
        let label = host.strip_suffix(&self.hostname)?.strip_suffix('.')?;
        (!label.is_empty() && !label.contains('.')).then_some(self.hostname.len())
    }
}

/// Certificates available for TLS termination.
#[derive(Debug, Clone, Default)]
pub struct CertificateStore {
    certificates: Vec<SslCertificate>,
}

impl CertificateStore {
    pub fn new(certificates: Vec<SslCertificate>) -> Self {
        Self { certificates }
    }

    /// Read every configured certificate from disk.
    pub fn load(configs: &[CertificateConfig]) -> Result<Self, CertificateError> {
        let certificates = configs
            .iter()
            .map(SslCertificate::load)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { certificates })
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// The most specific certificate for `hostname`.
    pub fn find(&self, hostname: &str) -> Option<&SslCertificate> {
        let host = hostname.to_ascii_lowercase();
        self.certificates
            .iter()
            .filter_map(|cert| cert.specificity(&host).map(|rank| (rank, cert)))
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, cert)| cert)
    }

    /// Leaf certificate bytes to present for `hostname`.
    pub fn lookup(&self, hostname: &str) -> Option<&[u8]> {
        self.find(hostname).map(SslCertificate::leaf)
    }
}
