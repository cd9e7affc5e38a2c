//! Process-wide TLS trust material.
//!
//! Holds everything the embedder can register at run time: extra root CAs,
//! certificate revocation lists, a client certificate, blacklisted
//! certificates, the EV policy table and hosts for which verification is
//! waived. Connect jobs apply it to their `SslConnectorBuilder` before the
//! handshake and check the peer chain after it.

use crate::base::neterror::NetError;
use crate::tls::crl::{strip_leading_zeros, RevocationList};
use boring::hash::MessageDigest;
use boring::pkey::{PKey, Private};
use boring::ssl::{ConnectConfiguration, SslConnectorBuilder, SslRef, SslVerifyMode};
use boring::x509::{X509Ref, X509};
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

/// SHA-256 fingerprint of a DER certificate.
pub type Fingerprint = [u8; 32];

/// Hex rendering used in logs.
pub fn fingerprint_hex(fp: &Fingerprint) -> String {
    fp.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compute the SHA-256 fingerprint of a certificate.
pub fn fingerprint(cert: &X509Ref) -> Result<Fingerprint, NetError> {
    let digest = cert
        .digest(MessageDigest::sha256())
        .map_err(NetError::handshake_failed)?;
    let mut fp = [0u8; 32];
    fp.copy_from_slice(&digest);
    Ok(fp)
}

fn parse_cert(data: &[u8]) -> Result<X509, NetError> {
    X509::from_pem(data)
        .or_else(|_| X509::from_der(data))
        .map_err(|_| NetError::CertInvalid)
}

#[derive(Clone)]
struct ClientIdentity {
    cert: X509,
    key: PKey<Private>,
}

/// Outcome of the post-handshake peer check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerTrust {
    /// Verification was waived for this host.
    pub override_applied: bool,
    /// EV policy OID when the chain ends in a registered EV root.
    pub ev_policy: Option<String>,
}

/// Shared trust material; cheap to clone.
#[derive(Clone, Default)]
pub struct TrustStore {
    roots: Arc<DashMap<Fingerprint, X509>>,
    crls: Arc<DashMap<String, RevocationList>>,
    client: Arc<RwLock<Option<ClientIdentity>>>,
    blacklist: Arc<DashSet<Fingerprint>>,
    ev_oids: Arc<DashMap<Fingerprint, String>>,
    allowed_hosts: Arc<DashSet<String>>,
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStore")
            .field("roots", &self.roots.len())
            .field("crls", &self.crls.len())
            .field("blacklist", &self.blacklist.len())
            .field("ev_oids", &self.ev_oids.len())
            .field("allowed_hosts", &self.allowed_hosts.len())
            .finish()
    }
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust an additional root CA (PEM or DER). Returns its fingerprint.
    pub fn register_root_ca(&self, data: &[u8]) -> Result<Fingerprint, NetError> {
        let cert = parse_cert(data)?;
        let fp = fingerprint(&cert)?;
        tracing::debug!(fingerprint = %fingerprint_hex(&fp), "registered root CA");
        self.roots.insert(fp, cert);
        Ok(fp)
    }

    pub fn unregister_root_ca(&self, fp: &Fingerprint) -> bool {
        self.roots.remove(fp).is_some()
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Register a CRL under `id`, replacing any CRL with the same id.
    /// Returns the number of revoked serials it lists.
    pub fn register_crl(&self, id: &str, data: &[u8]) -> Result<usize, NetError> {
        let crl = RevocationList::parse(data)?;
        let count = crl.revoked.len();
        self.crls.insert(id.to_string(), crl);
        Ok(count)
    }

    pub fn unregister_crl(&self, id: &str) -> bool {
        self.crls.remove(id).is_some()
    }

    /// Present this certificate and key when a server asks for one.
    pub fn set_client_certificate(&self, cert: &[u8], key: &[u8]) -> Result<(), NetError> {
        let cert = parse_cert(cert)?;
        let key = PKey::private_key_from_pem(key)
            .or_else(|_| PKey::private_key_from_der(key))
            .map_err(|_| NetError::BadSslClientAuthCert)?;
        let mut slot = self.client.write().map_err(|_| NetError::BadSslClientAuthCert)?;
        *slot = Some(ClientIdentity { cert, key });
        Ok(())
    }

    pub fn clear_client_certificate(&self) {
        if let Ok(mut slot) = self.client.write() {
            *slot = None;
        }
    }

    pub fn has_client_certificate(&self) -> bool {
        self.client.read().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Reject any chain containing this certificate (PEM or DER).
    pub fn blacklist_certificate(&self, data: &[u8]) -> Result<Fingerprint, NetError> {
        let fp = fingerprint(&parse_cert(data)?)?;
        self.blacklist.insert(fp);
        Ok(fp)
    }

    pub fn blacklist_fingerprint(&self, fp: Fingerprint) {
        self.blacklist.insert(fp);
    }

    pub fn unblacklist(&self, fp: &Fingerprint) -> bool {
        self.blacklist.remove(fp).is_some()
    }

    /// Mark chains ending in the root with `root_fingerprint` as EV under `oid`.
    pub fn register_ev_oid(&self, root_fingerprint: Fingerprint, oid: impl Into<String>) {
        self.ev_oids.insert(root_fingerprint, oid.into());
    }

    pub fn unregister_ev_oid(&self, root_fingerprint: &Fingerprint) -> bool {
        self.ev_oids.remove(root_fingerprint).is_some()
    }

    /// Waive verification for `host`.
    pub fn allow_host(&self, host: &str) {
        self.allowed_hosts.insert(host.to_ascii_lowercase());
    }

    pub fn disallow_host(&self, host: &str) -> bool {
        self.allowed_hosts.remove(&host.to_ascii_lowercase()).is_some()
    }

    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.contains(&host.to_ascii_lowercase())
    }

    /// Load roots and the client identity into a connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), NetError> {
        for root in self.roots.iter() {
            builder
                .cert_store_mut()
                .add_cert(root.value().clone())
                .map_err(NetError::handshake_failed)?;
        }

        if let Ok(slot) = self.client.read() {
            if let Some(identity) = slot.as_ref() {
                builder
                    .set_certificate(&identity.cert)
                    .map_err(|_| NetError::BadSslClientAuthCert)?;
                builder
                    .set_private_key(&identity.key)
                    .map_err(|_| NetError::BadSslClientAuthCert)?;
            }
        }
        Ok(())
    }

    /// Per-connection settings: waive verification for allowed hosts, or
    /// when the job opted out.
    pub fn configure_connection(
        &self,
        config: &mut ConnectConfiguration,
        host: &str,
        verify_peer: bool,
    ) {
        if !verify_peer || self.is_host_allowed(host) {
            config.set_verify_hostname(false);
            config.set_verify(SslVerifyMode::NONE);
        }
    }

    /// Check the negotiated peer chain against the blacklist and CRLs.
    pub fn check_peer(&self, ssl: &SslRef, host: &str, verify_peer: bool) -> Result<PeerTrust, NetError> {
        if !verify_peer || self.is_host_allowed(host) {
            return Ok(PeerTrust {
                override_applied: true,
                ev_policy: None,
            });
        }

        let mut chain: Vec<&X509Ref> = Vec::new();
        if let Some(stack) = ssl.peer_cert_chain() {
            chain.extend(stack.iter());
        }

        for cert in &chain {
            let fp = fingerprint(cert)?;
            if self.blacklist.contains(&fp) {
                tracing::warn!(host, fingerprint = %fingerprint_hex(&fp), "blacklisted certificate in chain");
                return Err(NetError::CertBlacklisted);
            }

            let serial = cert
                .serial_number()
                .to_bn()
                .map_err(NetError::handshake_failed)?
                .to_vec();
            let serial = strip_leading_zeros(&serial);
            if self.crls.iter().any(|crl| crl.is_revoked(serial)) {
                tracing::warn!(host, "revoked certificate in chain");
                return Err(NetError::CertRevoked);
            }
        }

        let ev_policy = match chain.last() {
            Some(root) => {
                let fp = fingerprint(root)?;
                self.ev_oids.get(&fp).map(|oid| oid.value().clone())
            }
            None => None,
        };

        Ok(PeerTrust {
            override_applied: false,
            ev_policy,
        })
    }
}
