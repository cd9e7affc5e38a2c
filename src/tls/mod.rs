//! Trust material consulted during handshakes: extra roots, CRLs, client
//! certificates, blacklists, EV policy OIDs and per-host overrides.

pub mod crl;
pub mod truststore;

pub use truststore::{Fingerprint, PeerTrust, TrustStore};
