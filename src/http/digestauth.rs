//! HTTP Digest Authentication (RFC 7616).
//!
//! Mirrors Chromium's `net/http/http_auth_handler_digest.cc`: MD5 and
//! SHA-256 (plus their `-sess` variants), `qop=auth`, nonce counting.

use crate::base::neterror::NetError;
use crate::http::authchallenge::{parse_param, split_params, AuthChallenge, AuthScheme, Credential};
use boring::hash::{hash, MessageDigest};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// Not named by the server; hashes with MD5 and is omitted from the reply.
    #[default]
    Unspecified,
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "md5-sess" => Some(Self::Md5Sess),
            "sha-256" => Some(Self::Sha256),
            "sha-256-sess" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn digest(self) -> MessageDigest {
        match self {
            Self::Sha256 | Self::Sha256Sess => MessageDigest::sha256(),
            _ => MessageDigest::md5(),
        }
    }
}

/// State for answering one Digest challenge.
#[derive(Debug, Clone)]
pub struct DigestAuthHandler {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: DigestAlgorithm,
    /// Only `qop=auth` is supported; `auth-int` offers are ignored.
    qop_auth: bool,
    stale: bool,
    nonce_count: u32,
}

impl DigestAuthHandler {
    /// Build from a parsed challenge. The challenge must be a Digest one.
    pub fn from_challenge(challenge: &AuthChallenge) -> Result<Self, NetError> {
        if challenge.scheme != AuthScheme::Digest {
            return Err(NetError::UnsupportedAuthScheme);
        }
        Self::parse_params(&challenge.params)
    }

    /// Parse the parameter list that follows `Digest `.
    pub fn parse_params(params: &str) -> Result<Self, NetError> {
        let mut handler = Self {
            realm: String::new(),
            nonce: String::new(),
            opaque: None,
            algorithm: DigestAlgorithm::default(),
            qop_auth: false,
            stale: false,
            nonce_count: 0,
        };

        for part in split_params(params) {
            let (key, value) = parse_param(part).ok_or(NetError::InvalidResponse)?;
            match key.to_ascii_lowercase().as_str() {
                "realm" => handler.realm = value.to_string(),
                "nonce" => handler.nonce = value.to_string(),
                "opaque" => handler.opaque = Some(value.to_string()),
                "algorithm" => {
                    handler.algorithm =
                        DigestAlgorithm::parse(value).ok_or(NetError::UnsupportedAuthScheme)?;
                }
                "qop" => {
                    handler.qop_auth = value
                        .split(',')
                        .any(|q| q.trim().eq_ignore_ascii_case("auth"));
                }
                "stale" => handler.stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if handler.nonce.is_empty() {
            return Err(NetError::InvalidResponse);
        }
        Ok(handler)
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// The server rejected the nonce, not the credentials.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Produce the full `Authorization` value for one request.
    pub fn generate_auth_token(
        &mut self,
        method: &str,
        uri: &str,
        credential: &Credential,
    ) -> Result<String, NetError> {
        self.nonce_count += 1;
        let nc = format!("{:08x}", self.nonce_count);
        let cnonce = generate_cnonce()?;
        let response = self.compute_response(method, uri, credential, &cnonce, &nc)?;

        let mut auth = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            credential.username, self.realm, self.nonce, uri
        );
        if self.algorithm != DigestAlgorithm::Unspecified {
            let _ = write!(auth, ", algorithm={}", self.algorithm.name());
        }
        let _ = write!(auth, ", response=\"{}\"", response);
        if let Some(opaque) = &self.opaque {
            let _ = write!(auth, ", opaque=\"{}\"", opaque);
        }
        if self.qop_auth {
            let _ = write!(auth, ", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce);
        }
        Ok(auth)
    }

    fn compute_response(
        &self,
        method: &str,
        uri: &str,
        credential: &Credential,
        cnonce: &str,
        nc: &str,
    ) -> Result<String, NetError> {
        let mut ha1 = self.hex_hash(&format!(
            "{}:{}:{}",
            credential.username,
            self.realm,
            credential.password.as_str()
        ))?;
        if self.algorithm.is_session() {
            ha1 = self.hex_hash(&format!("{}:{}:{}", ha1, self.nonce, cnonce))?;
        }
        let ha2 = self.hex_hash(&format!("{}:{}", method, uri))?;

        let input = if self.qop_auth {
            format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2)
        } else {
            format!("{}:{}:{}", ha1, self.nonce, ha2)
        };
        self.hex_hash(&input)
    }

    fn hex_hash(&self, input: &str) -> Result<String, NetError> {
        let digest = hash(self.algorithm.digest(), input.as_bytes())
            .map_err(|_| NetError::InvalidAuthCredentials)?;
        Ok(hex(&digest))
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn generate_cnonce() -> Result<String, NetError> {
    let mut raw = [0u8; 8];
    boring::rand::rand_bytes(&mut raw).map_err(|_| NetError::InvalidAuthCredentials)?;
    Ok(hex(&raw))
}
