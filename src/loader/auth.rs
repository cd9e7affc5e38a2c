//! Per-job answer to 401/407 challenges.
//!
//! Known credentials are tried transparently: the request's own, then URL
//! userinfo, then the shared auth cache for origins; the proxy
//! configuration, then the cache for proxies. When none is left the
//! challenge goes to the client. After [`MAX_AUTH_ATTEMPTS`] rounds the
//! 401/407 is delivered as an ordinary response.

use crate::base::neterror::NetError;
use crate::http::authchallenge::{AuthChallenge, AuthScheme, Credential};
use crate::http::digestauth::DigestAuthHandler;
use crate::socket::authcache::{AuthCache, AuthEntry};
use crate::socket::proxy::ProxySettings;
use http::header::{HeaderValue, AUTHORIZATION};
use http::{HeaderMap, Method};
use url::Url;

pub const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Where a credential came from. Cached ones are dropped when rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Request,
    UrlUserinfo,
    ProxyConfig,
    Cache,
    Client,
}

/// A credential bound to the challenge it answers.
#[derive(Debug, Clone)]
pub(crate) struct AuthAnswer {
    challenge: AuthChallenge,
    credential: Credential,
    digest: Option<DigestAuthHandler>,
    source: Source,
}

impl AuthAnswer {
    fn new(challenge: AuthChallenge, credential: Credential, source: Source) -> Result<Self, NetError> {
        let digest = match challenge.scheme {
            AuthScheme::Digest => Some(DigestAuthHandler::from_challenge(&challenge)?),
            AuthScheme::Basic => None,
            _ => return Err(NetError::UnsupportedAuthScheme),
        };
        Ok(Self {
            challenge,
            credential,
            digest,
            source,
        })
    }

    fn header_value(&mut self, method: &Method, url: &Url) -> Result<HeaderValue, NetError> {
        let value = match &mut self.digest {
            Some(digest) => {
                let uri = match url.query() {
                    Some(q) => format!("{}?{}", url.path(), q),
                    None => url.path().to_string(),
                };
                digest.generate_auth_token(method.as_str(), &uri, &self.credential)?
            }
            None => self.credential.basic_header_value(),
        };
        HeaderValue::from_str(&value).map_err(|_| NetError::InvalidAuthCredentials)
    }
}

/// What the manager does with a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthDecision {
    /// Replay the request with the new answer.
    Retry,
    /// Hand the challenge to the client and wait.
    Surface(AuthChallenge),
    /// Nothing can answer it; deliver the 401/407 as a normal response.
    Deliver,
}

#[derive(Debug, Default)]
pub(crate) struct AuthState {
    attempts: u32,
    origin: Option<AuthAnswer>,
    proxy: Option<AuthAnswer>,
    tried_request: bool,
    tried_userinfo: bool,
    tried_proxy_config: bool,
    pending: Option<AuthChallenge>,
}

impl AuthState {
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn pending(&self) -> Option<&AuthChallenge> {
        self.pending.as_ref()
    }

    /// Decide how to answer `challenge`.
    pub(crate) fn on_challenge(
        &mut self,
        challenge: AuthChallenge,
        request_credential: Option<&Credential>,
        url: &Url,
        proxy: Option<&ProxySettings>,
        cache: &AuthCache,
    ) -> AuthDecision {
        if !challenge.scheme.is_supported()
            || (challenge.is_proxy && challenge.scheme != AuthScheme::Basic)
        {
            tracing::debug!(scheme = %challenge.scheme, proxy = challenge.is_proxy, "unsupported auth scheme");
            return AuthDecision::Deliver;
        }

        let previous = if challenge.is_proxy {
            self.proxy.take()
        } else {
            self.origin.take()
        };
        if let Some(previous) = previous {
            let stale = challenge.scheme == AuthScheme::Digest
                && previous.challenge.realm == challenge.realm
                && DigestAuthHandler::from_challenge(&challenge).is_ok_and(|d| d.is_stale());
            if stale {
                // New nonce, same credentials.
                if let Ok(answer) = AuthAnswer::new(challenge.clone(), previous.credential, previous.source) {
                    self.set_answer(answer);
                    return AuthDecision::Retry;
                }
            } else if previous.source == Source::Cache {
                forget(cache, &previous.challenge);
            }
        }

        self.attempts += 1;
        if self.attempts > MAX_AUTH_ATTEMPTS {
            tracing::debug!(attempts = self.attempts, realm = %challenge.realm, "auth attempts exhausted");
            return AuthDecision::Deliver;
        }

        let found = if challenge.is_proxy {
            self.next_proxy_credential(&challenge, proxy, cache)
        } else {
            self.next_origin_credential(&challenge, request_credential, url, cache)
        };
        match found {
            Some((credential, source)) => match AuthAnswer::new(challenge.clone(), credential, source) {
                Ok(answer) => {
                    self.set_answer(answer);
                    AuthDecision::Retry
                }
                Err(e) => {
                    tracing::debug!(error = %e, "cannot answer challenge");
                    self.surface(challenge)
                }
            },
            None => self.surface(challenge),
        }
    }

    fn surface(&mut self, challenge: AuthChallenge) -> AuthDecision {
        self.pending = Some(challenge.clone());
        AuthDecision::Surface(challenge)
    }

    fn set_answer(&mut self, answer: AuthAnswer) {
        if answer.challenge.is_proxy {
            self.proxy = Some(answer);
        } else {
            self.origin = Some(answer);
        }
    }

    fn next_origin_credential(
        &mut self,
        challenge: &AuthChallenge,
        request_credential: Option<&Credential>,
        url: &Url,
        cache: &AuthCache,
    ) -> Option<(Credential, Source)> {
        if !self.tried_request {
            self.tried_request = true;
            if let Some(credential) = request_credential {
                return Some((credential.clone(), Source::Request));
            }
        }
        if !self.tried_userinfo {
            self.tried_userinfo = true;
            if !url.username().is_empty() {
                let user = percent_decode(url.username());
                let pass = percent_decode(url.password().unwrap_or_default());
                return Some((Credential::new(user, pass), Source::UrlUserinfo));
            }
        }
        cache
            .lookup(&challenge.host, challenge.port, &challenge.realm)
            .map(|entry| (entry.credential, Source::Cache))
    }

    fn next_proxy_credential(
        &mut self,
        challenge: &AuthChallenge,
        proxy: Option<&ProxySettings>,
        cache: &AuthCache,
    ) -> Option<(Credential, Source)> {
        if !self.tried_proxy_config {
            self.tried_proxy_config = true;
            if let Some(credential) = proxy.and_then(|p| p.credential.clone()) {
                return Some((credential, Source::ProxyConfig));
            }
        }
        cache
            .lookup_proxy(&challenge.host, challenge.port)
            .map(|entry| (entry.credential, Source::Cache))
    }

    /// Answer the pending challenge with a credential from the client.
    pub(crate) fn use_credential(&mut self, credential: Credential) -> Result<(), NetError> {
        let challenge = self.pending.take().ok_or(NetError::MissingAuthCredentials)?;
        let answer = AuthAnswer::new(challenge, credential, Source::Client)?;
        self.set_answer(answer);
        Ok(())
    }

    pub(crate) fn clear_pending(&mut self) -> Option<AuthChallenge> {
        self.pending.take()
    }

    /// Add `Authorization` for the next attempt and route the proxy answer
    /// into the proxy settings.
    pub(crate) fn apply(
        &mut self,
        method: &Method,
        url: &Url,
        headers: &mut HeaderMap,
        proxy: Option<&mut ProxySettings>,
    ) -> Result<(), NetError> {
        if let Some(answer) = self.origin.as_mut() {
            if same_server(&answer.challenge, url) {
                headers.insert(AUTHORIZATION, answer.header_value(method, url)?);
            }
        }
        if let (Some(answer), Some(proxy)) = (self.proxy.as_ref(), proxy) {
            proxy.credential = Some(answer.credential.clone());
        }
        Ok(())
    }

    /// The last response was not a challenge for a side we answered:
    /// remember what worked.
    pub(crate) fn on_success(&mut self, status: u16, cache: &AuthCache) {
        if status != 401 {
            if let Some(answer) = &self.origin {
                if answer.source != Source::Cache {
                    let c = &answer.challenge;
                    cache.store(
                        &c.host,
                        c.port,
                        AuthEntry::new(c.scheme, c.realm.clone(), answer.credential.clone()),
                    );
                }
            }
        }
        if status != 407 {
            if let Some(answer) = &self.proxy {
                if answer.source != Source::Cache {
                    let c = &answer.challenge;
                    cache.store_proxy(
                        &c.host,
                        c.port,
                        AuthEntry::new(c.scheme, c.realm.clone(), answer.credential.clone()),
                    );
                }
            }
        }
    }

    /// Redirects to another origin drop the origin answer.
    pub(crate) fn on_redirect(&mut self, next: &Url) {
        if let Some(answer) = &self.origin {
            if !same_server(&answer.challenge, next) {
                self.origin = None;
            }
        }
        self.tried_request = false;
        self.tried_userinfo = false;
    }
}

fn same_server(challenge: &AuthChallenge, url: &Url) -> bool {
    url.host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(&challenge.host))
        && url.port_or_known_default() == Some(challenge.port)
}

fn forget(cache: &AuthCache, challenge: &AuthChallenge) {
    if challenge.is_proxy {
        cache.remove_proxy(&challenge.host, challenge.port);
    } else {
        cache.remove(&challenge.host, challenge.port, &challenge.realm);
    }
    tracing::debug!(host = %challenge.host, realm = %challenge.realm, "dropped rejected cached credential");
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
