//! The contract between the loader and its embedder.

use crate::base::neterror::NetError;
use crate::http::authchallenge::AuthChallenge;
use crate::http::response::ResourceResponse;
use crate::loader::request::Composition;
use std::fmt;
use url::Url;

/// The error a client sees when a job fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceError {
    pub error: NetError,
    pub url: Url,
    pub description: String,
}

impl ResourceError {
    pub fn new(error: NetError, url: Url) -> Self {
        let description = error.to_string();
        Self {
            error,
            url,
            description,
        }
    }

    /// Chromium-style numeric code.
    pub fn code(&self) -> i32 {
        self.error.as_i32()
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.url, self.code(), self.description)
    }
}

impl std::error::Error for ResourceError {}

/// Callbacks for one job.
///
/// Per job: `did_receive_response` comes before any `did_receive_data`, and
/// exactly one of `did_finish_loading` / `did_fail` ends it. A cancelled job
/// gets neither.
pub trait ResourceHandleClient: Send {
    /// About to follow a redirect to `new_url`.
    fn will_send_request(&mut self, _new_url: &Url, _redirect_response: &ResourceResponse) {}

    fn did_receive_response(&mut self, response: &ResourceResponse);

    /// Returning false refuses the bytes and fails the job with `DataRefused`.
    fn will_receive_data(&mut self, _size: usize) -> bool {
        true
    }

    fn did_receive_data(&mut self, data: &[u8]);

    /// Upload progress.
    fn did_send_data(&mut self, _sent: u64, _total: u64) {}

    fn did_finish_loading(&mut self);

    fn did_fail(&mut self, error: &ResourceError);

    /// The server wants credentials nobody had. Answer through the manager
    /// with `use_credential`, `continue_without_credential` or `cancel`.
    fn did_receive_authentication_challenge(&mut self, _challenge: &AuthChallenge) {}

    /// A certificate problem ended the handshake; true retries the job once
    /// with verification off.
    fn should_retry_without_ssl_verification(&mut self, _error: &ResourceError) -> bool {
        false
    }
}

/// Site filter verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Permit,
    Deny,
    /// Decide later through `set_admission`.
    Ask,
}

/// The embedder's site filter.
pub trait AdmissionPolicy: Send + Sync {
    fn will_permit_send_request(
        &self,
        url: &Url,
        composition: Composition,
        is_synchronous: bool,
    ) -> Permission;
}

impl<F> AdmissionPolicy for F
where
    F: Fn(&Url, Composition, bool) -> Permission + Send + Sync,
{
    fn will_permit_send_request(
        &self,
        url: &Url,
        composition: Composition,
        is_synchronous: bool,
    ) -> Permission {
        self(url, composition, is_synchronous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_error_display() {
        let err = ResourceError::new(
            NetError::TooManyRedirects,
            Url::parse("http://e.com/").unwrap(),
        );
        assert_eq!(err.code(), NetError::TooManyRedirects.as_i32());
        assert!(err.to_string().starts_with("http://e.com/ ("));
    }

    #[test]
    fn test_closure_policy() {
        let policy = |url: &Url, _: Composition, sync: bool| {
            if sync || url.host_str() == Some("blocked.test") {
                Permission::Deny
            } else {
                Permission::Permit
            }
        };
        let ok = Url::parse("http://fine.test/").unwrap();
        let bad = Url::parse("http://blocked.test/").unwrap();
        assert_eq!(policy.will_permit_send_request(&ok, Composition::Other, false), Permission::Permit);
        assert_eq!(policy.will_permit_send_request(&bad, Composition::Other, false), Permission::Deny);
        assert_eq!(policy.will_permit_send_request(&ok, Composition::Other, true), Permission::Deny);
    }
}
