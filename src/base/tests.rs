use crate::base::neterror::NetError;

#[test]
fn test_net_error_roundtrip() {
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    let loader = NetError::TooManyRedirects;
    assert_eq!(NetError::from(loader.as_i32()), NetError::TooManyRedirects);
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
}

#[test]
fn test_context_variants_share_codes() {
    let err = NetError::ConnectionFailedTo {
        host: "a".into(),
        port: 1,
        reason: "x".into(),
    };
    assert_eq!(err.as_i32(), NetError::ConnectionFailed.as_i32());
    assert_eq!(NetError::admission_denied("blocked").as_i32(), -910);
}

#[test]
fn test_ssl_failure_classification() {
    assert!(NetError::CertRevoked.is_ssl_failure());
    assert!(NetError::handshake_failed("bad").is_ssl_failure());
    assert!(!NetError::ConnectionReset.is_ssl_failure());
    assert!(NetError::TimedOut.is_timeout());
}

#[test]
fn test_io_error_mapping() {
    let err: NetError = std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into();
    assert_eq!(err, NetError::ConnectionRefused);
}
