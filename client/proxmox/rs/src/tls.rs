use std::sync::Arc;

use rustls::{
  DigitallySignedStruct, SignatureScheme,
  client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
  },
  crypto::CryptoProvider,
  pki_types::{CertificateDer, ServerName, UnixTime},
};
use sha2::{Digest, Sha256};

/// Accepts exactly the certificates whose SHA-256 fingerprint is
/// pinned, regardless of chain validity. Signatures are still
/// verified against the presented certificate.
#[derive(Debug)]
pub struct FingerprintVerifier {
  fingerprints: Vec<String>,
  provider: Arc<CryptoProvider>,
}

impl FingerprintVerifier {
  pub fn new(fingerprints: &[String]) -> FingerprintVerifier {
    FingerprintVerifier {
      fingerprints: fingerprints
        .iter()
        .map(|f| normalize_fingerprint(f))
        .collect(),
      provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
    }
  }

  pub fn client_config(fingerprints: &[String]) -> rustls::ClientConfig {
    let verifier = Arc::new(FingerprintVerifier::new(fingerprints));
    rustls::ClientConfig::builder()
      .dangerous()
      .with_custom_certificate_verifier(verifier)
      .with_no_client_auth()
  }
}

/// Lowercase hex, colons and whitespace stripped.
pub fn normalize_fingerprint(fingerprint: &str) -> String {
  fingerprint
    .chars()
    .filter(|c| c.is_ascii_hexdigit())
    .collect::<String>()
    .to_ascii_lowercase()
}

impl ServerCertVerifier for FingerprintVerifier {
  fn verify_server_cert(
    &self,
    end_entity: &CertificateDer<'_>,
    _intermediates: &[CertificateDer<'_>],
    _server_name: &ServerName<'_>,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> Result<ServerCertVerified, rustls::Error> {
    let digest = hex::encode(Sha256::digest(end_entity.as_ref()));
    if self.fingerprints.iter().any(|f| f == &digest) {
      Ok(ServerCertVerified::assertion())
    } else {
      Err(rustls::Error::General(format!(
        "certificate fingerprint {digest} is not pinned"
      )))
    }
  }

  fn verify_tls12_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    rustls::crypto::verify_tls12_signature(
      message,
      cert,
      dss,
      &self.provider.signature_verification_algorithms,
    )
  }

  fn verify_tls13_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    rustls::crypto::verify_tls13_signature(
      message,
      cert,
      dss,
      &self.provider.signature_verification_algorithms,
    )
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    self
      .provider
      .signature_verification_algorithms
      .supported_schemes()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fingerprints_normalize_to_bare_hex() {
    assert_eq!(
      normalize_fingerprint("AB:CD:12: 34"),
      "abcd1234"
    );
    assert_eq!(normalize_fingerprint("abcd1234"), "abcd1234");
  }
}
