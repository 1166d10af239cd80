use url::Url;

use crate::error::{Error, Result};

/// Normalize an operator-supplied host string into a base URL.
///
/// Rules: default scheme `https`, default port per product
/// (8006 for PVE/PMG, 8007 for PBS), IPv6 literals bracketed,
/// trailing slashes trimmed.
pub fn normalize_host(raw: &str, default_port: u16) -> Result<String> {
  let raw = raw.trim().trim_end_matches('/');
  if raw.is_empty() {
    return Err(Error::Fatal("empty host".to_string()));
  }

  // Bare IPv6 literals need brackets before Url will parse them.
  let raw = if raw.matches(':').count() >= 2
    && !raw.contains('[')
    && !raw.contains("://")
  {
    format!("[{raw}]")
  } else {
    raw.to_string()
  };

  let with_scheme = if raw.contains("://") {
    raw
  } else {
    format!("https://{raw}")
  };

  let mut url = Url::parse(&with_scheme)
    .map_err(|e| Error::Fatal(format!("invalid host '{with_scheme}' | {e}")))?;

  if !matches!(url.scheme(), "http" | "https") {
    return Err(Error::Fatal(format!(
      "unsupported scheme '{}'",
      url.scheme()
    )));
  }
  if url.host_str().is_none() {
    return Err(Error::Fatal(format!("host missing in '{with_scheme}'")));
  }
  if url.port().is_none() {
    // Explicit 443 stays implicit through Url, anything else is set.
    url
      .set_port(Some(default_port))
      .map_err(|_| Error::Fatal("cannot set port".to_string()))?;
  }

  let mut base = url.to_string();
  while base.ends_with('/') {
    base.pop();
  }
  Ok(base)
}
