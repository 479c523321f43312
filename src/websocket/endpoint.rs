use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio_tungstenite::tungstenite::http::Uri;

use crate::config::USER_ID_PLACEHOLDER;
use crate::error::ChannelError;

/// Everything outside the RFC 3986 unreserved set is escaped in the identity segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// A validated `ws`/`wss` address for one user identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    identity: String,
}

impl Endpoint {
    /// Render `template` for `identity`
    pub fn from_template(template: &str, identity: &str) -> Result<Self, ChannelError> {
        if identity.is_empty() {
            return Err(ChannelError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }
        if !template.contains(USER_ID_PLACEHOLDER) {
            return Err(ChannelError::InvalidEndpoint(format!(
                "template {:?} has no {} segment",
                template, USER_ID_PLACEHOLDER
            )));
        }

        let segment = utf8_percent_encode(identity, PATH_SEGMENT).to_string();
        let url = template.replace(USER_ID_PLACEHOLDER, &segment);
        let uri: Uri = url
            .parse()
            .map_err(|e| ChannelError::InvalidEndpoint(format!("{}: {}", url, e)))?;

        match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            other => {
                return Err(ChannelError::InvalidEndpoint(format!(
                    "unsupported scheme {:?} in {}",
                    other, url
                )))
            }
        }
        if uri.host().is_none() {
            return Err(ChannelError::InvalidEndpoint(format!("missing host in {}", url)));
        }

        Ok(Self {
            url,
            identity: identity.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
