//! Connection URL construction.
//!
//! Identity travels as query parameters on the upgrade request, never in a
//! handshake frame after the socket opens.

use parley_core::SessionError;
use parley_core::ids::{ChatId, ClientId, TenantId};
use reqwest::Url;

/// Build the WebSocket URL for one connection attempt.
///
/// `tenant_id` is required; a blank tenant is a configuration error and is
/// reported before any network activity.
pub fn build_connection_url(
    base: &str,
    tenant_id: &TenantId,
    chat_id: Option<&ChatId>,
    client_id: Option<&ClientId>,
    token: Option<&str>,
) -> Result<Url, SessionError> {
    if tenant_id.trim().is_empty() {
        return Err(SessionError::Unrecoverable(
            "tenant id is required to connect".into(),
        ));
    }
    let mut url = Url::parse(base)
        .map_err(|e| SessionError::Unrecoverable(format!("invalid connection url {base}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SessionError::Unrecoverable(format!(
            "connection url must use ws or wss, got {}",
            url.scheme()
        )));
    }

    {
        let mut query = url.query_pairs_mut();
        let _ = query.append_pair("tenant_id", tenant_id.trim());
        if let Some(chat_id) = chat_id {
            let _ = query.append_pair("chat_id", chat_id);
        }
        if let Some(client_id) = client_id {
            let _ = query.append_pair("client_id", client_id);
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let _ = query.append_pair("token", token);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn pairs(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn tenant_only() {
        let url = build_connection_url("ws://localhost:8000/ws", &"acme".into(), None, None, None)
            .unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws?tenant_id=acme");
    }

    #[test]
    fn all_parameters() {
        let url = build_connection_url(
            "wss://chat.example.com/ws",
            &"acme".into(),
            Some(&"c1".into()),
            Some(&"cl-7".into()),
            Some("s3cret token"),
        )
        .unwrap();
        assert_eq!(
            pairs(&url),
            vec![
                ("tenant_id".into(), "acme".into()),
                ("chat_id".into(), "c1".into()),
                ("client_id".into(), "cl-7".into()),
                ("token".into(), "s3cret token".into()),
            ]
        );
    }

    #[test]
    fn keeps_existing_query() {
        let url = build_connection_url("ws://h/ws?v=2", &"t".into(), None, None, None).unwrap();
        assert_eq!(url.query(), Some("v=2&tenant_id=t"));
    }

    #[test]
    fn blank_tenant_is_configuration_error() {
        let err = build_connection_url("ws://h/ws", &"  ".into(), None, None, None).unwrap_err();
        assert_matches!(err, SessionError::Unrecoverable(_));
        assert!(err.class().is_unrecoverable());
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(build_connection_url("not a url", &"t".into(), None, None, None).is_err());
        assert!(build_connection_url("http://h/ws", &"t".into(), None, None, None).is_err());
    }

    #[test]
    fn empty_token_is_omitted() {
        let url = build_connection_url("ws://h/ws", &"t".into(), None, None, Some("")).unwrap();
        assert_eq!(url.query(), Some("tenant_id=t"));
    }
}
