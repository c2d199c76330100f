use std::collections::HashMap;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use crate::config::ApiToken;

const BEARER_SCHEME: &str = "bearer";

/// Who is making a write request. The name is recorded as the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
}

/// Decides whether a request may write, and on whose behalf.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Accepts `Authorization: Bearer <token>` for any configured `user:token` pair.
pub struct TokenAuthorizer {
    users_by_token: HashMap<String, String>,
}

impl TokenAuthorizer {
    pub fn new(tokens: &[ApiToken]) -> Self {
        let users_by_token = tokens.iter()
            .map(|x| (x.token.clone(), x.user.clone()))
            .collect();
        Self { users_by_token }
    }
}

impl Authorizer for TokenAuthorizer {
    fn authorize(&self, headers: &HeaderMap) -> Option<Principal> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            return None;
        }
        let name = self.users_by_token.get(token.trim())?;
        Some(Principal { name: name.clone() })
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use super::*;

    fn authorizer() -> TokenAuthorizer {
        TokenAuthorizer::new(&[
            ApiToken { user: "alice".into(), token: "s3cret".into() },
            ApiToken { user: "bob".into(), token: "hunter2".into() },
        ])
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_maps_to_user() {
        let auth = authorizer();
        assert_eq!(auth.authorize(&headers("Bearer s3cret")), Some(Principal { name: "alice".into() }));
        assert_eq!(auth.authorize(&headers("bearer hunter2")), Some(Principal { name: "bob".into() }));
    }

    #[test]
    fn anything_else_is_anonymous() {
        let auth = authorizer();
        assert_eq!(auth.authorize(&HeaderMap::new()), None);
        assert_eq!(auth.authorize(&headers("Bearer nope")), None);
        assert_eq!(auth.authorize(&headers("Basic s3cret")), None);
        assert_eq!(auth.authorize(&headers("s3cret")), None);
    }
}
