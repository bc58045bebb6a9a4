use async_trait::async_trait;
use lambda_http::Request;

const FORWARDED_EMAIL_HEADER: &str = "X-Forwarded-Email";
const FORWARDED_NAME_HEADER: &str = "X-Forwarded-Preferred-Username";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub profile: Profile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub name: Option<String>,
}

/// Looks up the authenticated user, if any, behind a request.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn current_user(&self, request: &Request) -> Option<User>;
}

/// Trusts the identity headers of an authenticating reverse proxy such as oauth2-proxy.
///
/// The proxy must strip any copies of these headers sent by the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedIdentitySessionStore;

#[async_trait]
impl SessionStore for ForwardedIdentitySessionStore {
    async fn current_user(&self, request: &Request) -> Option<User> {
        let email = header_value(request, FORWARDED_EMAIL_HEADER)?;
        Some(User {
            email: email.into(),
            profile: Profile {
                name: header_value(request, FORWARDED_NAME_HEADER).map(Into::into),
            },
        })
    }
}

fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
