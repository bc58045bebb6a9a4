use cookie::{Cookie, SameSite};
use lambda_http::{
    http::{header, StatusCode},
    Body, Error, Request, Response,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const FLASH_COOKIE_NAME: &str = "contact_flash";

/// Status messages shown once on the page a redirect leads to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FlashMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success: Vec<FlashMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub msg: String,
}

impl FlashMessage {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Flash {
    pub fn errors(messages: impl IntoIterator<Item = FlashMessage>) -> Self {
        Self {
            errors: messages.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            success: vec![FlashMessage::new(msg)],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.success.is_empty()
    }

    /// Reads the flash cookie of a request. A missing or unreadable cookie yields no messages.
    pub fn from_request(request: &Request) -> Self {
        let Some(cookie) = request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| Cookie::split_parse_encoded(value))
            .filter_map(|cookie| cookie.ok())
            .find(|cookie| cookie.name() == FLASH_COOKIE_NAME)
        else {
            return Self::default();
        };
        match serde_json::from_str(cookie.value()) {
            Ok(flash) => flash,
            Err(error) => {
                warn!("Discarding unreadable flash cookie: {error}");
                Self::default()
            }
        }
    }

    pub fn to_cookie(&self) -> Result<Cookie<'static>, serde_json::Error> {
        Ok(Cookie::build((FLASH_COOKIE_NAME, serde_json::to_string(self)?))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .build())
    }

    /// Cookie which makes the browser forget flash messages it has already displayed.
    pub fn removal_cookie() -> Cookie<'static> {
        let mut cookie = Cookie::build((FLASH_COOKIE_NAME, ""))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .build();
        cookie.make_removal();
        cookie
    }

    /// `303 See Other` to `location`, carrying these messages.
    pub fn into_redirect(self, location: &str) -> Result<Response<Body>, Error> {
        Ok(Response::builder()
            .status(StatusCode::SEE_OTHER)
            .header(header::LOCATION, location)
            .header(header::SET_COOKIE, self.to_cookie()?.encoded().to_string())
            .body("".into())?)
    }
}
