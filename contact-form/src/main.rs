mod contact_page;
mod delivery;
mod flash;
mod mailer;
mod session;
mod submission;

use contact_page::ContactPage;
use delivery::{deliver, DeliveryOutcome};
use flash::{Flash, FlashMessage};
use lambda_http::{
    http::{header, Method, StatusCode},
    run, service_fn, Body, Error, Request, RequestPayloadExt, Response,
};
use mailer::{LettreMailer, Mailer, TransportConfig};
use session::{ForwardedIdentitySessionStore, SessionStore};
use std::borrow::Cow;
use submission::{ContactFormSubmission, ContactSubmission, VisitorIdentity};
use tracing::{error, info, warn};

const CONTACT_PATH: &str = "/contact";

const TO_ADDRESS: &str = "Month of Code organisers <organisers@monthofcode.dev>";
const SUBJECT: &str = "JIIT Month of Code";

const SENT_MESSAGE: &str = "Email has been sent successfully!";
const NOT_SENT_MESSAGE: &str = "Error sending the message. Please try again shortly.";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let handler = ContactFormHandler::new(ForwardedIdentitySessionStore, LettreMailer);
    run(service_fn(|event| handler.handle(event))).await
}

struct ContactFormHandler<SessionStoreT: SessionStore, MailerT: Mailer> {
    session_store: SessionStoreT,
    mailer: MailerT,
}

impl<SessionStoreT: SessionStore, MailerT: Mailer> ContactFormHandler<SessionStoreT, MailerT> {
    fn new(session_store: SessionStoreT, mailer: MailerT) -> Self {
        Self {
            session_store,
            mailer,
        }
    }

    async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let result = match (event.method(), event.uri().path()) {
            (&Method::GET, CONTACT_PATH) => self.show_contact_form(&event).await,
            (&Method::POST, CONTACT_PATH) => return self.submit_contact_form(&event).await,
            (method, path) => Err(ContactFormError::NotFound {
                method: method.to_string(),
                path: path.into(),
            }),
        };
        match result {
            Ok(response) => Ok(response),
            Err(error) => {
                error.log();
                error.into_response()
            }
        }
    }

    async fn show_contact_form(&self, event: &Request) -> Result<Response<Body>, ContactFormError> {
        let user = self.session_store.current_user(event).await;
        let flash = Flash::from_request(event);
        let page = ContactPage::present(user.as_ref())
            .render(&flash)
            .map_err(|error| ContactFormError::InternalError {
                description: format!("Error rendering contact page: {error}"),
            })?;
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8");
        if !flash.is_empty() {
            response = response.header(
                header::SET_COOKIE,
                Flash::removal_cookie().encoded().to_string(),
            );
        }
        response
            .body(page.into())
            .map_err(|error| ContactFormError::InternalError {
                description: format!("Error building response: {error}"),
            })
    }

    async fn submit_contact_form(&self, event: &Request) -> Result<Response<Body>, Error> {
        let form = match event.payload::<ContactFormSubmission>() {
            Ok(Some(form)) => form,
            Ok(None) => ContactFormSubmission::default(),
            Err(error) => {
                warn!("Treating unreadable contact form body as empty: {error}");
                ContactFormSubmission::default()
            }
        };
        let user = self.session_store.current_user(event).await;
        let identity = VisitorIdentity::resolve(user.as_ref(), &form);
        info!(
            "Received contact form submission from {} visitor",
            if identity.is_guest() { "guest" } else { "signed-in" }
        );

        let submission =
            match ContactSubmission::validate(identity, form.message.unwrap_or_default()) {
                Ok(submission) => submission,
                Err(errors) => {
                    return Flash::errors(errors.into_iter().map(FlashMessage::from))
                        .into_redirect(CONTACT_PATH)
                }
            };
        let email = submission.compose(&Self::recipient(), SUBJECT);
        let config = TransportConfig::from_environment();
        let flash = match deliver(&self.mailer, &config, &email).await {
            DeliveryOutcome::Sent => Flash::success(SENT_MESSAGE),
            DeliveryOutcome::Failed(_) => Flash::errors([FlashMessage::new(NOT_SENT_MESSAGE)]),
        };
        flash.into_redirect(CONTACT_PATH)
    }

    fn recipient() -> Cow<'static, str> {
        std::env::var("CONTACT_RECIPIENT")
            .map(Cow::Owned)
            .unwrap_or(TO_ADDRESS.into())
    }
}

#[derive(Debug)]
enum ContactFormError {
    InternalError { description: String },
    NotFound { method: String, path: String },
}

impl ContactFormError {
    fn log(&self) {
        match self {
            ContactFormError::InternalError { description } => {
                error!("Internal error serving contact form: {description}");
            }
            ContactFormError::NotFound { method, path } => {
                info!("No route for {method} {path}");
            }
        }
    }

    fn into_response(self) -> Result<Response<Body>, Error> {
        let (status, body) = match self {
            ContactFormError::InternalError { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again shortly.",
            ),
            ContactFormError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not found"),
        };
        Ok(Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.into())?)
    }
}

impl std::fmt::Display for ContactFormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactFormError::InternalError { description } => {
                write!(f, "Internal error: {description}")
            }
            ContactFormError::NotFound { method, path } => write!(f, "Not found: {method} {path}"),
        }
    }
}

impl std::error::Error for ContactFormError {}
