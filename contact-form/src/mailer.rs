use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
    },
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::{borrow::Cow, error::Error as StdError, fmt::Display};
use url::Url;

/// Failure reason which qualifies a delivery for a retry with relaxed certificate checks.
pub const SELF_SIGNED_CERT_IN_CHAIN: &str = "self signed certificate in certificate chain";

const SMTP_URL: &str = "smtps://smtp.sendgrid.net";
const SMTP_USERNAME_VAR: &str = "SENDGRID_USER";
const SMTP_PASSWORD_VAR: &str = "SENDGRID_PASSWORD";

/// Sends composed contact emails through some relay.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, config: &TransportConfig, email: &ContactEmail)
        -> Result<(), DeliveryFailure>;
}

/// A fully composed contact email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactEmail {
    pub to: String,
    pub from_name: String,
    pub from_email: String,
    pub subject: String,
    pub text: String,
}

impl ContactEmail {
    /// The `From` header as `"<name> <email>"`.
    pub fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub smtp_url: Cow<'static, str>,
    pub credentials: SmtpCredentials,
    pub tls_relaxed: bool,
}

impl TransportConfig {
    /// Reads the relay endpoint and credentials from the process environment.
    ///
    /// Missing credentials are not an error here; the relay rejects the login instead.
    pub fn from_environment() -> Self {
        Self {
            smtp_url: std::env::var("SMTP_URL")
                .map(Cow::Owned)
                .unwrap_or(SMTP_URL.into()),
            credentials: SmtpCredentials {
                username: std::env::var(SMTP_USERNAME_VAR).unwrap_or_default(),
                password: std::env::var(SMTP_PASSWORD_VAR).unwrap_or_default(),
            },
            tls_relaxed: false,
        }
    }

    /// The same configuration, but accepting certificates which do not chain to a trusted root.
    pub fn relaxed(&self) -> Self {
        Self {
            tls_relaxed: true,
            ..self.clone()
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub reason: String,
}

impl DeliveryFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn is_self_signed_certificate(&self) -> bool {
        self.reason == SELF_SIGNED_CERT_IN_CHAIN
    }

    fn from_error(error: &(dyn StdError + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut current = Some(error);
        while let Some(error) = current {
            chain.push(error.to_string());
            current = error.source();
        }
        if chain.iter().any(|message| indicates_untrusted_chain(message)) {
            Self::new(SELF_SIGNED_CERT_IN_CHAIN)
        } else {
            Self::new(chain.join(": "))
        }
    }
}

impl Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for DeliveryFailure {}

fn indicates_untrusted_chain(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("unknownissuer")
        || message.contains("self signed")
        || message.contains("self-signed")
}

/// [`Mailer`] which speaks SMTP through lettre. Every send builds a fresh transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LettreMailer;

#[async_trait]
impl Mailer for LettreMailer {
    async fn send(
        &self,
        config: &TransportConfig,
        email: &ContactEmail,
    ) -> Result<(), DeliveryFailure> {
        let message = build_message(email)?;
        let transport = build_transport(config)?;
        transport
            .send(message)
            .await
            .map_err(|error| DeliveryFailure::from_error(&error))?;
        Ok(())
    }
}

fn build_message(email: &ContactEmail) -> Result<Message, DeliveryFailure> {
    let sender_address: Address = email.from_email.parse().map_err(|error| {
        DeliveryFailure::new(format!(
            "Invalid sender address {}: {error}",
            email.from_email
        ))
    })?;
    let sender_name = Some(email.from_name.clone()).filter(|name| !name.is_empty());
    let recipient: Mailbox = email.to.parse().map_err(|error| {
        DeliveryFailure::new(format!("Invalid recipient {}: {error}", email.to))
    })?;
    Message::builder()
        .from(Mailbox::new(sender_name, sender_address))
        .to(recipient)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(email.text.clone())
        .map_err(|error| DeliveryFailure::new(format!("Error building message: {error}")))
}

fn build_transport(
    config: &TransportConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryFailure> {
    let endpoint = SmtpEndpoint::parse(&config.smtp_url)?;
    let mut builder = match endpoint.security {
        Security::None => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(endpoint.host.as_str())
        }
        Security::StartTls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
                .map_err(|error| DeliveryFailure::from_error(&error))?
        }
        Security::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host)
            .map_err(|error| DeliveryFailure::from_error(&error))?,
    };
    if let Some(port) = endpoint.port {
        builder = builder.port(port);
    }
    if config.tls_relaxed {
        if let Some(tls) = endpoint.relaxed_tls()? {
            builder = builder.tls(tls);
        }
    }

    // Credentials never travel over an unencrypted connection. A relay which requires them
    // rejects the session instead.
    builder = builder.authentication(vec![Mechanism::Plain]);
    if endpoint.security != Security::None {
        builder = builder.credentials(Credentials::new(
            config.credentials.username.clone(),
            config.credentials.password.clone(),
        ));
    }

    Ok(builder.build())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Security {
    None,
    StartTls,
    Wrapper,
}

#[derive(Debug, PartialEq, Eq)]
struct SmtpEndpoint {
    host: String,
    port: Option<u16>,
    security: Security,
}

impl SmtpEndpoint {
    fn parse(smtp_url: &str) -> Result<Self, DeliveryFailure> {
        let url = Url::parse(smtp_url)
            .map_err(|error| DeliveryFailure::new(format!("Invalid SMTP URL {smtp_url}: {error}")))?;
        let Some(host) = url.host_str() else {
            return Err(DeliveryFailure::new(format!(
                "SMTP URL {smtp_url} has no host"
            )));
        };
        let security = match url.scheme() {
            "smtps" => Security::Wrapper,
            "smtp"
                if url
                    .query_pairs()
                    .any(|(key, value)| key == "tls" && value == "required") =>
            {
                Security::StartTls
            }
            "smtp" => Security::None,
            scheme => {
                return Err(DeliveryFailure::new(format!(
                    "Unsupported SMTP URL scheme {scheme}"
                )))
            }
        };
        Ok(Self {
            host: host.to_string(),
            port: url.port(),
            security,
        })
    }

    fn relaxed_tls(&self) -> Result<Option<Tls>, DeliveryFailure> {
        if self.security == Security::None {
            return Ok(None);
        }
        let parameters = TlsParameters::builder(self.host.clone())
            .dangerous_accept_invalid_certs(true)
            .build_rustls()
            .map_err(|error| DeliveryFailure::from_error(&error))?;
        Ok(Some(match self.security {
            Security::StartTls => Tls::Required(parameters),
            _ => Tls::Wrapper(parameters),
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::{
        ContactEmail, DeliveryFailure, LettreMailer, Mailer, Security, SmtpEndpoint,
        TransportConfig, SELF_SIGNED_CERT_IN_CHAIN,
    };
    use googletest::prelude::*;
    use lettre::transport::smtp::client::Tls;
    use serial_test::serial;
    use test_support::fake_smtp::{poisoned_smtp_url, FakeSmtpServer};

    #[derive(Debug)]
    struct Wrapping(&'static str, Option<Box<Wrapping>>);

    impl std::fmt::Display for Wrapping {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for Wrapping {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.1
                .as_deref()
                .map(|e| e as &(dyn std::error::Error + 'static))
        }
    }

    #[test]
    fn maps_unknown_issuer_anywhere_in_chain_to_self_signed_reason() -> Result<()> {
        let error = Wrapping(
            "Connection error",
            Some(Box::new(Wrapping(
                "invalid peer certificate: UnknownIssuer",
                None,
            ))),
        );

        let failure = DeliveryFailure::from_error(&error);

        verify_that!(failure.reason.as_str(), eq(SELF_SIGNED_CERT_IN_CHAIN))
    }

    #[test]
    fn keeps_full_chain_as_reason_for_other_errors() -> Result<()> {
        let error = Wrapping(
            "Connection error",
            Some(Box::new(Wrapping("Connection refused", None))),
        );

        let failure = DeliveryFailure::from_error(&error);

        verify_that!(
            failure.reason.as_str(),
            eq("Connection error: Connection refused")
        )
    }

    #[test]
    fn only_exact_reason_counts_as_self_signed_certificate() -> Result<()> {
        verify_that!(
            DeliveryFailure::new(SELF_SIGNED_CERT_IN_CHAIN).is_self_signed_certificate(),
            eq(true)
        )?;
        verify_that!(
            DeliveryFailure::new("Self signed certificate in certificate chain!")
                .is_self_signed_certificate(),
            eq(false)
        )
    }

    #[test]
    fn relaxed_config_differs_only_in_trust() -> Result<()> {
        let config = TransportConfig::from_environment();

        let relaxed = config.relaxed();

        verify_that!(relaxed.tls_relaxed, eq(true))?;
        verify_that!(relaxed.smtp_url, eq(config.smtp_url.clone()))?;
        verify_that!(relaxed.credentials, eq(config.credentials.clone()))
    }

    #[test]
    fn does_not_print_password() -> Result<()> {
        let config = TransportConfig {
            smtp_url: "smtps://relay.example.com".into(),
            credentials: super::SmtpCredentials {
                username: "user".into(),
                password: "hunter2".into(),
            },
            tls_relaxed: false,
        };

        verify_that!(format!("{config:?}"), not(contains_substring("hunter2")))
    }

    #[test]
    fn parses_implicit_tls_endpoint() -> Result<()> {
        verify_that!(
            SmtpEndpoint::parse("smtps://smtp.sendgrid.net"),
            ok(eq(SmtpEndpoint {
                host: "smtp.sendgrid.net".into(),
                port: None,
                security: Security::Wrapper,
            }))
        )
    }

    #[test]
    fn parses_starttls_endpoint_with_port() -> Result<()> {
        verify_that!(
            SmtpEndpoint::parse("smtp://smtp.sendgrid.net:587?tls=required"),
            ok(eq(SmtpEndpoint {
                host: "smtp.sendgrid.net".into(),
                port: Some(587),
                security: Security::StartTls,
            }))
        )
    }

    #[test]
    fn parses_plain_endpoint() -> Result<()> {
        verify_that!(
            SmtpEndpoint::parse("smtp://localhost:4567"),
            ok(eq(SmtpEndpoint {
                host: "localhost".into(),
                port: Some(4567),
                security: Security::None,
            }))
        )
    }

    #[test]
    fn rejects_unknown_scheme() -> Result<()> {
        verify_that!(SmtpEndpoint::parse("http://localhost"), err(anything()))
    }

    #[test]
    fn relaxed_trust_keeps_implicit_tls() -> Result<()> {
        verify_that!(
            relaxed_tls_mode("smtps://smtp.sendgrid.net"),
            ok(some(eq("wrapper")))
        )
    }

    #[test]
    fn relaxed_trust_keeps_required_starttls() -> Result<()> {
        verify_that!(
            relaxed_tls_mode("smtp://smtp.sendgrid.net:587?tls=required"),
            ok(some(eq("required")))
        )
    }

    #[test]
    fn relaxed_trust_does_not_touch_plain_endpoint() -> Result<()> {
        verify_that!(relaxed_tls_mode("smtp://localhost:4567"), ok(none()))
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn delivers_with_relaxed_trust_over_plain_endpoint() {
        let server = FakeSmtpServer::running().await;
        let config = plain_config(FakeSmtpServer::url()).relaxed();

        let result = LettreMailer.send(&config, &arbitrary_email()).await;

        expect_that!(result, ok(anything()));
        expect_that!(server.next_mail().await, some(contains_substring("Test message")));
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn delivers_message_to_smtp_server() {
        let server = FakeSmtpServer::running().await;

        let result = LettreMailer
            .send(&plain_config(FakeSmtpServer::url()), &arbitrary_email())
            .await;

        expect_that!(result, ok(anything()));
        expect_that!(
            server.next_mail().await,
            some(all!(
                contains_substring("From: \"Arbitrary sender\" <email@example.com>"),
                contains_substring("To: \"Organisers\" <organisers@example.com>"),
                contains_substring("Subject: Test subject"),
                contains_substring("Test message")
            ))
        );
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn omits_display_name_when_sender_name_is_empty() {
        let server = FakeSmtpServer::running().await;
        let email = ContactEmail {
            from_name: "".into(),
            ..arbitrary_email()
        };

        let result = LettreMailer
            .send(&plain_config(FakeSmtpServer::url()), &email)
            .await;

        expect_that!(result, ok(anything()));
        expect_that!(
            server.next_mail().await,
            some(contains_substring("From: email@example.com"))
        );
    }

    #[tokio::test]
    async fn reports_failure_when_smtp_server_rejects_mail() -> Result<()> {
        let result = LettreMailer
            .send(&plain_config(poisoned_smtp_url()), &arbitrary_email())
            .await;

        verify_that!(
            result,
            err(predicate(|failure: &DeliveryFailure| !failure
                .is_self_signed_certificate()))
        )
    }

    #[tokio::test]
    async fn reports_failure_for_invalid_recipient() -> Result<()> {
        let email = ContactEmail {
            to: "not a mailbox".into(),
            ..arbitrary_email()
        };

        let result = LettreMailer
            .send(&plain_config(FakeSmtpServer::url()), &email)
            .await;

        verify_that!(
            result,
            err(field!(DeliveryFailure.reason, contains_substring("Invalid recipient")))
        )
    }

    fn plain_config(smtp_url: String) -> TransportConfig {
        TransportConfig {
            smtp_url: smtp_url.into(),
            credentials: super::SmtpCredentials {
                username: "fake SMTP username".into(),
                password: "fake SMTP password".into(),
            },
            tls_relaxed: false,
        }
    }

    fn arbitrary_email() -> ContactEmail {
        ContactEmail {
            to: "Organisers <organisers@example.com>".into(),
            from_name: "Arbitrary sender".into(),
            from_email: "email@example.com".into(),
            subject: "Test subject".into(),
            text: "Test message".into(),
        }
    }

    fn relaxed_tls_mode(
        smtp_url: &str,
    ) -> std::result::Result<Option<&'static str>, DeliveryFailure> {
        let endpoint = SmtpEndpoint::parse(smtp_url)?;
        Ok(endpoint.relaxed_tls()?.map(|tls| match tls {
            Tls::Wrapper(_) => "wrapper",
            Tls::Required(_) => "required",
            _ => "other",
        }))
    }
}
