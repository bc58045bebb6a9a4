use crate::mailer::{ContactEmail, DeliveryFailure, Mailer, TransportConfig};
use tracing::{error, warn};

/// The sends a single submission may make. There is no way past [`DeliveryAttempt::RelaxedTrustRetry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAttempt {
    Initial,
    RelaxedTrustRetry,
}

impl DeliveryAttempt {
    fn config(self, base: &TransportConfig) -> TransportConfig {
        match self {
            DeliveryAttempt::Initial => base.clone(),
            DeliveryAttempt::RelaxedTrustRetry => base.relaxed(),
        }
    }

    /// The attempt which follows this one failing with `failure`, if any.
    pub fn next(self, failure: &DeliveryFailure) -> Option<DeliveryAttempt> {
        match self {
            DeliveryAttempt::Initial if failure.is_self_signed_certificate() => {
                Some(DeliveryAttempt::RelaxedTrustRetry)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(DeliveryFailure),
}

/// Sends `email`, retrying once with relaxed trust if the relay presents a self-signed chain.
pub async fn deliver<MailerT: Mailer + ?Sized>(
    mailer: &MailerT,
    config: &TransportConfig,
    email: &ContactEmail,
) -> DeliveryOutcome {
    let mut attempt = DeliveryAttempt::Initial;
    loop {
        let failure = match mailer.send(&attempt.config(config), email).await {
            Ok(()) => return DeliveryOutcome::Sent,
            Err(failure) => failure,
        };
        match attempt.next(&failure) {
            Some(next) => {
                warn!(
                    "Self signed certificate in certificate chain. Retrying without certificate \
                    verification. Use a valid certificate in production."
                );
                attempt = next;
            }
            None => {
                match attempt {
                    DeliveryAttempt::Initial => {
                        error!("Could not send contact email: {failure}")
                    }
                    DeliveryAttempt::RelaxedTrustRetry => error!(
                        "Could not send contact email after disabling certificate verification: \
                        {failure}"
                    ),
                }
                return DeliveryOutcome::Failed(failure);
            }
        }
    }
}
