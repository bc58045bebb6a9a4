use crate::{flash::FlashMessage, mailer::ContactEmail, session::User};
use lettre::Address;
use serde::Deserialize;

/// Raw body of a contact form post. Absent fields count as empty.
#[derive(Deserialize, Debug, Default)]
pub struct ContactFormSubmission {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

/// Who is sending a message, decided once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitorIdentity {
    /// No session; name and email are whatever the visitor typed.
    Guest { name: String, email: String },
    /// Taken from the account and trusted as is.
    Authenticated { name: String, email: String },
}

impl VisitorIdentity {
    pub fn resolve(user: Option<&User>, form: &ContactFormSubmission) -> Self {
        match user {
            Some(user) => VisitorIdentity::Authenticated {
                name: user.profile.name.clone().unwrap_or_default(),
                email: user.email.clone(),
            },
            None => VisitorIdentity::Guest {
                name: form.name.clone().unwrap_or_default(),
                email: form.email.clone().unwrap_or_default(),
            },
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, VisitorIdentity::Guest { .. })
    }

    fn into_sender(self) -> (String, String) {
        match self {
            VisitorIdentity::Guest { name, email }
            | VisitorIdentity::Authenticated { name, email } => (name, email),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    MissingName,
    InvalidEmail,
    MissingMessage,
}

impl ValidationError {
    pub fn message(self) -> &'static str {
        match self {
            ValidationError::MissingName => "Please enter your name",
            ValidationError::InvalidEmail => "Please enter a valid email address.",
            ValidationError::MissingMessage => "Please enter your message.",
        }
    }
}

impl From<ValidationError> for FlashMessage {
    fn from(error: ValidationError) -> Self {
        FlashMessage::new(error.message())
    }
}

/// A submission which passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSubmission {
    pub sender_name: String,
    pub sender_email: String,
    pub message: String,
}

impl ContactSubmission {
    /// Checks guest fields (for guests only) and the message, in that order.
    pub fn validate(
        identity: VisitorIdentity,
        message: String,
    ) -> Result<Self, Vec<ValidationError>> {
        let mut errors = vec![];
        if let VisitorIdentity::Guest { name, email } = &identity {
            if name.is_empty() {
                errors.push(ValidationError::MissingName);
            }
            if !is_email(email) {
                errors.push(ValidationError::InvalidEmail);
            }
        }
        if message.is_empty() {
            errors.push(ValidationError::MissingMessage);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let (sender_name, sender_email) = identity.into_sender();
        Ok(Self {
            sender_name,
            sender_email,
            message,
        })
    }

    pub fn compose(self, to: &str, subject: &str) -> ContactEmail {
        ContactEmail {
            to: to.into(),
            from_name: self.sender_name,
            from_email: self.sender_email,
            subject: subject.into(),
            text: self.message,
        }
    }
}

/// Whether `email` is a syntactically valid address on a host name with a real top-level domain.
///
/// Address literals (`a@[1.2.3.4]`), bare IPs and underscores in the host are refused.
pub fn is_email(email: &str) -> bool {
    email
        .parse::<Address>()
        .is_ok_and(|address| is_host_name(address.domain()))
}

fn is_host_name(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    let [.., top_level] = labels.as_slice() else {
        return false;
    };
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '-')
        })
        && (top_level.starts_with("xn--")
            || (top_level.chars().count() >= 2 && top_level.chars().all(char::is_alphabetic)))
}
