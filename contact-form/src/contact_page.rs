use crate::{
    flash::{Flash, FlashMessage},
    session::User,
};
use serde::Serialize;
use tinytemplate::{error::Error, TinyTemplate};

const CONTACT_TEMPLATE_NAME: &str = "contact";
const CONTACT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact.html"
));
const CONTACT_TITLE: &str = "Contact";

/// What the contact page should show to the current visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactPage {
    pub template: &'static str,
    pub title: &'static str,
    /// Without a session the visitor has to tell us their name and email.
    pub unknown_user: bool,
}

#[derive(Serialize)]
struct Context<'a> {
    title: &'a str,
    unknown_user: bool,
    errors: &'a [FlashMessage],
    success: &'a [FlashMessage],
}

impl ContactPage {
    pub fn present(user: Option<&User>) -> Self {
        Self {
            template: CONTACT_TEMPLATE_NAME,
            title: CONTACT_TITLE,
            unknown_user: user.is_none(),
        }
    }

    pub fn render(&self, flash: &Flash) -> Result<String, Error> {
        let mut tt = TinyTemplate::new();
        tt.add_template(CONTACT_TEMPLATE_NAME, CONTACT_TEMPLATE)?;
        let context = Context {
            title: self.title,
            unknown_user: self.unknown_user,
            errors: &flash.errors,
            success: &flash.success,
        };
        tt.render(self.template, &context)
    }
}
