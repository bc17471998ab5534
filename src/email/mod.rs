//! Transactional email: templates, preferences and delivery.

pub mod attachment;
pub mod dispatcher;
pub mod error;
pub mod template;
pub mod transport;

pub use attachment::Attachment;
pub use dispatcher::{
    BroadcastReport, EmailContext, EmailContextSource, EmailDispatcher, EmailType, SendOutcome,
    SendRequest, SkipReason,
};
pub use error::{MailError, MailResult};
pub use template::{PaymentSummary, TemplateContext};
pub use transport::{LogTransport, MailTransport, OutgoingEmail, ResendTransport};
