//! Email dispatcher
//!
//! Resolves templates and placeholder context, honours each parent's
//! communication preferences and hands the message to a [`MailTransport`].
//! Callers on the payment path use [`EmailDispatcher::spawn_template`], which
//! logs failures and never reports them back.

use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DbResult;
use crate::database::store::Store;
use crate::email::attachment::Attachment;
use crate::email::error::{MailError, MailResult};
use crate::email::template::{self, PaymentSummary, TemplateContext};
use crate::email::transport::{MailTransport, OutgoingEmail};
use crate::models::{EmailTemplate, Parent, Player, PreferenceKey, Team};

/// Category of an email, used to pick the recipient's preference switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailType {
    Transactional,
    Campaign,
    Broadcast,
    News,
    Offers,
    Notification,
}

impl EmailType {
    pub fn preference_key(&self) -> PreferenceKey {
        match self {
            Self::Transactional => PreferenceKey::TransactionalEmails,
            Self::Campaign => PreferenceKey::MarketingEmails,
            Self::Broadcast => PreferenceKey::BroadcastEmails,
            Self::News => PreferenceKey::NewsUpdates,
            Self::Offers => PreferenceKey::OffersPromotions,
            Self::Notification => PreferenceKey::EmailNotifications,
        }
    }
}

/// Ids and data placeholders are resolved from.
#[derive(Debug, Clone, Default)]
pub struct EmailContext {
    pub parent_id: Option<Uuid>,
    pub player_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub tournament: Option<Value>,
    pub payment: Option<PaymentSummary>,
    pub verification_token: Option<String>,
}

impl EmailContext {
    pub fn for_parent(parent_id: Uuid) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Default::default()
        }
    }
}

pub struct SendRequest {
    /// Empty means "the context parent and their guardians".
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub context: EmailContext,
    pub email_type: EmailType,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UserOptOut,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserOptOut => "user_opt_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    Skipped { reason: SkipReason },
}

impl SendOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

impl Serialize for SendOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            Self::Sent { message_id } => {
                map.serialize_entry("sent", &true)?;
                map.serialize_entry("messageId", message_id)?;
            }
            Self::Skipped { reason } => {
                map.serialize_entry("skipped", &true)?;
                map.serialize_entry("reason", reason.as_str())?;
            }
        }
        map.end()
    }
}

/// Outcome counts of a send to many parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Lookups the dispatcher needs, narrowed so it can be shared as a trait object.
#[async_trait]
pub trait EmailContextSource: Send + Sync {
    async fn parent(&self, id: Uuid) -> DbResult<Option<Parent>>;
    async fn player(&self, id: Uuid) -> DbResult<Option<Player>>;
    async fn team(&self, id: Uuid) -> DbResult<Option<Team>>;
    async fn template(&self, title: &str) -> DbResult<Option<EmailTemplate>>;
}

#[async_trait]
impl<S: Store> EmailContextSource for S {
    async fn parent(&self, id: Uuid) -> DbResult<Option<Parent>> {
        self.find_parent(id).await
    }

    async fn player(&self, id: Uuid) -> DbResult<Option<Player>> {
        self.find_player(id).await
    }

    async fn team(&self, id: Uuid) -> DbResult<Option<Team>> {
        self.find_team(id).await
    }

    async fn template(&self, title: &str) -> DbResult<Option<EmailTemplate>> {
        self.find_email_template(title).await
    }
}

pub struct EmailDispatcher {
    source: Arc<dyn EmailContextSource>,
    transport: Arc<dyn MailTransport>,
    from: String,
    frontend_url: String,
    attachment_root: PathBuf,
}

impl EmailDispatcher {
    pub fn new(
        source: Arc<dyn EmailContextSource>,
        transport: Arc<dyn MailTransport>,
        from: impl Into<String>,
        frontend_url: impl Into<String>,
        attachment_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            transport,
            from: from.into(),
            frontend_url: frontend_url.into(),
            attachment_root: attachment_root.into(),
        }
    }

    async fn resolve_context(&self, context: &EmailContext) -> MailResult<TemplateContext> {
        let parent = match context.parent_id {
            Some(id) => self.source.parent(id).await?,
            None => None,
        };
        let player = match context.player_id {
            Some(id) => self.source.player(id).await?,
            None => None,
        };
        let team = match context.team_id {
            Some(id) => self.source.team(id).await?,
            None => None,
        };
        Ok(TemplateContext {
            parent,
            player,
            team,
            tournament: context.tournament.clone(),
            payment: context.payment.clone(),
            verification_token: context.verification_token.clone(),
            frontend_url: self.frontend_url.clone(),
        })
    }

    /// Renders and sends one message, unless the context parent opted out of
    /// this email type.
    pub async fn send(&self, request: SendRequest) -> MailResult<SendOutcome> {
        let context = self.resolve_context(&request.context).await?;
        let preference = request.email_type.preference_key();

        if let Some(parent) = &context.parent {
            if !parent.communication_preferences.allows(preference) {
                info!(
                    parent_id = %parent.id,
                    preference = ?preference,
                    "Email skipped: recipient opted out"
                );
                return Ok(SendOutcome::Skipped {
                    reason: SkipReason::UserOptOut,
                });
            }
        }

        let to = if request.to.is_empty() {
            context.parent.as_ref().map(Parent::recipients).unwrap_or_default()
        } else {
            request.to
        };
        if to.is_empty() {
            return Err(MailError::NoRecipient);
        }

        let mut attachments = Vec::with_capacity(request.attachments.len());
        for attachment in request.attachments {
            attachments.push(attachment.resolve(&self.attachment_root).await?);
        }

        let email = OutgoingEmail {
            from: self.from.clone(),
            to,
            subject: template::render(&request.subject, &context),
            html: template::render(&request.html, &context),
            attachments,
        };
        let message_id = self.transport.deliver(&email).await?;
        info!(to = ?email.to, subject = %email.subject, message_id = %message_id, "Email sent");
        Ok(SendOutcome::Sent { message_id })
    }

    /// Sends the stored template titled `title`, or the built-in one of the
    /// same name, wrapped in the club envelope.
    pub async fn send_template(
        &self,
        title: &str,
        to: Vec<String>,
        context: EmailContext,
        email_type: EmailType,
        attachments: Vec<Attachment>,
    ) -> MailResult<SendOutcome> {
        let (subject, content) = match self.source.template(title).await? {
            Some(stored) => (stored.subject, stored.content),
            None => template::fallback(title)
                .map(|(s, c)| (s.to_string(), c.to_string()))
                .ok_or_else(|| MailError::TemplateNotFound(title.to_string()))?,
        };

        self.send(SendRequest {
            to,
            subject,
            html: template::envelope(&content, &self.frontend_url),
            context,
            email_type,
            attachments,
        })
        .await
    }

    /// Sends `title` to each parent, honouring each one's preferences.
    pub async fn send_to_parents(
        &self,
        parent_ids: &[Uuid],
        title: &str,
        email_type: EmailType,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for parent_id in parent_ids {
            let result = self
                .send_template(title, Vec::new(), EmailContext::for_parent(*parent_id), email_type, Vec::new())
                .await;
            match result {
                Ok(SendOutcome::Sent { .. }) => report.sent += 1,
                Ok(SendOutcome::Skipped { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(parent_id = %parent_id, error = %e, "Broadcast email failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            template = %title,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast finished"
        );
        report
    }

    /// Fire-and-forget [`send_template`](Self::send_template) to the context
    /// parent. Errors are logged and swallowed.
    pub fn spawn_template(
        self: &Arc<Self>,
        title: &'static str,
        context: EmailContext,
        email_type: EmailType,
    ) -> JoinHandle<Option<SendOutcome>> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let parent_id = context.parent_id;
            match dispatcher
                .send_template(title, Vec::new(), context, email_type, Vec::new())
                .await
            {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(parent_id = ?parent_id, template = %title, error = %e, "Failed to send email");
                    None
                }
            }
        })
    }
}
