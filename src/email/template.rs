//! Placeholder substitution and the built-in receipt templates.
//!
//! Placeholders look like `[entity.field]`. Unknown ones are left as written.

use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

use crate::models::{Parent, Player, Team};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\[([A-Za-z]+)\.([A-Za-z0-9_]+)\]").expect("placeholder pattern is valid")
    })
}

/// Payment facts made available to receipts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub amount: Decimal,
    pub currency: String,
    pub receipt_url: Option<String>,
}

/// Everything a template can reference.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub parent: Option<Parent>,
    pub player: Option<Player>,
    pub team: Option<Team>,
    pub tournament: Option<Value>,
    pub payment: Option<PaymentSummary>,
    pub verification_token: Option<String>,
    pub frontend_url: String,
}

impl TemplateContext {
    fn lookup(&self, entity: &str, field: &str) -> Option<String> {
        match entity {
            "parent" => {
                let parent = self.parent.as_ref()?;
                match field {
                    "fullName" => Some(parent.full_name.clone()),
                    "firstName" => Some(parent.first_name().to_string()),
                    "email" => Some(parent.email.clone()),
                    "phone" => parent.phone.clone(),
                    _ => None,
                }
            }
            "player" => {
                let player = self.player.as_ref()?;
                match field {
                    "fullName" => Some(player.full_name.clone()),
                    "grade" => player.grade.clone(),
                    "schoolName" => player.school_name.clone(),
                    "season" => player.season.clone(),
                    _ => None,
                }
            }
            "team" => {
                let team = self.team.as_ref()?;
                match field {
                    "name" => Some(team.name.clone()),
                    "grade" => Some(team.grade.clone()),
                    "sex" => Some(team.sex.clone()),
                    "level" => Some(team.level.to_string()),
                    _ => None,
                }
            }
            "tournament" => match self.tournament.as_ref()?.get(field)? {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            },
            "payment" => {
                let payment = self.payment.as_ref()?;
                match field {
                    "amount" => Some(format!("{:.2}", payment.amount)),
                    "currency" => Some(payment.currency.clone()),
                    "receiptUrl" => payment.receipt_url.clone(),
                    _ => None,
                }
            }
            "verification" if field == "token" => self.verification_token.clone(),
            "frontend" if field == "url" => Some(self.frontend_url.clone()),
            _ => None,
        }
    }
}

/// Replaces every known placeholder in `text`.
pub fn render(text: &str, context: &TemplateContext) -> String {
    placeholder()
        .replace_all(text, |caps: &Captures| {
            context
                .lookup(&caps[1], &caps[2])
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Wraps a rendered body in the club's header, footer and signature.
pub fn envelope(body: &str, frontend_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="margin:0;padding:0;background:#f4f4f4;font-family:Arial,Helvetica,sans-serif;">
<table width="100%" cellpadding="0" cellspacing="0"><tr><td align="center">
<table width="600" cellpadding="0" cellspacing="0" style="background:#ffffff;">
<tr><td style="background:#0b3d91;color:#ffffff;padding:20px;font-size:22px;font-weight:bold;">Courtside Basketball</td></tr>
<tr><td style="padding:24px;color:#222222;font-size:15px;line-height:1.5;">{body}
<p style="margin-top:32px;">See you on the court,<br>Courtside Basketball Staff</p></td></tr>
<tr><td style="background:#eeeeee;padding:16px;font-size:12px;color:#666666;">
<a href="{frontend_url}">{frontend_url}</a><br>
Manage your email preferences from your account page.</td></tr>
</table></td></tr></table>
</body>
</html>"#
    )
}

/// Built-in `(subject, body)` used when no stored template has this title.
pub fn fallback(title: &str) -> Option<(&'static str, &'static str)> {
    let template = match title.trim().to_ascii_lowercase().as_str() {
        "tryout receipt" => (
            "Tryout payment received",
            "<p>Hi [parent.firstName],</p>\
             <p>We received your tryout payment of $[payment.amount] [payment.currency]. \
             Your player's spot is confirmed.</p>\
             <p><a href=\"[payment.receiptUrl]\">View your receipt</a></p>",
        ),
        "training receipt" => (
            "Training payment received",
            "<p>Hi [parent.firstName],</p>\
             <p>Thanks for your training payment of $[payment.amount] [payment.currency].</p>\
             <p><a href=\"[payment.receiptUrl]\">View your receipt</a></p>",
        ),
        "tournament receipt" => (
            "Tournament registration confirmed: [tournament.name] [tournament.year]",
            "<p>Hi [parent.firstName],</p>\
             <p>Your tournament registration for [tournament.name] [tournament.year] \
             is paid ([tournament.teamCount] team(s), $[payment.amount] [payment.currency]).</p>\
             <p><a href=\"[payment.receiptUrl]\">View your receipt</a></p>",
        ),
        "generic receipt" => (
            "Payment received",
            "<p>Hi [parent.firstName],</p>\
             <p>We received your payment of $[payment.amount] [payment.currency].</p>\
             <p><a href=\"[payment.receiptUrl]\">View your receipt</a></p>",
        ),
        "email verification" => (
            "Verify your email address",
            "<p>Hi [parent.firstName],</p>\
             <p>Please confirm your email address to finish setting up your account.</p>\
             <p><a href=\"[frontend.url]/verify-email?token=[verification.token]\">Verify email</a></p>",
        ),
        _ => return None,
    };
    Some(template)
}
