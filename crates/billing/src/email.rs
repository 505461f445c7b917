//! Email notifications for add-on lifecycle events
//!
//! Sends transactional emails via Resend API: expiry warnings at the 7, 3
//! and 1 day milestones, and a confirmation once an expired add-on has been
//! reconciled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pagecraft_shared::types::{Addon, User};

use crate::error::BillingResult;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Dashboard URL
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Pagecraft <noreply@pagecraft.io>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Pagecraft".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@pagecraft.io".to_string()),
            dashboard_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "https://app.pagecraft.io".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Templates this engine sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    AddonExpiresIn7Days,
    AddonExpiresIn3Days,
    AddonExpiresIn1Day,
    AddonExpired,
}

impl EmailTemplate {
    pub fn id(&self) -> &'static str {
        match self {
            Self::AddonExpiresIn7Days => "addon_expiring_7_days",
            Self::AddonExpiresIn3Days => "addon_expiring_3_days",
            Self::AddonExpiresIn1Day => "addon_expiring_1_day",
            Self::AddonExpired => "addon_expired",
        }
    }
}

/// Values substituted into the add-on templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddonEmailData {
    pub recipient_name: Option<String>,
    pub addon_name: String,
    pub quantity: i32,
    /// Pre-formatted end date (e.g. "2026-10-25")
    pub end_date: Option<String>,
    pub days_remaining: Option<i64>,
    pub resources_affected: Option<u32>,
    /// Human-readable summary of what was downgraded
    pub changes: Option<String>,
}

impl AddonEmailData {
    /// Base template data for an add-on and its owner
    pub fn for_addon(addon: &Addon, user: &User) -> Self {
        Self {
            recipient_name: user.name.clone(),
            addon_name: addon.addon_type.display_name().to_string(),
            quantity: addon.quantity,
            end_date: addon.end_date.map(|end| end.date().to_string()),
            ..Default::default()
        }
    }
}

/// Outbound notification channel.
///
/// Returns `Ok(true)` when delivered, `Ok(false)` when delivery failed or is
/// disabled. Implementations log their own failures; callers never treat
/// `Ok(false)` as fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, template: EmailTemplate, data: &AddonEmailData) -> BillingResult<bool>;
}

/// Billing email notification service
#[derive(Clone)]
pub struct BillingEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl BillingEmailService {
    /// Create a new email service
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(true)` if the email was sent successfully,
    /// `Ok(false)` if sending failed (non-fatal - doesn't propagate error).
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Add-on email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send add-on email - non-fatal"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send add-on email - non-fatal"
                );
                Ok(false)
            }
        }
    }

    /// Render subject and HTML body for a template
    pub fn render(&self, template: EmailTemplate, data: &AddonEmailData) -> (String, String) {
        let greeting = data
            .recipient_name
            .as_deref()
            .map(|name| format!("Hi {},", name))
            .unwrap_or_else(|| "Hi there,".to_string());
        let end_date = data.end_date.as_deref().unwrap_or("soon");
        let billing_link = format!("{}/billing/addons", self.config.dashboard_url);

        let (subject, heading, color, body) = match template {
            EmailTemplate::AddonExpiresIn7Days
            | EmailTemplate::AddonExpiresIn3Days
            | EmailTemplate::AddonExpiresIn1Day => {
                let days = data.days_remaining.unwrap_or(match template {
                    EmailTemplate::AddonExpiresIn7Days => 7,
                    EmailTemplate::AddonExpiresIn3Days => 3,
                    _ => 1,
                });
                let when = match days {
                    0 => "today".to_string(),
                    1 => "tomorrow".to_string(),
                    n => format!("in {} days", n),
                };
                (
                    format!("Your {} add-on expires {}", data.addon_name, when),
                    "Add-on Expiring Soon",
                    "#d97706",
                    format!(
                        r#"<p>Your <strong>{addon}</strong> add-on (quantity {qty}) expires <strong>{when}</strong> on {end_date}.</p>
    <p>When it expires, anything above your plan's limits will be downgraded, starting with the most recently created items. Renew the add-on to keep everything as it is.</p>"#,
                        addon = data.addon_name,
                        qty = data.quantity,
                        when = when,
                        end_date = end_date,
                    ),
                )
            }
            EmailTemplate::AddonExpired => {
                let changes = data
                    .changes
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .unwrap_or("No changes were needed; you were already within your plan limits.");
                (
                    format!("Your {} add-on has expired", data.addon_name),
                    "Add-on Expired",
                    "#dc2626",
                    format!(
                        r#"<p>Your <strong>{addon}</strong> add-on expired on {end_date}.</p>
    <div style="background: #fef2f2; border: 1px solid #fecaca; border-radius: 8px; padding: 16px; margin: 20px 0;">
        <p style="margin: 0;"><strong>Items affected:</strong> {affected}</p>
        <p style="margin: 8px 0 0 0;">{changes}</p>
    </div>
    <p>Your oldest items were kept. Purchase the add-on again to restore capacity.</p>"#,
                        addon = data.addon_name,
                        end_date = end_date,
                        affected = data.resources_affected.unwrap_or(0),
                        changes = changes,
                    ),
                )
            }
        };

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: {color};">{heading}</h2>
    <p>{greeting}</p>
    {body}
    <p>
        <a href="{billing_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Manage Add-ons
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            color = color,
            heading = heading,
            greeting = greeting,
            body = body,
            billing_link = billing_link,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        (format!("{} - {}", subject, self.config.app_name), html)
    }
}

#[async_trait]
impl Notifier for BillingEmailService {
    async fn send(&self, to: &str, template: EmailTemplate, data: &AddonEmailData) -> BillingResult<bool> {
        let (subject, html) = self.render(template, data);
        self.send_email(to, &subject, &html).await
    }
}
