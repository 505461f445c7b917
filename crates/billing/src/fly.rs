//! Fly.io API integration for SSL certificate teardown
//!
//! When a custom domain is removed during a downgrade, its certificate is
//! deleted from the Fly.io app so the hostname stops being served.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, info, warn};

/// Fly.io GraphQL API endpoint
const FLY_API_URL: &str = "https://api.fly.io/graphql";

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRIES: usize = 3;

/// Client for interacting with Fly.io API
#[derive(Clone)]
pub struct FlyClient {
    client: Client,
    api_token: String,
    app_name: String,
}

#[derive(Debug, Serialize)]
struct GraphQLRequest {
    query: &'static str,
    variables: CertificateVariables,
}

#[derive(Debug, Serialize)]
struct CertificateVariables {
    #[serde(rename = "appId")]
    app_id: String,
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

/// Why a teardown attempt failed
#[derive(Debug)]
enum TeardownError {
    /// Network errors and 5xx responses
    Transient(String),
    Permanent(String),
}

impl TeardownError {
    fn into_message(self) -> String {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl FlyClient {
    /// Create a new Fly.io client from config
    pub fn new(api_token: String, app_name: String) -> Self {
        Self {
            client: Client::new(),
            api_token,
            app_name,
        }
    }

    /// Create from environment config, returns None if not configured
    pub fn from_config(fly_api_token: Option<String>, fly_app_name: Option<String>) -> Option<Self> {
        match (fly_api_token, fly_app_name) {
            (Some(token), Some(app)) if !token.is_empty() && !app.is_empty() => {
                Some(Self::new(token, app))
            }
            _ => {
                warn!("Fly.io API not configured - custom domain certificates will not be removed");
                None
            }
        }
    }

    /// Delete the SSL certificate for a hostname
    ///
    /// Transient failures are retried with exponential backoff. A certificate
    /// that no longer exists counts as success.
    pub async fn delete_certificate(&self, hostname: &str) -> Result<(), String> {
        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        let result = Retry::start(retry_strategy, || async {
            match self.try_delete_certificate(hostname).await {
                Ok(()) => Ok(Ok(())),
                Err(TeardownError::Transient(msg)) => {
                    debug!(hostname = %hostname, error = %msg, "Transient Fly.io error - will retry");
                    Err(msg)
                }
                Err(e) => Ok(Err(e.into_message())),
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(last) => Err(last),
        }
    }

    async fn try_delete_certificate(&self, hostname: &str) -> Result<(), TeardownError> {
        const MUTATION: &str = r#"
            mutation($appId: ID!, $hostname: String!) {
                deleteCertificate(appId: $appId, hostname: $hostname) {
                    app { name }
                }
            }
        "#;

        let request = GraphQLRequest {
            query: MUTATION,
            variables: CertificateVariables {
                app_id: self.app_name.clone(),
                hostname: hostname.to_string(),
            },
        };

        let response = self
            .client
            .post(FLY_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| TeardownError::Transient(format!("Failed to call Fly.io API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("Fly.io API error: {} - {}", status, body);
            return Err(if status.is_server_error() {
                TeardownError::Transient(msg)
            } else {
                TeardownError::Permanent(msg)
            });
        }

        let result: GraphQLResponse = response.json().await.map_err(|e| {
            TeardownError::Permanent(format!("Failed to parse Fly.io response: {}", e))
        })?;

        if let Some(errors) = result.errors {
            let error_msg = errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");

            if is_already_gone(&error_msg) {
                info!(hostname = %hostname, "Certificate already absent in Fly.io");
                return Ok(());
            }
            return Err(TeardownError::Permanent(format!("Fly.io error: {}", error_msg)));
        }

        info!(hostname = %hostname, app = %self.app_name, "Removed certificate from Fly.io");
        Ok(())
    }
}

fn is_already_gone(error_msg: &str) -> bool {
    let lower = error_msg.to_lowercase();
    lower.contains("not found") || lower.contains("could not find")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_both_values() {
        assert!(FlyClient::from_config(Some("token".into()), None).is_none());
        assert!(FlyClient::from_config(Some(String::new()), Some("app".into())).is_none());
        assert!(FlyClient::from_config(Some("token".into()), Some("app".into())).is_some());
    }

    #[test]
    fn test_missing_certificate_is_not_an_error() {
        assert!(is_already_gone("Could not find Certificate with hostname shop.example.com"));
        assert!(!is_already_gone("unauthorized"));
    }
}
