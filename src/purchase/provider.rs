use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    config::PaymentConfig,
    error::{Error, Result},
};

/// What the provider needs to open a hosted checkout page.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub course_id: i64,
    pub course_title: String,
    pub thumbnail: Option<String>,
    /// Whole currency units
    pub amount: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;
}

/// Stripe Checkout over its form-encoded REST API.
pub struct StripeProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeError,
}

#[derive(Deserialize)]
struct StripeError {
    message: Option<String>,
}

impl StripeProvider {
    pub fn new(config: &PaymentConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn form(request: &CheckoutRequest) -> Result<Vec<(String, String)>> {
        let unit_amount = request
            .amount
            .checked_mul(100)
            .ok_or_else(|| Error::BadRequest("Course price is out of range".to_string()))?;
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.clone(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.course_title.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                unit_amount.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("metadata[courseId]".to_string(), request.course_id.to_string()),
            ("metadata[userId]".to_string(), request.user_id.to_string()),
        ];
        if let Some(thumbnail) = &request.thumbnail {
            form.push((
                "line_items[0][price_data][product_data][images][0]".to_string(),
                thumbnail.clone(),
            ));
        }
        Ok(form)
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        if self.secret_key.is_empty() {
            return Err(Error::PaymentProvider(
                "payment secret key is not configured".to_string(),
            ));
        }
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::form(request)?)
            .send()
            .await
            .map_err(|e| Error::PaymentProvider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| status.to_string());
            warn!("checkout session for course {} failed: {}", request.course_id, message);
            return Err(Error::PaymentProvider(message));
        }
        let session = response
            .json::<StripeSession>()
            .await
            .map_err(|e| Error::PaymentProvider(e.to_string()))?;
        let Some(url) = session.url else {
            return Err(Error::PaymentProvider(format!(
                "session {} has no redirect url",
                session.id
            )));
        };
        info!(
            "checkout session {} opened for user {} course {}",
            session.id, request.user_id, request.course_id
        );
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use axum::{Form, Json, Router, http::HeaderMap, routing::post};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    /// Hands out `cs_test_<n>` sessions and remembers every request.
    #[derive(Default)]
    pub struct MockProvider {
        counter: AtomicUsize,
        pub requests: Mutex<Vec<CheckoutRequest>>,
    }

    #[async_trait]
    impl PaymentProvider for MockProvider {
        async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().push(request.clone());
            Ok(CheckoutSession {
                id: format!("cs_test_{n}"),
                url: format!("https://checkout.example.com/pay/cs_test_{n}"),
            })
        }
    }

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            user_id: 3,
            course_id: 9,
            course_title: "Rust for Rustaceans".to_string(),
            thumbnail: None,
            amount: 25,
            currency: "usd".to_string(),
            success_url: "http://localhost:5173/courses-progress/9".to_string(),
            cancel_url: "http://localhost:5173/courses-detail/9".to_string(),
        }
    }

    async fn spawn_stripe(seen: Arc<Mutex<Vec<(HeaderMap, HashMap<String, String>)>>>) -> String {
        let app = Router::new().route(
            "/v1/checkout/sessions",
            post(move |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| {
                let seen = seen.clone();
                async move {
                    seen.lock().push((headers, form));
                    Json(json!({ "id": "cs_live_1", "url": "https://checkout.stripe.com/c/cs_live_1" }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stripe_provider_posts_form_with_amount_in_cents() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let api_base = spawn_stripe(seen.clone()).await;
        let provider = StripeProvider::new(&PaymentConfig {
            api_base,
            secret_key: "sk_test_123".to_string(),
            ..PaymentConfig::default()
        })
        .unwrap();
        let session = provider.create_checkout_session(&request()).await.unwrap();
        assert_eq!(session.id, "cs_live_1");
        assert_eq!(session.url, "https://checkout.stripe.com/c/cs_live_1");

        let seen = seen.lock();
        let (headers, form) = &seen[0];
        assert_eq!(headers["authorization"], "Bearer sk_test_123");
        assert_eq!(form["line_items[0][price_data][unit_amount]"], "2500");
        assert_eq!(form["metadata[courseId]"], "9");
        assert_eq!(form["mode"], "payment");
    }

    #[tokio::test]
    async fn oversized_amount_is_rejected_before_posting() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let api_base = spawn_stripe(seen.clone()).await;
        let provider = StripeProvider::new(&PaymentConfig {
            api_base,
            secret_key: "sk_test_123".to_string(),
            ..PaymentConfig::default()
        })
        .unwrap();
        let request = CheckoutRequest {
            amount: i64::MAX / 10,
            ..request()
        };
        let err = provider.create_checkout_session(&request).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn stripe_provider_needs_a_secret_key() {
        let provider = StripeProvider::new(&PaymentConfig::default()).unwrap();
        let err = provider.create_checkout_session(&request()).await.unwrap_err();
        assert!(matches!(err, Error::PaymentProvider(_)));
    }
}
