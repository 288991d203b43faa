use std::fmt::Display;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Contract boundary with the card processor: we send an amount and a
/// currency, we get back an opaque client secret. Order creation happens
/// independently of and prior to payment confirmation; a failed payment is
/// compensated by an explicit order cancellation from the consumer side.
#[async_trait]
pub trait PaymentGateway {
    async fn create_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentIntentRequest {
    pub amount: f32,
    pub currency: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub client_secret: String,
}

impl std::error::Error for PaymentError {}

#[derive(Debug, PartialEq, Eq)]
pub enum PaymentError {
    Validation(String),
    Gateway,
}

impl Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "{}", msg),
            Self::Gateway => write!(f, "payment gateway unavailable"),
        }
    }
}

#[derive(Clone)]
pub struct HttpPaymentGateway {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(PaymentError::Validation(
                "amount must be a positive number".into(),
            ));
        }
        if request.currency.trim().is_empty() {
            return Err(PaymentError::Validation("currency must be set".into()));
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|_| PaymentError::Gateway)?;

        if !response.status().is_success() {
            return Err(PaymentError::Gateway);
        }

        response
            .json::<PaymentIntent>()
            .await
            .map_err(|_| PaymentError::Gateway)
    }
}
