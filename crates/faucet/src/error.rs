//! Error types for the faucet service

use crate::limiter::CooldownScope;
use crate::notifier::NotifyError;
use crate::store::StoreError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Message returned for every failure whose detail must stay server-side.
pub const GENERIC_FAILURE_MESSAGE: &str = "Internal server error. Please try again later.";

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Address is required")]
    MissingAddress,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Cooldown active for {scope}: retry in {retry_after_secs} seconds")]
    CooldownActive {
        scope: CooldownScope,
        retry_after_secs: u64,
    },

    #[error("Global claim quota exhausted")]
    Busy,

    #[error("Custodial wallet cannot pay for gas")]
    OutOfGasFunds,

    #[error("Custodial wallet is out of {0} tokens")]
    OutOfTokens(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("Notifications are not configured")]
    NotifierDisabled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    /// Status code and stable machine-readable code for this error.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            FaucetError::MissingAddress => (StatusCode::BAD_REQUEST, "ADDRESS_REQUIRED"),
            FaucetError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            FaucetError::CooldownActive { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
            FaucetError::Busy => (StatusCode::TOO_MANY_REQUESTS, "FAUCET_BUSY"),
            FaucetError::OutOfGasFunds => (StatusCode::INTERNAL_SERVER_ERROR, "OUT_OF_GAS_FUNDS"),
            FaucetError::OutOfTokens(_) => (StatusCode::INTERNAL_SERVER_ERROR, "OUT_OF_TOKENS"),
            FaucetError::TransactionFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "TRANSACTION_FAILED")
            }
            FaucetError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            FaucetError::Rpc(_) => (StatusCode::BAD_GATEWAY, "RPC_ERROR"),
            FaucetError::Notify(_) => (StatusCode::INTERNAL_SERVER_ERROR, "NOTIFICATION_FAILED"),
            FaucetError::NotifierDisabled => (StatusCode::BAD_REQUEST, "NOTIFIER_DISABLED"),
            FaucetError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            FaucetError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Message shown to the caller.
    pub fn public_message(&self) -> String {
        match self {
            FaucetError::MissingAddress => "Address is required".to_string(),
            FaucetError::InvalidAddress(_) => "Invalid address".to_string(),
            FaucetError::CooldownActive { scope, .. } => scope.denial_message().to_string(),
            FaucetError::Busy => {
                "Faucet is busy. Please try again in a minute.".to_string()
            }
            FaucetError::OutOfGasFunds => {
                "Faucet is out of gas funds. Please try again later.".to_string()
            }
            FaucetError::OutOfTokens(symbol) => {
                format!("Faucet is out of {} tokens. Please try again later.", symbol)
            }
            // Client errors can embed the RPC URL and any key in its path.
            FaucetError::Rpc(_) => "Blockchain RPC unavailable. Please try again later.".to_string(),
            FaucetError::Notify(err) => err.to_string(),
            FaucetError::NotifierDisabled => {
                "Missing TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID environment variables.".to_string()
            }
            FaucetError::TransactionFailed(_)
            | FaucetError::Store(_)
            | FaucetError::Config(_)
            | FaucetError::Internal(_) => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.classify();
        let message = self.public_message();
        let timestamp = chrono::Utc::now().to_rfc3339();

        let retry_after = match &self {
            FaucetError::CooldownActive {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            FaucetError::Busy => Some(60),
            _ => None,
        };

        let body = match retry_after {
            Some(secs) => json!({
                "error": error_code,
                "message": message,
                "retryAfterSeconds": secs,
                "timestamp": timestamp,
            }),
            None => json!({
                "error": error_code,
                "message": message,
                "timestamp": timestamp,
            }),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
