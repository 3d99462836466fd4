//! Remote backend client.
//!
//! The backend is a functions-as-a-service HTTP API: every call is a POST of
//! `{path, args, format}` to `/api/mutation` or `/api/query`, answered with a
//! `{status: "success", value}` or `{status: "error", errorMessage}` envelope.
//! The sync worker only sees the [`SyncBackend`] trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AdImpressionRecord, GameResultRecord, KioskConfig};

const GAME_RESULTS_SYNC: &str = "gameResults:sync";
const AD_IMPRESSIONS_SYNC: &str = "adImpressions:sync";
const GET_KIOSK_CONFIG: &str = "functions:getKioskConfig";

/// Errors from a single backend call. All of them are transient from the
/// kiosk's point of view.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No connection could be made at all
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend function failed: {0}")]
    Function(String),

    #[error("batch rejected by backend")]
    Rejected,

    #[error("undecodable backend response: {0}")]
    Decode(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    fn from_send(e: reqwest::Error) -> Self {
        if e.is_connect() {
            BackendError::Unreachable(e.to_string())
        } else {
            BackendError::Transport(e)
        }
    }

    /// The request never reached the backend, so the batch was not attempted.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BackendError::Unreachable(_))
    }
}

/// Acknowledgement of a sync batch. Only `success: true` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAck {
    pub success: bool,
}

/// The remote peer the sync worker reconciles with.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn sync_game_results(&self, results: &[GameResultRecord]) -> Result<SyncAck, BackendError>;

    async fn sync_ad_impressions(
        &self,
        impressions: &[AdImpressionRecord],
    ) -> Result<SyncAck, BackendError>;

    /// Remote config for this kiosk; `None` if the backend does not know it.
    async fn fetch_kiosk_config(&self, kiosk_id: &str) -> Result<Option<KioskConfig>, BackendError>;
}

// === Wire Types ===

#[derive(Serialize)]
struct FunctionCall<'a, A> {
    path: &'a str,
    args: A,
    format: &'static str,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum FunctionResponse<T> {
    Success {
        value: T,
    },
    Error {
        #[serde(rename = "errorMessage", default)]
        error_message: String,
    },
}

#[derive(Serialize)]
struct ResultsBatch<'a> {
    results: &'a [GameResultRecord],
}

#[derive(Serialize)]
struct ImpressionsBatch<'a> {
    impressions: &'a [AdImpressionRecord],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KioskConfigArgs<'a> {
    kiosk_id: &'a str,
}

/// Turn an HTTP status and body into the function's value.
fn decode_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, BackendError> {
    if !(200..300).contains(&status) {
        return Err(BackendError::Status {
            status,
            body: body.chars().take(200).collect(),
        });
    }

    match serde_json::from_str::<FunctionResponse<T>>(body) {
        Ok(FunctionResponse::Success { value }) => Ok(value),
        Ok(FunctionResponse::Error { error_message }) => Err(BackendError::Function(error_message)),
        Err(e) => Err(BackendError::Decode(e.to_string())),
    }
}

// === HTTP Client ===

/// reqwest-backed client for the functions API.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call<A, T>(&self, kind: &str, path: &str, args: A) -> Result<T, BackendError>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}/api/{}", self.base_url, kind);
        let resp = self
            .http
            .post(&url)
            .json(&FunctionCall {
                path,
                args,
                format: "json",
            })
            .send()
            .await
            .map_err(BackendError::from_send)?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!("[BACKEND] {} {} -> HTTP {}", kind, path, status);
        decode_response(status, &body)
    }
}

#[async_trait]
impl SyncBackend for HttpBackend {
    async fn sync_game_results(&self, results: &[GameResultRecord]) -> Result<SyncAck, BackendError> {
        self.call("mutation", GAME_RESULTS_SYNC, ResultsBatch { results })
            .await
    }

    async fn sync_ad_impressions(
        &self,
        impressions: &[AdImpressionRecord],
    ) -> Result<SyncAck, BackendError> {
        self.call("mutation", AD_IMPRESSIONS_SYNC, ImpressionsBatch { impressions })
            .await
    }

    async fn fetch_kiosk_config(&self, kiosk_id: &str) -> Result<Option<KioskConfig>, BackendError> {
        self.call("query", GET_KIOSK_CONFIG, KioskConfigArgs { kiosk_id })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoinValue, Outcome, SyncStatus};

    #[test]
    fn test_decode_success_ack() {
        let ack: SyncAck =
            decode_response(200, r#"{"status":"success","value":{"success":true}}"#).unwrap();
        assert!(ack.success);
    }

    #[test]
    fn test_decode_function_error() {
        let err = decode_response::<SyncAck>(
            200,
            r#"{"status":"error","errorMessage":"Kiosk not found"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::Function(msg) if msg == "Kiosk not found"));
    }

    #[test]
    fn test_decode_http_error() {
        let err = decode_response::<SyncAck>(503, "upstream unavailable").unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 503, .. }));
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_response::<SyncAck>(200, "<html>").unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[test]
    fn test_decode_missing_config_is_none() {
        let config: Option<KioskConfig> =
            decode_response(200, r#"{"status":"success","value":null}"#).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_results_batch_payload_shape() {
        let records = vec![GameResultRecord {
            id: "r1".into(),
            kiosk_id: "KIOSK-001".into(),
            timestamp: 1,
            coin_value: CoinValue::Five,
            quiz_passed: true,
            outcome: Outcome::Win,
            prize_value: Some(10),
            sync_status: SyncStatus::Pending,
            retry_count: 0,
        }];

        let call = FunctionCall {
            path: GAME_RESULTS_SYNC,
            args: ResultsBatch { results: &records },
            format: "json",
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["path"], "gameResults:sync");
        assert_eq!(json["args"]["results"][0]["prizeValue"], 10);
        assert_eq!(json["args"]["results"][0]["coinValue"], 5);
    }
}
