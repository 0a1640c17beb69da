use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types_jobs::{JobEvent, JobState};

const TIMEOUT: Duration = Duration::from_secs(5);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
struct ReleasePayload {
    user_id: i64,
    job_id: Uuid,
    state: JobState,
}

/// Tells an external intake tier that a requester's job is over.
#[derive(Clone)]
pub struct ReleaseNotifier {
    client: reqwest::Client,
    url: Option<String>,
    secret: String,
}

impl ReleaseNotifier {
    pub fn new(url: Option<String>, secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, url, secret }
    }

    pub fn disabled() -> Self {
        Self::new(None, String::new())
    }

    /// Fire and forget. Terminal events only.
    pub fn notify(&self, ev: &JobEvent) {
        let Some(url) = self.url.clone() else { return };
        if !ev.state.is_terminal() {
            return;
        }
        let payload = ReleasePayload { user_id: ev.requester_id, job_id: ev.job_id, state: ev.state };
        let body = match serde_json::to_string(&payload) {
            Ok(b) => b,
            Err(e) => {
                warn!("release: encode failed: {e}");
                return;
            }
        };
        let client = self.client.clone();
        let secret = self.secret.clone();
        let job_id = ev.job_id;
        tokio::spawn(async move {
            let ts = Utc::now().timestamp();
            let signature = sign_payload(&secret, ts, &body);
            let res = client
                .post(&url)
                .bearer_auth(&secret)
                .header("Content-Type", "application/json")
                .header("X-Timestamp", ts.to_string())
                .header("X-Signature", signature)
                .body(body)
                .send()
                .await;
            match res {
                Ok(r) if r.status().is_success() => debug!(job_id=%job_id, "release: delivered"),
                Ok(r) => warn!(job_id=%job_id, status=%r.status(), "release: rejected"),
                Err(e) => warn!(job_id=%job_id, "release: failed: {e}"),
            }
        });
    }
}

/// Hex HMAC-SHA256 over `"{ts}.{body}"`.
pub fn sign_payload(secret: &str, ts: i64, body: &str) -> String {
    let payload = format!("{}.{}", ts, body);
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_keyed() {
        let a = sign_payload("secret", 1700000000, "{}");
        assert_eq!(a.len(), 64);
        assert_eq!(a, sign_payload("secret", 1700000000, "{}"));
        assert_ne!(a, sign_payload("other", 1700000000, "{}"));
        assert_ne!(a, sign_payload("secret", 1700000001, "{}"));
    }
}
