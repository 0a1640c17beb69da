use async_trait::async_trait;
use mediacache::MediaKind;
use reqwest::multipart::{Form, Part};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::delivery::{ChatClient, OutgoingFile};
use crate::error::DeliveryError;

#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    message_id: i64,
}

/// Bot API client. The connection is verified on first use and shared for
/// the process lifetime.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    me: OnceCell<BotIdentity>,
}

impl TelegramClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            me: OnceCell::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// `getMe` once, lazily.
    pub async fn connect(&self) -> Result<&BotIdentity, DeliveryError> {
        self.me
            .get_or_try_init(|| async {
                let me: BotIdentity = self.call_raw("getMe", json!({})).await?;
                info!(bot_id = me.id, username = ?me.username, "telegram: connected");
                Ok::<_, DeliveryError>(me)
            })
            .await
    }

    async fn call_raw<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T, DeliveryError> {
        let resp = self.http.post(self.method_url(method)).json(&body).send().await?;
        unwrap_api(resp.json::<ApiResponse<T>>().await?, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T, DeliveryError> {
        self.connect().await?;
        self.call_raw(method, body).await
    }
}

fn unwrap_api<T>(resp: ApiResponse<T>, method: &str) -> Result<T, DeliveryError> {
    match (resp.ok, resp.result) {
        (true, Some(r)) => Ok(r),
        _ => Err(DeliveryError::Api(format!(
            "{method}: {}",
            resp.description.unwrap_or_else(|| "unknown error".to_string())
        ))),
    }
}

fn upload_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Audio => ("sendAudio", "audio"),
        MediaKind::Document => ("sendDocument", "document"),
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<i64, DeliveryError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(r) = reply_to {
            body["reply_to_message_id"] = json!(r);
            body["allow_sending_without_reply"] = json!(true);
        }
        let m: MessageRef = self.call("sendMessage", body).await?;
        Ok(m.message_id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), DeliveryError> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id, "text": text });
        // Returns the edited message, or `true` for inline messages.
        let _: serde_json::Value = self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn send_file(&self, chat_id: i64, file: &OutgoingFile, reply_to: Option<i64>) -> Result<i64, DeliveryError> {
        self.connect().await?;
        let (method, field) = upload_method(file.kind);

        let handle = tokio::fs::File::open(&file.path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));
        let part = Part::stream_with_length(body, file.size_bytes).file_name(file.filename.clone());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", file.caption.clone())
            .part(field, part);
        if let Some(meta) = file.video {
            form = form
                .text("width", meta.width.to_string())
                .text("height", meta.height.to_string())
                .text("duration", meta.duration_secs.to_string())
                .text("supports_streaming", "true");
        }
        if let Some(r) = reply_to {
            form = form
                .text("reply_to_message_id", r.to_string())
                .text("allow_sending_without_reply", "true");
        }

        let resp = self.http.post(self.method_url(method)).multipart(form).send().await?;
        let m: MessageRef = unwrap_api(resp.json::<ApiResponse<MessageRef>>().await?, method)?;
        Ok(m.message_id)
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        reply_to: Option<i64>,
    ) -> Result<i64, DeliveryError> {
        let mut body = json!({
            "chat_id": chat_id,
            "from_chat_id": from_chat_id,
            "message_id": message_id,
        });
        if let Some(r) = reply_to {
            body["reply_to_message_id"] = json!(r);
            body["allow_sending_without_reply"] = json!(true);
        }
        let m: MessageRef = self.call("copyMessage", body).await?;
        Ok(m.message_id)
    }
}
