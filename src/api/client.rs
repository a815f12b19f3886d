use super::token::OAuth2Token;
use super::types::{
    AttachmentData, MessageDetail, MessageList, MessageQuery, OutgoingMessage, SendReceipt,
    StatusUpdate, TokenResponse,
};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::model::{Folder, Message, MessageStatus};
use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use tokio::sync::Mutex;

/// Operations the gateway needs from the delivery service.
///
/// Sessions only ever see this trait, so tests can substitute a mock and
/// several gateways can run side by side with their own clients.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryApi: Send + Sync {
    /// List a folder, in the order the upstream returns it (most recent first)
    async fn get_messages(&self, folder: Folder, query: MessageQuery)
        -> Result<Vec<Message>, ApiError>;

    async fn get_message(&self, id: &str) -> Result<Message, ApiError>;

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentData, ApiError>;

    async fn send_message(&self, message: OutgoingMessage) -> Result<SendReceipt, ApiError>;

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<(), ApiError>;
}

/// reqwest-backed client for the e-Doręczenia REST API
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    token: Mutex<Option<OAuth2Token>>,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    /// Return a usable access token, fetching a new one when absent or expired.
    ///
    /// The lock is held across the refresh so concurrent callers wait for one
    /// token request instead of issuing their own.
    pub async fn ensure_token(&self) -> Result<String, ApiError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
            debug!("Access token expired, refreshing");
        }

        let token = self.fetch_token().await?;
        let access = token.access_token.clone();
        *guard = Some(token);
        Ok(access)
    }

    async fn fetch_token(&self) -> Result<OAuth2Token, ApiError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ApiError::Token(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Token(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let raw: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Token(e.to_string()))?;

        info!("Obtained access token (expires in {}s)", raw.expires_in);
        Ok(OAuth2Token::from_response(raw))
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.base_url.trim_end_matches('/'),
            self.config.address
        )
    }

    fn message_url(&self, id: &str) -> String {
        format!("{}/{}", self.messages_url(), id)
    }

    /// Attach the bearer token and send
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let token = self.ensure_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(e, self.config.timeout_secs))?;
        self.check_status(response).await
    }

    async fn check_status(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Delivery API returned HTTP {}", status.as_u16());
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T, ApiError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(e, self.config.timeout_secs))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl DeliveryApi for ApiClient {
    async fn get_messages(
        &self,
        folder: Folder,
        query: MessageQuery,
    ) -> Result<Vec<Message>, ApiError> {
        let mut params = vec![
            ("folder", folder.api_name().to_string()),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(since) = query.since {
            params.push(("since", since.to_rfc3339()));
        }

        let response = self
            .send(self.http.get(self.messages_url()).query(&params))
            .await?;
        let list: MessageList = self.json(response).await?;

        debug!("Listed {} messages in {}", list.messages.len(), folder);
        Ok(list
            .messages
            .into_iter()
            .map(|m| m.into_message(folder))
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<Message, ApiError> {
        let response = self.send(self.http.get(self.message_url(id))).await?;
        let detail: MessageDetail = self.json(response).await?;
        detail
            .into_single()
            .map(|m| {
                let folder = m.folder().unwrap_or(Folder::Inbox);
                m.into_message(folder)
            })
            .ok_or_else(|| ApiError::Malformed(format!("empty response for message {}", id)))
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentData, ApiError> {
        let url = format!("{}/attachments/{}", self.message_url(message_id), attachment_id);
        let response = self.send(self.http.get(url)).await?;

        let headers = response.headers();
        let filename = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let content = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(e, self.config.timeout_secs))?
            .to_vec();

        Ok(AttachmentData {
            content,
            filename,
            content_type,
        })
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<SendReceipt, ApiError> {
        let response = self
            .send(self.http.post(self.messages_url()).json(&message))
            .await?;
        let receipt: SendReceipt = self.json(response).await?;
        info!(
            "Sent message {} to {} recipient(s)",
            receipt.message_id,
            message.recipients.len()
        );
        Ok(receipt)
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<(), ApiError> {
        let url = format!("{}/status", self.message_url(id));
        let body = StatusUpdate {
            status: status.as_str(),
        };
        self.send(self.http.put(url).json(&body)).await?;
        debug!("Message {} status set to {}", id, status);
        Ok(())
    }
}

fn disposition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("static pattern is valid")
    })
}

/// Extract the filename from a Content-Disposition header value
fn filename_from_disposition(value: &str) -> Option<String> {
    disposition_pattern()
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Recipient;
    use mockito::{Matcher, Server, ServerGuard};

    fn config_for(server: &ServerGuard) -> ApiConfig {
        ApiConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            token_url: format!("{}/oauth/token", server.url()),
            base_url: format!("{}/api", server.url()),
            address: "AE:PL-12345-67890-ABCDE-12".to_string(),
            ..ApiConfig::default()
        }
    }

    const LIST_PATH: &str = "/api/AE:PL-12345-67890-ABCDE-12/messages";

    fn token_body(expires_in: i64) -> String {
        serde_json::json!({
            "access_token": "tok-1",
            "token_type": "Bearer",
            "expires_in": expires_in
        })
        .to_string()
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"raport.pdf\"").as_deref(),
            Some("raport.pdf")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=plik.txt").as_deref(),
            Some("plik.txt")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[tokio::test]
    async fn test_token_fetched_once_within_validity() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "client".into()),
            ]))
            .with_body(token_body(3600))
            .expect(1)
            .create_async()
            .await;
        let list = server
            .mock("GET", LIST_PATH)
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer tok-1")
            .with_body(r#"{"messages": [], "total": 0}"#)
            .expect(2)
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        client
            .get_messages(Folder::Inbox, MessageQuery::default())
            .await
            .unwrap();
        client
            .get_messages(Folder::Inbox, MessageQuery::default())
            .await
            .unwrap();

        token.assert_async().await;
        list.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_before_call() {
        let mut server = Server::new_async().await;
        // Anything under the safety margin is expired as soon as it arrives
        let token = server
            .mock("POST", "/oauth/token")
            .with_body(token_body(30))
            .expect(2)
            .create_async()
            .await;
        server
            .mock("GET", LIST_PATH)
            .match_query(Matcher::Any)
            .with_body(r#"{"messages": []}"#)
            .expect(2)
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        for _ in 0..2 {
            client
                .get_messages(Folder::Sent, MessageQuery::default())
                .await
                .unwrap();
        }

        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_query_and_order() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body(token_body(3600))
            .create_async()
            .await;
        server
            .mock("GET", LIST_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("folder".into(), "archive".into()),
                Matcher::UrlEncoded("limit".into(), "10".into()),
                Matcher::UrlEncoded("offset".into(), "5".into()),
            ]))
            .with_body(
                r#"{"messages": [
                    {"messageId": "b", "subject": "Second", "status": "READ"},
                    {"messageId": "a", "subject": "First"}
                ], "total": 2, "offset": 5, "limit": 10}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        let query = MessageQuery {
            limit: 10,
            offset: 5,
            since: None,
        };
        let messages = client.get_messages(Folder::Archive, query).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "b");
        assert!(messages[0].flags.seen);
        assert_eq!(messages[1].subject, "First");
        assert_eq!(messages[1].folder, Folder::Archive);
    }

    #[tokio::test]
    async fn test_get_message_array_response() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body(token_body(3600))
            .create_async()
            .await;
        server
            .mock("GET", format!("{}/m-1", LIST_PATH).as_str())
            .with_body(r#"[{"messageId": "m-1", "subject": "Hello"}]"#)
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        let message = client.get_message("m-1").await.unwrap();
        assert_eq!(message.subject, "Hello");
        assert_eq!(message.folder, Folder::Inbox);
    }

    #[tokio::test]
    async fn test_get_message_keeps_upstream_folder() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body(token_body(3600))
            .create_async()
            .await;
        server
            .mock("GET", format!("{}/s-1", LIST_PATH).as_str())
            .with_body(r#"{"messageId": "s-1", "subject": "Odpowiedz", "folder": "sent"}"#)
            .create_async()
            .await;
        server
            .mock("GET", format!("{}/x-1", LIST_PATH).as_str())
            .with_body(r#"{"messageId": "x-1", "folder": "spam"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        assert_eq!(client.get_message("s-1").await.unwrap().folder, Folder::Sent);
        // Unmapped folder names fall back to the inbox
        assert_eq!(client.get_message("x-1").await.unwrap().folder, Folder::Inbox);
    }

    #[tokio::test]
    async fn test_attachment_headers() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body(token_body(3600))
            .create_async()
            .await;
        server
            .mock("GET", format!("{}/m-1/attachments/att-1", LIST_PATH).as_str())
            .with_header("content-type", "application/pdf")
            .with_header("content-disposition", "attachment; filename=\"umowa.pdf\"")
            .with_body("%PDF-1.4")
            .create_async()
            .await;
        server
            .mock("GET", format!("{}/m-1/attachments/att-2", LIST_PATH).as_str())
            .with_body("raw")
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        let data = client.get_attachment("m-1", "att-1").await.unwrap();
        assert_eq!(data.filename, "umowa.pdf");
        assert_eq!(data.content_type, "application/pdf");
        assert_eq!(data.content, b"%PDF-1.4");

        let bare = client.get_attachment("m-1", "att-2").await.unwrap();
        assert_eq!(bare.filename, "attachment");
    }

    #[tokio::test]
    async fn test_send_and_update_status() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body(token_body(3600))
            .create_async()
            .await;
        let send = server
            .mock("POST", LIST_PATH)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "subject": "Wniosek",
                "recipients": [{"address": "AE:PL-11111-22222-33333-44"}]
            })))
            .with_status(201)
            .with_body(r#"{"messageId": "new-1", "status": "SENT"}"#)
            .create_async()
            .await;
        let status = server
            .mock("PUT", format!("{}/m-9/status", LIST_PATH).as_str())
            .match_body(Matcher::Json(serde_json::json!({"status": "READ"})))
            .with_body("{}")
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        let receipt = client
            .send_message(OutgoingMessage {
                recipients: vec![Recipient {
                    address: "AE:PL-11111-22222-33333-44".to_string(),
                    name: None,
                }],
                subject: "Wniosek".to_string(),
                content: "Treść".to_string(),
                content_html: None,
                attachments: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(receipt.message_id, "new-1");

        client.update_status("m-9", MessageStatus::Read).await.unwrap();
        send.assert_async().await;
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body(token_body(3600))
            .create_async()
            .await;
        server
            .mock("GET", format!("{}/missing", LIST_PATH).as_str())
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;
        server
            .mock("GET", format!("{}/garbled", LIST_PATH).as_str())
            .with_body("<html>")
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        match client.get_message("missing").await {
            Err(ApiError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other.map(|m| m.id)),
        }
        assert!(matches!(
            client.get_message("garbled").await,
            Err(ApiError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_token_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body("invalid_client")
            .create_async()
            .await;

        let client = ApiClient::new(config_for(&server)).unwrap();
        assert!(matches!(client.ensure_token().await, Err(ApiError::Token(_))));
    }
}
