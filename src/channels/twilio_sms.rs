use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::collections::HashMap;

use crate::conversations::types::MessageStatus;
use crate::core::config::TwilioConfig;

/// Result of handing a message to the SMS provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentSms {
    pub sid: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwilioPhoneNumber {
    pub sid: String,
    pub phone_number: String,
    pub friendly_name: String,
    pub capabilities: PhoneCapabilities,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhoneCapabilities {
    pub sms: bool,
    pub mms: bool,
    pub voice: bool,
}

/// Inbound SMS as posted to the webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingWebhook {
    pub message_sid: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub media_urls: Vec<String>,
}

/// Delivery report for a message we sent.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCallback {
    pub message_sid: String,
    pub message_status: MessageStatus,
    pub from: Option<String>,
    pub to: Option<String>,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
}

impl StatusCallback {
    /// Error text stored on a failed message.
    pub fn error_text(&self) -> Option<String> {
        match (&self.error_message, self.error_code) {
            (Some(message), Some(code)) => Some(format!("{code}: {message}")),
            (Some(message), None) => Some(message.clone()),
            (None, Some(code)) => Some(format!("Twilio error {code}")),
            (None, None) => None,
        }
    }
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_sms(&self, from: &str, to: &str, body: &str) -> Result<SentSms, TwilioError>;

    async fn get_phone_numbers(&self) -> Result<Vec<TwilioPhoneNumber>, TwilioError>;
}

pub struct TwilioSmsChannel {
    account_sid: String,
    auth_token: String,
    status_callback_url: Option<String>,
    http_client: Client,
    base_url: String,
}

impl TwilioSmsChannel {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            status_callback_url: config.status_callback_url.clone(),
            http_client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn api_error(response: reqwest::Response, fallback: &str) -> TwilioError {
        let status = response.status().as_u16();
        let error = response
            .json::<TwilioApiError>()
            .await
            .unwrap_or_else(|_| TwilioApiError {
                code: 0,
                message: fallback.to_string(),
                more_info: None,
                status: i32::from(status),
            });
        TwilioError::ApiError(error)
    }
}

#[async_trait]
impl SmsTransport for TwilioSmsChannel {
    async fn send_sms(&self, from: &str, to: &str, body: &str) -> Result<SentSms, TwilioError> {
        let url = format!("{}/Accounts/{}/Messages.json", self.base_url, self.account_sid);

        let mut params: Vec<(&str, &str)> = vec![("From", from), ("To", to), ("Body", body)];
        if let Some(callback) = self.status_callback_url.as_deref() {
            params.push(("StatusCallback", callback));
        }

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| TwilioError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "Unknown error").await);
        }

        let message: TwilioMessageResponse = response
            .json()
            .await
            .map_err(|e| TwilioError::ParseError(e.to_string()))?;

        debug!("Twilio accepted {} from {} with status {}", message.sid, from, message.status);

        let status = MessageStatus::parse(&message.status);
        if status.is_failure() {
            return Err(TwilioError::ApiError(TwilioApiError {
                code: message.error_code.unwrap_or(0),
                message: message
                    .error_message
                    .unwrap_or_else(|| format!("message {}", message.status)),
                more_info: None,
                status: 200,
            }));
        }

        Ok(SentSms {
            sid: message.sid,
            status,
        })
    }

    async fn get_phone_numbers(&self) -> Result<Vec<TwilioPhoneNumber>, TwilioError> {
        let url = format!(
            "{}/Accounts/{}/IncomingPhoneNumbers.json",
            self.base_url, self.account_sid
        );

        let response = self
            .http_client
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| TwilioError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to list phone numbers").await);
        }

        let list_response: PhoneNumberListResponse = response
            .json()
            .await
            .map_err(|e| TwilioError::ParseError(e.to_string()))?;

        let numbers = list_response
            .incoming_phone_numbers
            .into_iter()
            .map(|p| TwilioPhoneNumber {
                sid: p.sid,
                phone_number: p.phone_number,
                friendly_name: p.friendly_name,
                capabilities: PhoneCapabilities {
                    sms: p.capabilities.sms.unwrap_or(false),
                    mms: p.capabilities.mms.unwrap_or(false),
                    voice: p.capabilities.voice.unwrap_or(false),
                },
                status: p.status,
            })
            .collect();

        Ok(numbers)
    }
}

/// Stand-in used when no Twilio account is configured; every send fails.
pub struct UnconfiguredSmsTransport;

#[async_trait]
impl SmsTransport for UnconfiguredSmsTransport {
    async fn send_sms(&self, _from: &str, _to: &str, _body: &str) -> Result<SentSms, TwilioError> {
        Err(TwilioError::ConfigError("Twilio account is not configured".to_string()))
    }

    async fn get_phone_numbers(&self) -> Result<Vec<TwilioPhoneNumber>, TwilioError> {
        Err(TwilioError::ConfigError("Twilio account is not configured".to_string()))
    }
}

fn required(params: &HashMap<String, String>, field: &str) -> Result<String, TwilioError> {
    params
        .get(field)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| TwilioError::MissingField(field.to_string()))
}

pub fn parse_incoming_webhook(
    params: &HashMap<String, String>,
) -> Result<IncomingWebhook, TwilioError> {
    let message_sid = required(params, "MessageSid")?;
    let from = required(params, "From")?;
    let to = required(params, "To")?;
    let body = params
        .get("Body")
        .cloned()
        .ok_or_else(|| TwilioError::MissingField("Body".to_string()))?;

    let num_media: u32 = params
        .get("NumMedia")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let media_urls = (0..num_media)
        .filter_map(|i| params.get(&format!("MediaUrl{i}")).cloned())
        .collect();

    Ok(IncomingWebhook {
        message_sid,
        from,
        to,
        body,
        media_urls,
    })
}

pub fn parse_status_callback(
    params: &HashMap<String, String>,
) -> Result<StatusCallback, TwilioError> {
    let message_sid = required(params, "MessageSid")?;
    let message_status = MessageStatus::parse(&required(params, "MessageStatus")?);

    Ok(StatusCallback {
        message_sid,
        message_status,
        from: params.get("From").cloned(),
        to: params.get("To").cloned(),
        error_code: params.get("ErrorCode").and_then(|s| s.parse().ok()),
        error_message: params.get("ErrorMessage").cloned(),
    })
}

/// Checks `X-Twilio-Signature`: base64 HMAC-SHA1 over the full URL followed
/// by every POST parameter name and value, sorted by name.
pub fn validate_webhook_signature(
    auth_token: &str,
    signature: &str,
    url: &str,
    params: &HashMap<String, String>,
) -> bool {
    let Ok(expected) =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, signature)
    else {
        return false;
    };

    let mut sorted_params: Vec<(&String, &String)> = params.iter().collect();
    sorted_params.sort_by(|a, b| a.0.cmp(b.0));

    let mut data = url.to_string();
    for (key, value) in sorted_params {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = match Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };

    mac.update(data.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    status: String,
    error_code: Option<i32>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberListResponse {
    incoming_phone_numbers: Vec<PhoneNumberResponse>,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberResponse {
    sid: String,
    phone_number: String,
    friendly_name: String,
    capabilities: CapabilitiesResponse,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct CapabilitiesResponse {
    #[serde(alias = "sms")]
    sms: Option<bool>,
    #[serde(alias = "mms")]
    mms: Option<bool>,
    #[serde(alias = "voice")]
    voice: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioApiError {
    pub code: i32,
    pub message: String,
    pub more_info: Option<String>,
    pub status: i32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TwilioError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Twilio API error {}: {}", .0.code, .0.message)]
    ApiError(TwilioApiError),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Missing {0}")]
    MissingField(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn channel(url: &str) -> TwilioSmsChannel {
        TwilioSmsChannel::new(&TwilioConfig {
            base_url: url.to_string(),
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            status_callback_url: Some("https://crm.example.com/api/twilio/webhook".to_string()),
            ..Default::default()
        })
    }

    fn sign(token: &str, url: &str, params: &HashMap<String, String>) -> String {
        let mut keys: Vec<_> = params.keys().collect();
        keys.sort();
        let mut data = url.to_string();
        for key in keys {
            data.push_str(key);
            data.push_str(&params[key]);
        }
        let mut mac = Hmac::<Sha1>::new_from_slice(token.as_bytes()).unwrap();
        mac.update(data.as_bytes());
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            mac.finalize().into_bytes(),
        )
    }

    #[tokio::test]
    async fn test_send_sms_posts_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/Accounts/AC123/Messages.json")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("From".into(), "+15550001111".into()),
                Matcher::UrlEncoded("To".into(), "+15552223333".into()),
                Matcher::UrlEncoded("Body".into(), "hello there".into()),
                Matcher::UrlEncoded(
                    "StatusCallback".into(),
                    "https://crm.example.com/api/twilio/webhook".into(),
                ),
            ]))
            .with_status(201)
            .with_body(r#"{"sid":"SM1","status":"queued","error_code":null,"error_message":null}"#)
            .create_async()
            .await;

        let sent = channel(&server.url())
            .send_sms("+15550001111", "+15552223333", "hello there")
            .await
            .unwrap();

        assert_eq!(sent.sid, "SM1");
        assert_eq!(sent.status, MessageStatus::Queued);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_sms_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Accounts/AC123/Messages.json")
            .with_status(400)
            .with_body(
                r#"{"code":21211,"message":"Invalid 'To' Phone Number","more_info":null,"status":400}"#,
            )
            .create_async()
            .await;

        let err = channel(&server.url())
            .send_sms("+15550001111", "bad", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, TwilioError::ApiError(ref e) if e.code == 21211));
    }

    #[tokio::test]
    async fn test_phone_numbers() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/Accounts/AC123/IncomingPhoneNumbers.json")
            .with_status(200)
            .with_body(
                r#"{"incoming_phone_numbers":[{"sid":"PN1","phone_number":"+15550001111","friendly_name":"Front desk","capabilities":{"SMS":true,"MMS":false,"voice":true},"status":"in-use"}]}"#,
            )
            .create_async()
            .await;

        let numbers = channel(&server.url()).get_phone_numbers().await.unwrap();
        assert_eq!(numbers.len(), 1);
        assert!(numbers[0].capabilities.sms);
        assert!(numbers[0].capabilities.voice);
        assert_eq!(numbers[0].friendly_name, "Front desk");
    }

    #[test]
    fn test_parse_incoming_requires_fields() {
        let ok = parse_incoming_webhook(&params(&[
            ("MessageSid", "SM9"),
            ("From", "+15552223333"),
            ("To", "+15550001111"),
            ("Body", "hi"),
            ("NumMedia", "1"),
            ("MediaUrl0", "https://media/1"),
        ]))
        .unwrap();
        assert_eq!(ok.media_urls, vec!["https://media/1"]);

        let missing = parse_incoming_webhook(&params(&[
            ("MessageSid", "SM9"),
            ("From", "+15552223333"),
            ("Body", "hi"),
        ]));
        assert!(matches!(missing, Err(TwilioError::MissingField(f)) if f == "To"));
    }

    #[test]
    fn test_parse_status_callback() {
        let status = parse_status_callback(&params(&[
            ("MessageSid", "SM1"),
            ("MessageStatus", "undelivered"),
            ("ErrorCode", "30003"),
        ]))
        .unwrap();
        assert_eq!(status.message_status, MessageStatus::Undelivered);
        assert_eq!(status.error_text().as_deref(), Some("Twilio error 30003"));

        assert!(matches!(
            parse_status_callback(&params(&[("MessageStatus", "sent")])),
            Err(TwilioError::MissingField(_))
        ));
    }

    #[test]
    fn test_signature_validation() {
        let url = "https://crm.example.com/api/twilio/webhook";
        let form = params(&[("MessageSid", "SM1"), ("Body", "hi"), ("From", "+1555")]);
        let signature = sign("secret", url, &form);

        assert!(validate_webhook_signature("secret", &signature, url, &form));
        assert!(!validate_webhook_signature("other", &signature, url, &form));
        assert!(!validate_webhook_signature("secret", "not base64!", url, &form));

        let mut tampered = form.clone();
        tampered.insert("Body".to_string(), "bye".to_string());
        assert!(!validate_webhook_signature("secret", &signature, url, &tampered));
    }
}
