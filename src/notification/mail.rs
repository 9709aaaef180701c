use crate::configs::MailConfig;
use crate::notification::{NotificationError, Recipient};
use reqwest::{blocking, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// 메일 릴레이 요청의 기본 타임아웃 시간(초)
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// 발송할 메일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub html: String,
}

impl Mail {
    pub fn new(recipient: &Recipient, subject: &str, html: String) -> Self {
        Self {
            to: recipient.email.clone(),
            to_name: recipient.name.clone(),
            subject: subject.to_owned(),
            html,
        }
    }
}

pub type SharedMailSender = Arc<dyn MailSender>;

/// 메일 전송 트레이트
#[cfg_attr(test, mockall::automock)]
pub trait MailSender: Send + Sync {
    fn send(&self, mail: &Mail) -> Result<(), NotificationError>;
}

#[derive(Debug, Serialize)]
struct RelayAddress<'a> {
    name: &'a str,
    email: &'a str,
}

/// 메일 릴레이 API 요청 본문
#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: RelayAddress<'a>,
    to: RelayAddress<'a>,
    subject: &'a str,
    html: &'a str,
}

/// 메일 릴레이 HTTP API로 메일을 보내는 클라이언트
pub struct HttpMailSender {
    client: blocking::Client,
    endpoint: Url,
    sender_name: String,
    sender_address: String,
    api_key: Option<String>,
}

impl HttpMailSender {
    pub fn new(config: &MailConfig) -> Result<Self, NotificationError> {
        let endpoint = Url::parse(config.endpoint())
            .map_err(|e| NotificationError::Transport(format!("잘못된 메일 릴레이 주소 {}: {}", config.endpoint(), e)))?;
        let timeout = config.timeout_seconds().unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| NotificationError::Transport(format!("클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            sender_name: config.sender_name().to_owned(),
            sender_address: config.sender_address().to_owned(),
            api_key: config.api_key().map(str::to_owned),
        })
    }
}

impl MailSender for HttpMailSender {
    fn send(&self, mail: &Mail) -> Result<(), NotificationError> {
        let message = RelayMessage {
            from: RelayAddress { name: &self.sender_name, email: &self.sender_address },
            to: RelayAddress { name: &mail.to_name, email: &mail.to },
            subject: &mail.subject,
            html: &mail.html,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotificationError::Transport(format!("HTTP 오류: {}", response.status())));
        }
        Ok(())
    }
}
