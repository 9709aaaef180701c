pub mod mail;
pub mod template;

use crate::donation::{Book, BookId, DonationRequest, User, UserId};
use crate::notification::mail::{Mail, SharedMailSender};
use crate::notification::template::{TemplateError, TemplateKind, Templates, Variables};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

const BOOK_REQUESTED_TITLE: &str = "Um livro foi solicitado - Sharebook";
const BOOK_DONATED_TITLE: &str = "Parabéns você foi selecionado!";

/// 알림 발송 중 발생한 에러 열거
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// 메일 템플릿을 읽거나 렌더링할 수 없음
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// 메일 전송에 실패함
    #[error("mail transport error: {0}")]
    Transport(String),
}

/// 알림 수신자
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl From<&User> for Recipient {
    fn from(user: &User) -> Self {
        Self {
            id: user.id(),
            name: user.name().to_owned(),
            email: user.email().to_owned(),
        }
    }
}

/// 알림에 포함 되는 도서 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSummary {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub category: String,
}

impl From<&Book> for BookSummary {
    fn from(book: &Book) -> Self {
        Self {
            id: book.id(),
            title: book.title().to_owned(),
            author: book.author().to_owned(),
            category: book.category().to_owned(),
        }
    }
}

/// 사용자가 도서를 요청 했을 때 모든 관리자에게 보내는 알림
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookRequested {
    pub book: BookSummary,
    pub requester: Recipient,
    pub reason: String,
    pub administrators: Vec<Recipient>,
}

impl BookRequested {
    pub fn new(book: &Book, request: &DonationRequest, requester: &User, administrators: &[User]) -> Self {
        Self {
            book: book.into(),
            requester: requester.into(),
            reason: request.reason().to_owned(),
            administrators: administrators.iter().map(Recipient::from).collect(),
        }
    }

    fn variables(&self, administrator: &Recipient) -> Variables {
        Variables::from([
            ("Book.Title", self.book.title.clone()),
            ("Book.Author", self.book.author.clone()),
            ("Book.Category", self.book.category.clone()),
            ("RequestingUser.Name", self.requester.name.clone()),
            ("RequestingUser.Email", self.requester.email.clone()),
            ("Request.Reason", self.reason.clone()),
            ("Administrator.Name", administrator.name.clone()),
        ])
    }
}

/// 도서가 나눔 되었을 때 선정된 요청자에게만 보내는 알림
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookDonated {
    pub book: BookSummary,
    pub donor: Option<Recipient>,
    pub grantee: Recipient,
    pub note: Option<String>,
}

impl BookDonated {
    pub fn new(book: &Book, request: &DonationRequest, grantee: &User, donor: Option<&User>) -> Self {
        Self {
            book: book.into(),
            donor: donor.map(Recipient::from),
            grantee: grantee.into(),
            note: request.note().map(str::to_owned),
        }
    }

    fn variables(&self) -> Variables {
        Variables::from([
            ("Book.Title", self.book.title.clone()),
            ("Book.Author", self.book.author.clone()),
            ("Book.Donor", self.donor.as_ref().map(|d| d.name.clone()).unwrap_or_default()),
            ("User.Name", self.grantee.name.clone()),
            ("User.Email", self.grantee.email.clone()),
            ("Donation.Note", self.note.clone().unwrap_or_default()),
        ])
    }
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// 나눔 상태 변경 알림 트레이트
///
/// 알림은 상태 변경이 저장된 이후에만 호출 되며, 실패하더라도 상태 변경은 되돌리지 않는다.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify_book_requested(&self, event: &BookRequested) -> Result<(), NotificationError>;

    fn notify_book_donated(&self, event: &BookDonated) -> Result<(), NotificationError>;
}

/// HTML 메일 템플릿을 렌더링 하여 메일로 알림을 보낸다.
pub struct MailNotifier {
    templates: Templates,
    sender: SharedMailSender,
}

impl MailNotifier {
    pub fn new(templates: Templates, sender: SharedMailSender) -> Self {
        Self { templates, sender }
    }
}

impl Notifier for MailNotifier {
    fn notify_book_requested(&self, event: &BookRequested) -> Result<(), NotificationError> {
        let mut failed = 0;
        for administrator in &event.administrators {
            let html = self.templates.render(TemplateKind::BookRequested, &event.variables(administrator))?;
            let mail = Mail::new(administrator, BOOK_REQUESTED_TITLE, html);

            // 한 관리자에게 실패해도 나머지 관리자에게는 계속 보낸다.
            if let Err(e) = self.sender.send(&mail) {
                error!(book_id = event.book.id, to = %administrator.email, "{}", e);
                failed += 1;
            } else {
                debug!(book_id = event.book.id, to = %administrator.email, "도서 요청 메일을 보냈습니다.");
            }
        }

        if failed > 0 {
            return Err(NotificationError::Transport(
                format!("{} of {} mails failed", failed, event.administrators.len()),
            ));
        }
        Ok(())
    }

    fn notify_book_donated(&self, event: &BookDonated) -> Result<(), NotificationError> {
        let html = self.templates.render(TemplateKind::BookDonated, &event.variables())?;
        let mail = Mail::new(&event.grantee, BOOK_DONATED_TITLE, html);

        self.sender.send(&mail)?;
        debug!(book_id = event.book.id, to = %event.grantee.email, "도서 나눔 메일을 보냈습니다.");
        Ok(())
    }
}
