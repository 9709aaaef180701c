use crate::configs::AppConfig;
use crate::donation::auth::RoleAuthorization;
use crate::donation::repo::{DbPool, PgDonationRepository, PgUserRepository};
use crate::donation::service::DonationService;
use crate::donation::SharedUserRepository;
use crate::notification::mail::HttpMailSender;
use crate::notification::template::Templates;
use crate::notification::{MailNotifier, NotificationError};
use std::path::Path;
use std::sync::Arc;

pub mod configs;
pub mod donation;
pub mod notification;

pub fn create_user_repository(connection: DbPool) -> SharedUserRepository {
    Arc::new(PgUserRepository::new(connection))
}

pub fn create_authorization(users: SharedUserRepository) -> RoleAuthorization {
    RoleAuthorization::new(users)
}

/// 메일 알림을 사용하는 도서 나눔 서비스를 생성한다.
pub fn create_donation_service(
    connection: DbPool,
    users: SharedUserRepository,
    config: &AppConfig,
) -> Result<DonationService, NotificationError> {
    let templates = Templates::load(Path::new(config.template_dir()))?;
    let sender = HttpMailSender::new(config.mail())?;
    let notifier = MailNotifier::new(templates, Arc::new(sender));

    Ok(DonationService::new(
        Arc::new(PgDonationRepository::new(connection)),
        users,
        Arc::new(notifier),
    ))
}
