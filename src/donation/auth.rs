use crate::donation::{DonationError, Role, SharedUserRepository, StoreError, UserId};
use std::fmt;
use std::fmt::{Display, Formatter};
use tracing::warn;

/// 관리 작업에 필요한 권한
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ApproveBook,
    DonateBook,
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Permission::ApproveBook => write!(f, "ApproveBook"),
            Permission::DonateBook => write!(f, "DonateBook"),
        }
    }
}

impl Role {
    /// 역할에 부여된 권한 목록
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Administrator => &[Permission::ApproveBook, Permission::DonateBook],
            Role::User => &[],
        }
    }
}

/// 호출자의 권한을 확인하는 트레이트
///
/// 변경 작업을 호출하기 전에 바깥 계층에서 사용하며, 나눔 서비스는 그 결과를 그대로 신뢰한다.
pub trait Authorization: Send + Sync {
    fn has_permission(&self, caller: UserId, permission: Permission) -> Result<bool, StoreError>;
}

/// 사용자 역할로 권한을 판단한다.
pub struct RoleAuthorization {
    users: SharedUserRepository,
}

impl RoleAuthorization {
    pub fn new(users: SharedUserRepository) -> Self {
        Self { users }
    }
}

impl Authorization for RoleAuthorization {
    fn has_permission(&self, caller: UserId, permission: Permission) -> Result<bool, StoreError> {
        let granted = self.users.find_by_id(caller)?
            .map(|user| user.role().permissions().contains(&permission))
            .unwrap_or(false);
        Ok(granted)
    }
}

/// 권한이 없는 경우 [`DonationError::Forbidden`]을 반환한다.
pub fn ensure_permission(
    authorization: &dyn Authorization,
    caller: UserId,
    permission: Permission,
) -> Result<(), DonationError> {
    if authorization.has_permission(caller, permission)? {
        Ok(())
    } else {
        warn!(caller, %permission, "권한이 없는 사용자의 요청입니다.");
        Err(DonationError::Forbidden(format!("user {} does not have {} permission", caller, permission)))
    }
}
