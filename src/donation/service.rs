use crate::donation::{
    Book, BookFilter, BookId, BookKeyword, BookStatus, BookUpdate, ChangeSet, DonationError, DonationRequest,
    DonationStatus, NewBook, Page, PageRequest, SharedDonationRepository, SharedUserRepository, User, UserId,
};
use crate::notification::{BookDonated, BookRequested, SharedNotifier};
use chrono::NaiveDate;
use tracing::{debug, error, info, warn};


/// 최근 등록 도서 목록의 크기
pub const NEWEST_BOOKS: u32 = 15;

/// 도서 나눔 생명주기 서비스
///
/// 상태 전이의 허용 여부를 판단하고 변경 묶음을 저장소에 반영한 뒤 알림을 보낸다.
/// 권한 확인은 호출하는 쪽에서 [`crate::donation::auth::ensure_permission`]으로 먼저 수행해야 한다.
pub struct DonationService {
    repository: SharedDonationRepository,
    users: SharedUserRepository,
    notifier: SharedNotifier,
}

impl DonationService {
    pub fn new(repository: SharedDonationRepository, users: SharedUserRepository, notifier: SharedNotifier) -> Self {
        Self {
            repository,
            users,
            notifier,
        }
    }

    fn load_book(&self, book_id: BookId) -> Result<Book, DonationError> {
        self.repository.find_book(book_id)?
            .ok_or_else(|| DonationError::NotFound(format!("book {}", book_id)))
    }
}

impl DonationService {

    /// 기증자가 새 도서를 등록한다. 등록된 도서는 승인 대기 상태다.
    pub fn register_book(&self, donor: UserId, new_book: NewBook) -> Result<Book, DonationError> {
        let book = Book::builder()
            .title(new_book.title)
            .author(new_book.author)
            .category(new_book.category)
            .donor_id(donor)
            .build()?;

        let saved = self.repository.insert_book(&book)?;
        info!(book_id = saved.id(), donor, "도서가 등록 되었습니다.");
        Ok(saved)
    }

    /// 사용자가 도서를 요청한다.
    ///
    /// 요청이 저장된 후 모든 관리자에게 알림을 보낸다.
    pub fn request_book(&self, book_id: BookId, requester: UserId, reason: &str) -> Result<DonationRequest, DonationError> {
        let book = self.load_book(book_id)?;
        if !book.is_requestable() {
            return Err(DonationError::InvalidState(
                format!("book {} is {} and cannot be requested", book_id, book.status()),
            ));
        }
        if self.repository.find_active_request(book_id, requester)?.is_some() {
            return Err(DonationError::Conflict(
                format!("user {} already requested book {}", requester, book_id),
            ));
        }

        let request = DonationRequest::new(book_id, requester, reason.to_owned());
        let saved = self.repository.insert_request(&request)?;
        info!(book_id, requester, request_id = saved.id(), "도서 요청이 저장 되었습니다.");

        self.notify_book_requested(&book, &saved);
        Ok(saved)
    }

    /// 도서를 승인하고 선택일을 기록한다.
    ///
    /// 대기 중인 요청은 함께 승인 되며, 요청이 하나도 없어도 승인할 수 있다.
    /// 같은 선택일로 다시 승인하면 아무것도 저장하지 않는다.
    pub fn approve_book(&self, book_id: BookId, choose_date: NaiveDate) -> Result<Book, DonationError> {
        let mut book = self.load_book(book_id)?;
        let expected = book.status();
        if !book.approve(choose_date)? {
            debug!(book_id, %choose_date, "이미 같은 선택일로 승인된 도서입니다.");
            return Ok(book);
        }

        let active = self.repository.list_active_requests(book_id)?;
        let mut changes = ChangeSet::new();
        changes.expect_active_requests(book_id, active.iter().map(|r| r.id()));
        for mut request in active {
            if request.status() == DonationStatus::WaitingAction {
                request.transition(DonationStatus::Approved, None)?;
                changes.add_request(request, DonationStatus::WaitingAction);
            }
        }
        let promoted = changes.requests().len();
        changes.update_book(book.clone(), expected);

        self.repository.apply(&changes)?;
        info!(book_id, %choose_date, promoted, "도서가 승인 되었습니다.");
        Ok(book)
    }

    /// 승인된 도서를 선정된 요청자에게 나눔한다.
    ///
    /// 선정된 요청을 제외한 활성 요청은 모두 거절 되며, 알림은 선정된 요청자에게만 보낸다.
    /// 조회 이후 활성 요청이 바뀌었다면 아무것도 반영하지 않는다.
    pub fn donate_book(&self, book_id: BookId, grantee: UserId, note: &str) -> Result<(), DonationError> {
        let mut book = self.load_book(book_id)?;
        if book.status() != BookStatus::Approved {
            return Err(DonationError::InvalidState(
                format!("book {} must be {} to be donated, but was {}", book_id, BookStatus::Approved, book.status()),
            ));
        }

        let active = self.repository.list_active_requests(book_id)?;
        if !active.iter().any(|r| r.requester_id() == grantee) {
            return Err(DonationError::NotFound(
                format!("active request of user {} on book {}", grantee, book_id),
            ));
        }

        let expected = book.status();
        book.donate()?;

        let note = Some(note.trim()).filter(|n| !n.is_empty()).map(str::to_owned);
        let mut changes = ChangeSet::new();
        changes.expect_active_requests(book_id, active.iter().map(|r| r.id()));
        let mut donated = None;
        for mut request in active {
            let before = request.status();
            if request.requester_id() == grantee {
                if before == DonationStatus::WaitingAction {
                    request.transition(DonationStatus::Approved, None)?;
                }
                request.transition(DonationStatus::Donated, note.clone())?;
                donated = Some(request.clone());
            } else {
                request.transition(DonationStatus::Rejected, None)?;
            }
            changes.add_request(request, before);
        }
        let rejected = changes.requests().len() - 1;
        changes.update_book(book.clone(), expected);

        self.repository.apply(&changes)?;
        info!(book_id, grantee, rejected, "도서가 나눔 되었습니다.");

        if let Some(request) = donated {
            self.notify_book_donated(&book, &request);
        }
        Ok(())
    }

    /// 요청자의 활성 요청을 거절한다.
    pub fn reject_request(&self, book_id: BookId, requester: UserId, note: Option<&str>) -> Result<DonationRequest, DonationError> {
        let mut request = self.repository.find_active_request(book_id, requester)?
            .ok_or_else(|| DonationError::NotFound(format!("active request of user {} on book {}", requester, book_id)))?;

        let expected = request.status();
        request.transition(DonationStatus::Rejected, note.map(str::to_owned))?;

        let mut changes = ChangeSet::new();
        changes.add_request(request.clone(), expected);
        self.repository.apply(&changes)?;

        info!(book_id, requester, request_id = request.id(), "도서 요청이 거절 되었습니다.");
        Ok(request)
    }

    /// 요청자가 자신의 대기 중인 요청을 취소한다.
    pub fn cancel_request(&self, book_id: BookId, caller: UserId) -> Result<DonationRequest, DonationError> {
        let mut request = self.repository.find_active_request(book_id, caller)?
            .ok_or_else(|| DonationError::NotFound(format!("active request of user {} on book {}", caller, book_id)))?;

        let expected = request.status();
        request.transition(DonationStatus::Canceled, None)?;

        let mut changes = ChangeSet::new();
        changes.add_request(request.clone(), expected);
        self.repository.apply(&changes)?;

        info!(book_id, caller, request_id = request.id(), "도서 요청이 취소 되었습니다.");
        Ok(request)
    }

    /// 도서를 삭제한다.
    ///
    /// 승인 또는 나눔된 요청이 있으면 삭제할 수 없다. 대기 중인 요청은 취소 상태로 남긴다.
    pub fn delete_book(&self, book_id: BookId) -> Result<(), DonationError> {
        let book = self.load_book(book_id)?;
        let requests = self.repository.find_requests_by_book(book_id)?;

        let blocking = requests.iter()
            .find(|r| matches!(r.status(), DonationStatus::Approved | DonationStatus::Donated));
        if let Some(r) = blocking {
            return Err(DonationError::InvalidState(
                format!("book {} has a request in {} state", book_id, r.status()),
            ));
        }

        let mut changes = ChangeSet::new();
        changes.expect_active_requests(book_id, requests.iter().filter(|r| r.status().is_active()).map(|r| r.id()));
        for mut request in requests.into_iter().filter(|r| r.status() == DonationStatus::WaitingAction) {
            request.transition(DonationStatus::Canceled, None)?;
            changes.add_request(request, DonationStatus::WaitingAction);
        }
        let canceled = changes.requests().len();
        changes.delete_book(book_id, book.status());

        self.repository.apply(&changes)?;
        info!(book_id, canceled, "도서가 삭제 되었습니다.");
        Ok(())
    }

    /// 관리자가 도서 정보를 수정한다.
    pub fn update_book(&self, book_id: BookId, update: BookUpdate) -> Result<Book, DonationError> {
        let mut book = self.load_book(book_id)?;
        let expected = book.status();
        book.edit(update)?;

        let mut changes = ChangeSet::new();
        changes.update_book(book.clone(), expected);
        self.repository.apply(&changes)?;

        info!(book_id, "도서 정보가 수정 되었습니다.");
        Ok(book)
    }

    /// 나눔이 끝난 도서를 종료한다.
    pub fn close_book(&self, book_id: BookId) -> Result<Book, DonationError> {
        let mut book = self.load_book(book_id)?;
        let expected = book.status();
        book.close()?;

        let mut changes = ChangeSet::new();
        changes.update_book(book.clone(), expected);
        self.repository.apply(&changes)?;

        info!(book_id, "도서 나눔이 종료 되었습니다.");
        Ok(book)
    }
}

impl DonationService {

    pub fn find_book(&self, book_id: BookId) -> Result<Book, DonationError> {
        self.load_book(book_id)
    }

    /// 사용자의 요청 목록을 최신순으로 조회한다.
    pub fn requests_of(&self, user: UserId, page: &PageRequest) -> Result<Page<DonationRequest>, DonationError> {
        Ok(self.repository.find_requests_by_user(user, page)?)
    }

    /// 도서에 활성 요청을 가진 사용자 목록
    pub fn grantee_candidates(&self, book_id: BookId) -> Result<Vec<User>, DonationError> {
        self.load_book(book_id)?;
        let ids = self.repository.list_active_requests(book_id)?
            .iter()
            .map(|r| r.requester_id())
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.users.find_by_ids(&ids)?)
    }

    pub fn has_requested(&self, book_id: BookId, user: UserId) -> Result<bool, DonationError> {
        Ok(self.repository.find_active_request(book_id, user)?.is_some())
    }

    /// 기증자가 등록한 도서 목록
    pub fn donations_of(&self, donor: UserId) -> Result<Vec<Book>, DonationError> {
        Ok(self.repository.find_books_by_donor(donor)?)
    }

    /// 관리자용 도서 목록. 상태와 관계 없이 최근 등록순으로 조회한다.
    pub fn list_books(&self, keyword: Option<BookKeyword>, page: &PageRequest) -> Result<Page<Book>, DonationError> {
        let filter = BookFilter {
            keyword: keyword.map(checked_keyword).transpose()?,
            listed_only: false,
        };
        Ok(self.repository.find_books(&filter, page)?)
    }

    /// 공개 목록에서 도서를 검색한다.
    pub fn search_books(&self, keyword: BookKeyword, page: &PageRequest) -> Result<Page<Book>, DonationError> {
        let filter = BookFilter {
            keyword: Some(checked_keyword(keyword)?),
            listed_only: true,
        };
        Ok(self.repository.find_books(&filter, page)?)
    }

    /// 공개 목록에 최근 등록된 도서
    pub fn newest_books(&self) -> Result<Vec<Book>, DonationError> {
        Ok(self.repository.find_newest_books(NEWEST_BOOKS)?)
    }
}

fn checked_keyword(keyword: BookKeyword) -> Result<BookKeyword, DonationError> {
    if keyword.text().trim().is_empty() {
        return Err(DonationError::InvalidArgument("search keyword".to_owned()));
    }
    Ok(keyword)
}

impl DonationService {
    fn notify_book_requested(&self, book: &Book, request: &DonationRequest) {
        let requester = match self.users.find_by_id(request.requester_id()) {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(requester = request.requester_id(), "요청자를 찾을 수 없어 알림을 보내지 않습니다.");
                return;
            }
            Err(e) => {
                error!("요청자 조회 실패: {:?}", e);
                return;
            }
        };
        let administrators = match self.users.find_administrators() {
            Ok(administrators) => administrators,
            Err(e) => {
                error!("관리자 조회 실패: {:?}", e);
                return;
            }
        };

        let event = BookRequested::new(book, request, &requester, &administrators);
        if let Err(e) = self.notifier.notify_book_requested(&event) {
            error!(book_id = book.id(), "도서 요청 알림 전송 실패: {}", e);
        }
    }

    fn notify_book_donated(&self, book: &Book, request: &DonationRequest) {
        let grantee = match self.users.find_by_id(request.requester_id()) {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(grantee = request.requester_id(), "선정된 요청자를 찾을 수 없어 알림을 보내지 않습니다.");
                return;
            }
            Err(e) => {
                error!("선정된 요청자 조회 실패: {:?}", e);
                return;
            }
        };
        let donor = self.users.find_by_id(book.donor_id())
            .unwrap_or_else(|e| {
                error!("기증자 조회 실패: {:?}", e);
                None
            });

        let event = BookDonated::new(book, request, &grantee, donor.as_ref());
        if let Err(e) = self.notifier.notify_book_donated(&event) {
            error!(book_id = book.id(), "도서 나눔 알림 전송 실패: {}", e);
        }
    }
}
