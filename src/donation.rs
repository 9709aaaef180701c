pub mod auth;
pub mod repo;
pub mod service;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type BookId = u64;
pub type UserId = u64;

/// 도서 나눔 모듈에서 사용할 에러 열거
///
/// `Store`를 제외한 모든 에러는 사용자에게 그대로 노출 가능한 클라이언트 에러다.
#[derive(Debug, thiserror::Error)]
pub enum DonationError {
    /// 대상 엔티티가 존재하지 않음
    #[error("not found: {0}")]
    NotFound(String),

    /// 같은 요청자의 활성 요청이 이미 존재함
    #[error("conflict: {0}")]
    Conflict(String),

    /// 현재 상태에서 허용 되지 않는 작업
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// 호출자에게 권한이 없음
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 필수 데이터가 입력 되지 않았거나 유효하지 않음
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 저장소 처리 중 에러가 발생함
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for DonationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StaleState(message) => DonationError::InvalidState(message),
            StoreError::Duplicate(message) => DonationError::Conflict(message),
            StoreError::OutOfRange(message) => DonationError::InvalidArgument(message),
            e => DonationError::Store(e),
        }
    }
}

/// 저장소에서 발생하는 에러 열거
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("connect error: {0}")]
    ConnectError(String),

    #[error("sql execute error: {0}")]
    SqlExecuteError(String),

    /// 변경 대상의 상태가 조회 시점과 달라짐
    #[error("stale state: {0}")]
    StaleState(String),

    /// 유니크 제약 조건 위반
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// 저장된 값을 도메인으로 변환할 수 없음
    #[error("convert error: {0}")]
    ConvertError(String),

    /// 저장소 컬럼이 표현할 수 없는 범위의 값
    #[error("out of range: {0}")]
    OutOfRange(String),
}

/// 도서의 승인 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookStatus {
    WaitingApproval,
    Approved,
    Donated,
    Closed,
}

impl BookStatus {
    pub fn code(&self) -> &'static str {
        match self {
            BookStatus::WaitingApproval => "WAITING_APPROVAL",
            BookStatus::Approved => "APPROVED",
            BookStatus::Donated => "DONATED",
            BookStatus::Closed => "CLOSED",
        }
    }
}

impl TryFrom<&str> for BookStatus {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "WAITING_APPROVAL" => Ok(BookStatus::WaitingApproval),
            "APPROVED" => Ok(BookStatus::Approved),
            "DONATED" => Ok(BookStatus::Donated),
            "CLOSED" => Ok(BookStatus::Closed),
            _ => Err(StoreError::ConvertError(format!("Unknown book status: {}", value))),
        }
    }
}

impl Display for BookStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// 나눔 요청의 상태
///
/// `Donated`, `Rejected`, `Canceled`는 종료 상태로 이후 어떤 전이도 허용 되지 않는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DonationStatus {
    WaitingAction,
    Approved,
    Rejected,
    Donated,
    Canceled,
}

impl DonationStatus {
    /// 종료 되지 않은(활성) 상태 목록
    pub const ACTIVE: [DonationStatus; 2] = [DonationStatus::WaitingAction, DonationStatus::Approved];

    pub fn code(&self) -> &'static str {
        match self {
            DonationStatus::WaitingAction => "WAITING_ACTION",
            DonationStatus::Approved => "APPROVED",
            DonationStatus::Rejected => "REJECTED",
            DonationStatus::Donated => "DONATED",
            DonationStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// 현재 상태에서 `next` 상태로 전이 가능한지 확인한다.
    ///
    /// # Example
    /// ```
    /// use book_donation_rust::donation::DonationStatus;
    ///
    /// assert!(DonationStatus::WaitingAction.can_transition_to(DonationStatus::Approved));
    /// assert!(DonationStatus::Approved.can_transition_to(DonationStatus::Donated));
    /// assert!(!DonationStatus::Approved.can_transition_to(DonationStatus::Canceled));
    /// assert!(!DonationStatus::Donated.can_transition_to(DonationStatus::Rejected));
    /// ```
    pub fn can_transition_to(&self, next: DonationStatus) -> bool {
        use DonationStatus::*;
        matches!(
            (self, next),
            (WaitingAction, Approved)
                | (WaitingAction, Rejected)
                | (WaitingAction, Canceled)
                | (Approved, Donated)
                | (Approved, Rejected)
        )
    }
}

impl TryFrom<&str> for DonationStatus {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "WAITING_ACTION" => Ok(DonationStatus::WaitingAction),
            "APPROVED" => Ok(DonationStatus::Approved),
            "REJECTED" => Ok(DonationStatus::Rejected),
            "DONATED" => Ok(DonationStatus::Donated),
            "CANCELED" => Ok(DonationStatus::Canceled),
            _ => Err(StoreError::ConvertError(format!("Unknown donation status: {}", value))),
        }
    }
}

impl Display for DonationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// 사용자 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Administrator,
}

impl Role {
    pub fn code(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Administrator => "ADMIN",
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Administrator),
            _ => Err(StoreError::ConvertError(format!("Unknown role: {}", value))),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// 사용자
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    id: UserId,
    name: String,
    email: String,
    #[serde_as(as = "DisplayFromStr")]
    role: Role,
}

impl User {
    pub fn new(id: UserId, name: String, email: String, role: Role) -> Self {
        Self { id, name, email, role }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }
}

/// 기증자가 새로 등록하는 도서 정보
#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub category: String,
}

/// 관리자가 수정하는 도서 정보. `None`인 항목은 바꾸지 않는다.
#[derive(Debug, Clone, Default)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
}

/// 도서 검색어
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookKeyword {
    Title(String),
    Author(String),
    /// 제목, 저자, 분류 중 하나라도 포함하면 일치
    Any(String),
}

impl BookKeyword {
    pub fn text(&self) -> &str {
        match self {
            BookKeyword::Title(text) | BookKeyword::Author(text) | BookKeyword::Any(text) => text,
        }
    }

    /// 대소문자를 구분하지 않고 부분 일치하는지 확인한다.
    pub fn matches(&self, book: &Book) -> bool {
        let needle = self.text().to_lowercase();
        let contains = |value: &str| value.to_lowercase().contains(&needle);
        match self {
            BookKeyword::Title(_) => contains(book.title()),
            BookKeyword::Author(_) => contains(book.author()),
            BookKeyword::Any(_) => contains(book.title()) || contains(book.author()) || contains(book.category()),
        }
    }
}

/// 도서 목록 조회 조건
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFilter {
    pub keyword: Option<BookKeyword>,
    /// 참이면 승인 되어 나눔 받을 수 있는 도서만 조회한다.
    pub listed_only: bool,
}

impl BookFilter {
    pub fn matches(&self, book: &Book) -> bool {
        (!self.listed_only || book.is_listed())
            && self.keyword.as_ref().is_none_or(|k| k.matches(book))
    }
}

/// 나눔 도서
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
    id: BookId,
    title: String,
    author: String,
    category: String,
    donor_id: UserId,
    #[serde_as(as = "DisplayFromStr")]
    status: BookStatus,
    available: bool,
    choose_date: Option<NaiveDate>,
    registered_at: Option<NaiveDateTime>,
    modified_at: Option<NaiveDateTime>,
}

impl Book {
    pub fn builder() -> BookBuilder {
        BookBuilder::new()
    }

    pub fn id(&self) -> BookId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn donor_id(&self) -> UserId {
        self.donor_id
    }

    pub fn status(&self) -> BookStatus {
        self.status
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn choose_date(&self) -> Option<NaiveDate> {
        self.choose_date
    }

    pub fn registered_at(&self) -> Option<NaiveDateTime> {
        self.registered_at
    }

    pub fn modified_at(&self) -> Option<NaiveDateTime> {
        self.modified_at
    }

    pub fn to_builder(&self) -> BookBuilder {
        let mut builder = BookBuilder::new()
            .id(self.id)
            .title(self.title.clone())
            .author(self.author.clone())
            .category(self.category.clone())
            .donor_id(self.donor_id)
            .status(self.status)
            .available(self.available);

        if let Some(date) = self.choose_date {
            builder = builder.choose_date(date);
        }
        if let Some(registered_at) = self.registered_at {
            builder = builder.registered_at(registered_at);
        }
        if let Some(modified_at) = self.modified_at {
            builder = builder.modified_at(modified_at);
        }

        builder
    }
}

impl Book {
    /// 나눔 요청을 받을 수 있는 상태인지 확인한다.
    pub fn is_requestable(&self) -> bool {
        self.available && matches!(self.status, BookStatus::WaitingApproval | BookStatus::Approved)
    }

    /// 공개 목록에 노출 되는 도서인지 확인한다. 승인 되어 아직 나눔 되지 않은 도서만 노출한다.
    pub fn is_listed(&self) -> bool {
        self.available && self.status == BookStatus::Approved
    }

    /// 관리자가 도서 정보를 수정한다. 나눔이 끝난 도서는 수정할 수 없다.
    pub fn edit(&mut self, update: BookUpdate) -> Result<(), DonationError> {
        if matches!(self.status, BookStatus::Donated | BookStatus::Closed) {
            return Err(DonationError::InvalidState(
                format!("book {} is already {}", self.id, self.status),
            ));
        }
        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(DonationError::InvalidArgument("title".to_owned()));
            }
            self.title = title;
        }
        if let Some(author) = update.author {
            if author.trim().is_empty() {
                return Err(DonationError::InvalidArgument("author".to_owned()));
            }
            self.author = author;
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        self.modified_at = Some(chrono::Local::now().naive_local());
        Ok(())
    }

    /// 도서를 승인하고 선택일을 기록한다.
    ///
    /// 이미 같은 선택일로 승인된 도서라면 아무것도 바뀌지 않으며 `false`를 반환한다.
    pub fn approve(&mut self, choose_date: NaiveDate) -> Result<bool, DonationError> {
        match self.status {
            BookStatus::Donated | BookStatus::Closed => Err(DonationError::InvalidState(
                format!("book {} is already {}", self.id, self.status),
            )),
            BookStatus::Approved if self.choose_date == Some(choose_date) => Ok(false),
            _ => {
                self.status = BookStatus::Approved;
                self.choose_date = Some(choose_date);
                self.modified_at = Some(chrono::Local::now().naive_local());
                Ok(true)
            }
        }
    }

    /// 승인된 도서를 나눔 완료 상태로 바꾸고 더이상 요청 받지 않도록 한다.
    pub fn donate(&mut self) -> Result<(), DonationError> {
        if self.status != BookStatus::Approved {
            return Err(DonationError::InvalidState(
                format!("book {} must be {} to be donated, but was {}", self.id, BookStatus::Approved, self.status),
            ));
        }
        self.status = BookStatus::Donated;
        self.available = false;
        self.modified_at = Some(chrono::Local::now().naive_local());
        Ok(())
    }

    /// 나눔이 끝난 도서를 종료한다.
    pub fn close(&mut self) -> Result<(), DonationError> {
        if self.status != BookStatus::Donated {
            return Err(DonationError::InvalidState(
                format!("book {} must be {} to be closed, but was {}", self.id, BookStatus::Donated, self.status),
            ));
        }
        self.status = BookStatus::Closed;
        self.modified_at = Some(chrono::Local::now().naive_local());
        Ok(())
    }
}

/// Book 빌더
#[derive(Debug, Clone, Default)]
pub struct BookBuilder {
    id: Option<BookId>,
    title: Option<String>,
    author: Option<String>,
    category: Option<String>,
    donor_id: Option<UserId>,
    status: Option<BookStatus>,
    available: Option<bool>,
    choose_date: Option<NaiveDate>,
    registered_at: Option<NaiveDateTime>,
    modified_at: Option<NaiveDateTime>,
}

impl BookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: BookId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn title(mut self, title: String) -> Self {
        self.title = Some(title);
        self
    }

    pub fn author(mut self, author: String) -> Self {
        self.author = Some(author);
        self
    }

    pub fn category(mut self, category: String) -> Self {
        self.category = Some(category);
        self
    }

    pub fn donor_id(mut self, donor_id: UserId) -> Self {
        self.donor_id = Some(donor_id);
        self
    }

    pub fn status(mut self, status: BookStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn available(mut self, available: bool) -> Self {
        self.available = Some(available);
        self
    }

    pub fn choose_date(mut self, date: NaiveDate) -> Self {
        self.choose_date = Some(date);
        self
    }

    pub fn registered_at(mut self, registered_at: NaiveDateTime) -> Self {
        self.registered_at = Some(registered_at);
        self
    }

    pub fn modified_at(mut self, modified_at: NaiveDateTime) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// 제목, 저자, 기증자는 필수이며 제목과 저자는 공백일 수 없다.
    pub fn build(self) -> Result<Book, DonationError> {
        let title = self.title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DonationError::InvalidArgument("title".to_owned()))?;
        let author = self.author
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| DonationError::InvalidArgument("author".to_owned()))?;
        let donor_id = self.donor_id
            .ok_or_else(|| DonationError::InvalidArgument("donor_id".to_owned()))?;

        Ok(Book {
            id: self.id.unwrap_or(0),
            title,
            author,
            category: self.category.unwrap_or_default(),
            donor_id,
            status: self.status.unwrap_or(BookStatus::WaitingApproval),
            available: self.available.unwrap_or(true),
            choose_date: self.choose_date,
            registered_at: self.registered_at,
            modified_at: self.modified_at,
        })
    }
}

/// 도서 나눔 요청
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonationRequest {
    id: u64,
    book_id: BookId,
    requester_id: UserId,
    #[serde_as(as = "DisplayFromStr")]
    status: DonationStatus,
    reason: String,
    note: Option<String>,
    created_at: Option<NaiveDateTime>,
    updated_at: Option<NaiveDateTime>,
}

impl DonationRequest {
    /// 아직 저장 되지 않은 `WaitingAction` 상태의 요청을 생성한다.
    pub fn new(book_id: BookId, requester_id: UserId, reason: String) -> Self {
        Self {
            id: 0,
            book_id,
            requester_id,
            status: DonationStatus::WaitingAction,
            reason,
            note: None,
            created_at: Some(chrono::Local::now().naive_local()),
            updated_at: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn exists(
        id: u64,
        book_id: BookId,
        requester_id: UserId,
        status: DonationStatus,
        reason: String,
        note: Option<String>,
        created_at: Option<NaiveDateTime>,
        updated_at: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            id,
            book_id,
            requester_id,
            status,
            reason,
            note,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub fn requester_id(&self) -> UserId {
        self.requester_id
    }

    pub fn status(&self) -> DonationStatus {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<NaiveDateTime> {
        self.updated_at
    }

    /// 요청의 상태를 전이한다. 노트가 전달 되면 기존 노트를 대체한다.
    pub fn transition(&mut self, next: DonationStatus, note: Option<String>) -> Result<(), DonationError> {
        if !self.status.can_transition_to(next) {
            return Err(DonationError::InvalidState(
                format!("request {} cannot move from {} to {}", self.id, self.status, next),
            ));
        }
        self.status = next;
        if note.is_some() {
            self.note = note;
        }
        self.updated_at = Some(chrono::Local::now().naive_local());
        Ok(())
    }
}

/// 도서에 대한 변경
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookChange {
    Update { book: Book, expected: BookStatus },
    Delete { id: BookId, expected: BookStatus },
}

/// 요청에 대한 변경. `expected`는 변경 전 조회한 상태다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestChange {
    request: DonationRequest,
    expected: DonationStatus,
}

impl RequestChange {
    pub fn request(&self) -> &DonationRequest {
        &self.request
    }

    pub fn expected(&self) -> DonationStatus {
        self.expected
    }
}

/// 하나의 트랜잭션으로 저장소에 반영 되어야 하는 변경 묶음
///
/// 저장소는 각 변경 대상의 현재 상태가 `expected`와 다르면 묶음 전체를 반영하지 않고
/// [`StoreError::StaleState`]를 반환해야 한다. 활성 요청 목록이 지정 되었다면 반영 시점의
/// 도서 활성 요청 아이디 목록도 같아야 한다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    book: Option<BookChange>,
    requests: Vec<RequestChange>,
    active_requests: Option<(BookId, Vec<u64>)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_book(&mut self, book: Book, expected: BookStatus) {
        self.book = Some(BookChange::Update { book, expected });
    }

    pub fn delete_book(&mut self, id: BookId, expected: BookStatus) {
        self.book = Some(BookChange::Delete { id, expected });
    }

    pub fn add_request(&mut self, request: DonationRequest, expected: DonationStatus) {
        self.requests.push(RequestChange { request, expected });
    }

    /// 반영 시점에 도서의 활성 요청이 전달 받은 요청들과 정확히 같아야 함을 지정한다.
    pub fn expect_active_requests<I>(&mut self, book_id: BookId, request_ids: I)
    where
        I: IntoIterator<Item = u64>
    {
        let mut ids = request_ids.into_iter().collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        self.active_requests = Some((book_id, ids));
    }

    /// 지정된 (도서 아이디, 정렬된 활성 요청 아이디 목록)
    pub fn expected_active_requests(&self) -> Option<(BookId, &[u64])> {
        self.active_requests.as_ref().map(|(book_id, ids)| (*book_id, ids.as_slice()))
    }

    pub fn book(&self) -> Option<&BookChange> {
        self.book.as_ref()
    }

    pub fn requests(&self) -> &[RequestChange] {
        &self.requests
    }

    pub fn is_empty(&self) -> bool {
        self.book.is_none() && self.requests.is_empty()
    }
}

/// 페이지 조회 조건. 페이지는 1부터 시작한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    items: u32,
}

impl PageRequest {
    pub fn new(page: u32, items: u32) -> Result<Self, DonationError> {
        if page == 0 {
            return Err(DonationError::InvalidArgument("page must be greater than 0".to_owned()));
        }
        if items == 0 {
            return Err(DonationError::InvalidArgument("items must be greater than 0".to_owned()));
        }
        Ok(Self { page, items })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn items(&self) -> u32 {
        self.items
    }

    /// # Example
    /// ```
    /// use book_donation_rust::donation::PageRequest;
    ///
    /// let request = PageRequest::new(3, 15).unwrap();
    /// assert_eq!(request.offset(), 30);
    /// ```
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.items)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub page: u32,
    pub items_per_page: u32,
    pub total_items: u64,
    pub items: Vec<T>,
}

pub type SharedDonationRepository = Arc<dyn DonationRepository>;

/// 도서 나눔 저장소
pub trait DonationRepository: Send + Sync {

    /// 아이디로 도서를 찾는다.
    fn find_book(&self, id: BookId) -> Result<Option<Book>, StoreError>;

    /// 조건에 맞는 도서를 최근 등록순으로 페이지 조회 한다.
    fn find_books(&self, filter: &BookFilter, page: &PageRequest) -> Result<Page<Book>, StoreError>;

    /// 공개 목록에 노출 되는 도서를 최근 등록순으로 `limit`개 찾는다.
    fn find_newest_books(&self, limit: u32) -> Result<Vec<Book>, StoreError>;

    /// 기증자가 등록한 도서를 모두 찾는다.
    fn find_books_by_donor(&self, donor_id: UserId) -> Result<Vec<Book>, StoreError>;

    /// 전달 받은 도서를 저장하고 아이디가 설정된 도서를 반환한다.
    fn insert_book(&self, book: &Book) -> Result<Book, StoreError>;

    /// 요청자가 도서에 대해 가진 활성 요청을 찾는다.
    fn find_active_request(&self, book_id: BookId, requester_id: UserId) -> Result<Option<DonationRequest>, StoreError>;

    /// 도서에 대한 모든 요청을 상태와 관계 없이 찾는다.
    fn find_requests_by_book(&self, book_id: BookId) -> Result<Vec<DonationRequest>, StoreError>;

    /// 도서에 대한 활성 요청을 찾는다.
    fn list_active_requests(&self, book_id: BookId) -> Result<Vec<DonationRequest>, StoreError>;

    /// 요청자의 요청을 최신순으로 페이지 조회 한다.
    fn find_requests_by_user(&self, requester_id: UserId, page: &PageRequest) -> Result<Page<DonationRequest>, StoreError>;

    /// 새 요청을 저장한다.
    ///
    /// 같은 (도서, 요청자)의 활성 요청이 이미 있다면 [`StoreError::Duplicate`]를,
    /// 저장 시점에 도서가 없거나 요청 받을 수 없는 상태라면 [`StoreError::StaleState`]를 반환해야 한다.
    fn insert_request(&self, request: &DonationRequest) -> Result<DonationRequest, StoreError>;

    /// 변경 묶음을 원자적으로 반영한다.
    fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError>;
}

pub type SharedUserRepository = Arc<dyn UserRepository>;

/// 사용자 저장소
pub trait UserRepository: Send + Sync {

    fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    /// 관리자 역할을 가진 사용자를 모두 찾는다.
    fn find_administrators(&self) -> Result<Vec<User>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(status: BookStatus) -> Book {
        Book::builder()
            .id(1)
            .title("Rust in Action".to_owned())
            .author("Tim McNamara".to_owned())
            .donor_id(10)
            .status(status)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_rejects_blank_title() {
        let result = Book::builder()
            .title("  ".to_owned())
            .author("author".to_owned())
            .donor_id(1)
            .build();

        assert!(matches!(result, Err(DonationError::InvalidArgument(ref f)) if f == "title"));
    }

    #[test]
    fn builder_defaults_to_waiting_approval_and_available() {
        let book = Book::builder()
            .title("title".to_owned())
            .author("author".to_owned())
            .donor_id(1)
            .build()
            .unwrap();

        assert_eq!(book.status(), BookStatus::WaitingApproval);
        assert!(book.available());
        assert_eq!(book.id(), 0);
    }

    #[test]
    fn approve_twice_with_same_date_changes_nothing() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let mut book = book(BookStatus::WaitingApproval);

        assert!(book.approve(date).unwrap());
        let approved = book.clone();
        assert!(!book.approve(date).unwrap());
        assert_eq!(book, approved);
    }

    #[test]
    fn approve_with_other_date_updates_choose_date() {
        let mut book = book(BookStatus::Approved);
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        assert!(book.approve(date).unwrap());
        assert_eq!(book.choose_date(), Some(date));
    }

    #[test]
    fn donated_book_cannot_be_approved() {
        let mut book = book(BookStatus::Donated);
        let result = book.approve(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());

        assert!(matches!(result, Err(DonationError::InvalidState(_))));
    }

    #[test]
    fn donate_requires_approved_book() {
        let mut waiting = book(BookStatus::WaitingApproval);
        assert!(matches!(waiting.donate(), Err(DonationError::InvalidState(_))));

        let mut approved = book(BookStatus::Approved);
        approved.donate().unwrap();
        assert_eq!(approved.status(), BookStatus::Donated);
        assert!(!approved.available());
        assert!(!approved.is_requestable());
    }

    #[test]
    fn close_requires_donated_book() {
        let mut approved = book(BookStatus::Approved);
        assert!(matches!(approved.close(), Err(DonationError::InvalidState(_))));

        let mut donated = book(BookStatus::Donated);
        donated.close().unwrap();
        assert_eq!(donated.status(), BookStatus::Closed);
    }

    #[test]
    fn terminal_request_cannot_transition() {
        for terminal in [DonationStatus::Donated, DonationStatus::Rejected, DonationStatus::Canceled] {
            let mut request = DonationRequest::exists(1, 1, 2, terminal, "reason".to_owned(), None, None, None);
            for next in [
                DonationStatus::WaitingAction,
                DonationStatus::Approved,
                DonationStatus::Rejected,
                DonationStatus::Donated,
                DonationStatus::Canceled,
            ] {
                assert!(request.transition(next, None).is_err(), "{} -> {}", terminal, next);
            }
            assert_eq!(request.status(), terminal);
        }
    }

    #[test]
    fn transition_keeps_note_when_none_given() {
        let mut request = DonationRequest::new(1, 2, "need it".to_owned());
        request.transition(DonationStatus::Approved, Some("first".to_owned())).unwrap();
        request.transition(DonationStatus::Donated, None).unwrap();

        assert_eq!(request.note(), Some("first"));
        assert!(request.updated_at().is_some());
    }

    #[test]
    fn status_codes_round_trip_through_store_representation() {
        assert_eq!(DonationStatus::try_from("WAITING_ACTION").unwrap(), DonationStatus::WaitingAction);
        assert_eq!(BookStatus::try_from(BookStatus::Closed.code()).unwrap(), BookStatus::Closed);
        assert_eq!(Role::try_from("ADMIN").unwrap(), Role::Administrator);
        assert!(matches!(DonationStatus::try_from("LOST"), Err(StoreError::ConvertError(_))));
    }

    #[test]
    fn stale_store_error_surfaces_as_invalid_state() {
        let error: DonationError = StoreError::StaleState("book 1".to_owned()).into();
        assert!(matches!(error, DonationError::InvalidState(_)));

        let error: DonationError = StoreError::Duplicate("request".to_owned()).into();
        assert!(matches!(error, DonationError::Conflict(_)));

        let error: DonationError = StoreError::ConnectError("down".to_owned()).into();
        assert!(matches!(error, DonationError::Store(_)));

        let error: DonationError = StoreError::OutOfRange("book id".to_owned()).into();
        assert!(matches!(error, DonationError::InvalidArgument(_)));
    }

    #[test]
    fn edit_keeps_unspecified_fields() {
        let mut approved = book(BookStatus::Approved);
        approved.edit(BookUpdate { title: Some("Rust Atomics and Locks".to_owned()), ..Default::default() }).unwrap();

        assert_eq!(approved.title(), "Rust Atomics and Locks");
        assert_eq!(approved.author(), "Tim McNamara");
        assert_eq!(approved.status(), BookStatus::Approved);
        assert!(approved.modified_at().is_some());
    }

    #[test]
    fn edit_rejects_donated_book_and_blank_author() {
        let mut donated = book(BookStatus::Donated);
        let result = donated.edit(BookUpdate { category: Some("Drama".to_owned()), ..Default::default() });
        assert!(matches!(result, Err(DonationError::InvalidState(_))));

        let mut waiting = book(BookStatus::WaitingApproval);
        let result = waiting.edit(BookUpdate { author: Some("  ".to_owned()), ..Default::default() });
        assert!(matches!(result, Err(DonationError::InvalidArgument(_))));
    }

    #[test]
    fn keyword_matches_ignoring_case() {
        let b = book(BookStatus::Approved);
        assert!(BookKeyword::Title("in action".to_owned()).matches(&b));
        assert!(!BookKeyword::Author("action".to_owned()).matches(&b));
        assert!(BookKeyword::Any("MCNAMARA".to_owned()).matches(&b));

        let filter = BookFilter { keyword: None, listed_only: true };
        assert!(filter.matches(&b));
        assert!(!filter.matches(&book(BookStatus::WaitingApproval)));
    }

    #[test]
    fn expected_active_requests_are_sorted() {
        let mut changes = ChangeSet::new();
        changes.expect_active_requests(1, [7, 3, 7]);

        assert_eq!(changes.expected_active_requests(), Some((1, &[3, 7][..])));
        assert!(changes.is_empty());
    }

    #[test]
    fn page_request_rejects_zero() {
        assert!(PageRequest::new(0, 10).is_err());
        assert!(PageRequest::new(1, 0).is_err());
        assert_eq!(PageRequest::new(1, 10).unwrap().offset(), 0);
    }
}
