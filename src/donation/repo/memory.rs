use crate::donation::{
    Book, BookChange, BookFilter, BookId, ChangeSet, DonationRepository, DonationRequest, Page, PageRequest,
    StoreError, User, UserId, UserRepository,
};
use std::collections::BTreeMap;
use std::sync::Mutex;

type WriteHook = Box<dyn FnOnce(&MemoryDonationRepository) + Send>;

#[derive(Default)]
struct State {
    books: BTreeMap<BookId, Book>,
    requests: BTreeMap<u64, DonationRequest>,
    next_book_id: u64,
    next_request_id: u64,
}

/// 테스트용 메모리 저장소
///
/// `apply`는 모든 변경의 기대 상태를 먼저 검사한 뒤 한번에 반영한다.
/// 요청 저장과 `apply`의 검사는 같은 잠금 아래에서 이루어진다.
#[derive(Default)]
pub struct MemoryDonationRepository {
    state: Mutex<State>,
    on_next_apply: Mutex<Option<WriteHook>>,
    on_next_insert_request: Mutex<Option<WriteHook>>,
    apply_count: Mutex<usize>,
}

impl MemoryDonationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_book(self, book: Book) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_book_id = state.next_book_id.max(book.id());
            state.books.insert(book.id(), book);
        }
        self
    }

    pub fn with_request(self, request: DonationRequest) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_request_id = state.next_request_id.max(request.id());
            state.requests.insert(request.id(), request);
        }
        self
    }

    /// 다음 `apply` 호출 직전에 한번 실행할 훅을 등록한다. 동시 변경을 흉내 낼 때 쓴다.
    pub fn on_next_apply<F>(&self, hook: F)
    where
        F: FnOnce(&MemoryDonationRepository) + Send + 'static
    {
        *self.on_next_apply.lock().unwrap() = Some(Box::new(hook));
    }

    /// 다음 `insert_request` 호출 직전에 한번 실행할 훅을 등록한다.
    pub fn on_next_insert_request<F>(&self, hook: F)
    where
        F: FnOnce(&MemoryDonationRepository) + Send + 'static
    {
        *self.on_next_insert_request.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn book(&self, id: BookId) -> Option<Book> {
        self.state.lock().unwrap().books.get(&id).cloned()
    }

    pub fn request(&self, id: u64) -> Option<DonationRequest> {
        self.state.lock().unwrap().requests.get(&id).cloned()
    }

    pub fn requests(&self) -> Vec<DonationRequest> {
        self.state.lock().unwrap().requests.values().cloned().collect()
    }

    pub fn apply_count(&self) -> usize {
        *self.apply_count.lock().unwrap()
    }
}

impl DonationRepository for MemoryDonationRepository {
    fn find_book(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        Ok(self.book(id))
    }

    fn find_books(&self, filter: &BookFilter, page: &PageRequest) -> Result<Page<Book>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut all = state.books.values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect::<Vec<_>>();
        all.sort_by(|a, b| b.registered_at().cmp(&a.registered_at()).then(b.id().cmp(&a.id())));

        let total_items = all.len() as u64;
        let items = all.into_iter()
            .skip(page.offset() as usize)
            .take(page.items() as usize)
            .collect();

        Ok(Page { page: page.page(), items_per_page: page.items(), total_items, items })
    }

    fn find_newest_books(&self, limit: u32) -> Result<Vec<Book>, StoreError> {
        let filter = BookFilter { keyword: None, listed_only: true };
        match PageRequest::new(1, limit) {
            Ok(page) => Ok(self.find_books(&filter, &page)?.items),
            Err(_) => Ok(Vec::new()),
        }
    }

    fn find_books_by_donor(&self, donor_id: UserId) -> Result<Vec<Book>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.books.values().rev().filter(|b| b.donor_id() == donor_id).cloned().collect())
    }

    fn insert_book(&self, book: &Book) -> Result<Book, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.next_book_id += 1;
        let saved = book.to_builder()
            .id(state.next_book_id)
            .registered_at(chrono::Local::now().naive_local())
            .build()
            .map_err(|e| StoreError::ConvertError(e.to_string()))?;
        state.books.insert(saved.id(), saved.clone());
        Ok(saved)
    }

    fn find_active_request(&self, book_id: BookId, requester_id: UserId) -> Result<Option<DonationRequest>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.requests.values()
            .find(|r| r.book_id() == book_id && r.requester_id() == requester_id && r.status().is_active())
            .cloned())
    }

    fn find_requests_by_book(&self, book_id: BookId) -> Result<Vec<DonationRequest>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.requests.values().filter(|r| r.book_id() == book_id).cloned().collect())
    }

    fn list_active_requests(&self, book_id: BookId) -> Result<Vec<DonationRequest>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.requests.values()
            .filter(|r| r.book_id() == book_id && r.status().is_active())
            .cloned()
            .collect())
    }

    fn find_requests_by_user(&self, requester_id: UserId, page: &PageRequest) -> Result<Page<DonationRequest>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut all = state.requests.values()
            .filter(|r| r.requester_id() == requester_id)
            .cloned()
            .collect::<Vec<_>>();
        all.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));

        let total_items = all.len() as u64;
        let items = all.into_iter()
            .skip(page.offset() as usize)
            .take(page.items() as usize)
            .collect();

        Ok(Page { page: page.page(), items_per_page: page.items(), total_items, items })
    }

    fn insert_request(&self, request: &DonationRequest) -> Result<DonationRequest, StoreError> {
        let hook = self.on_next_insert_request.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(self);
        }

        let mut state = self.state.lock().unwrap();
        match state.books.get(&request.book_id()) {
            Some(book) if book.is_requestable() => {}
            Some(book) => {
                return Err(StoreError::StaleState(format!("book {} is {} and cannot be requested", book.id(), book.status())));
            }
            None => return Err(StoreError::StaleState(format!("book {} no longer exists", request.book_id()))),
        }
        let duplicated = state.requests.values().any(|r| {
            r.book_id() == request.book_id() && r.requester_id() == request.requester_id() && r.status().is_active()
        });
        if duplicated {
            return Err(StoreError::Duplicate(format!(
                "book {} already has an active request of user {}", request.book_id(), request.requester_id()
            )));
        }

        state.next_request_id += 1;
        let saved = DonationRequest::exists(
            state.next_request_id,
            request.book_id(),
            request.requester_id(),
            request.status(),
            request.reason().to_owned(),
            request.note().map(|n| n.to_owned()),
            request.created_at(),
            request.updated_at(),
        );
        state.requests.insert(saved.id(), saved.clone());
        Ok(saved)
    }

    fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let hook = self.on_next_apply.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(self);
        }
        *self.apply_count.lock().unwrap() += 1;

        let mut state = self.state.lock().unwrap();
        if let Some((book_id, expected)) = changes.expected_active_requests() {
            let active = state.requests.values()
                .filter(|r| r.book_id() == book_id && r.status().is_active())
                .map(|r| r.id())
                .collect::<Vec<_>>();
            if active != expected {
                return Err(StoreError::StaleState(format!("active requests of book {} have changed", book_id)));
            }
        }
        if let Some(change) = changes.book() {
            let (id, expected) = match change {
                BookChange::Update { book, expected } => (book.id(), *expected),
                BookChange::Delete { id, expected } => (*id, *expected),
            };
            let current = state.books.get(&id).map(|b| b.status());
            if current != Some(expected) {
                return Err(StoreError::StaleState(format!("book {} is no longer {}", id, expected)));
            }
        }
        for change in changes.requests() {
            let current = state.requests.get(&change.request().id()).map(|r| r.status());
            if current != Some(change.expected()) {
                return Err(StoreError::StaleState(format!(
                    "request {} is no longer {}", change.request().id(), change.expected()
                )));
            }
        }

        match changes.book() {
            Some(BookChange::Update { book, .. }) => {
                state.books.insert(book.id(), book.clone());
            }
            Some(BookChange::Delete { id, .. }) => {
                state.books.remove(id);
            }
            None => {}
        }
        for change in changes.requests() {
            state.requests.insert(change.request().id(), change.request().clone());
        }
        Ok(())
    }
}

/// 테스트용 메모리 사용자 저장소
pub struct MemoryUserRepository {
    users: Vec<User>,
}

impl MemoryUserRepository {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

impl UserRepository for MemoryUserRepository {
    fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.iter().find(|u| u.id() == id).cloned())
    }

    fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        Ok(self.users.iter().filter(|u| ids.contains(&u.id())).cloned().collect())
    }

    fn find_administrators(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.iter().filter(|u| u.is_administrator()).cloned().collect())
    }
}
