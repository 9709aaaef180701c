use crate::donation::repo::diesel::{db_id, DonationPgStore};
use crate::donation::{
    Book, BookFilter, BookId, ChangeSet, DonationRepository, DonationRequest, Page, PageRequest, Role,
    StoreError, User, UserId, UserRepository,
};
use ::diesel::r2d2::ConnectionManager;
use ::diesel::PgConnection;
use r2d2::Pool;
use tracing::{debug, error, warn};

mod diesel;
#[cfg(test)]
pub(crate) mod memory;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// PostgreSQL 도서 나눔 저장소
pub struct PgDonationRepository {
    store: DonationPgStore,
}

impl PgDonationRepository {
    pub fn new(db_pool: DbPool) -> Self {
        Self {
            store: DonationPgStore::new(db_pool),
        }
    }
}

impl DonationRepository for PgDonationRepository {
    fn find_book(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        self.store.find_book(db_id(id)?)
            .and_then(|entity| entity.map(|e| e.to_domain()).transpose())
            .inspect_err(logging)
    }

    fn find_books(&self, filter: &BookFilter, page: &PageRequest) -> Result<Page<Book>, StoreError> {
        let (limit, offset) = page_bounds(page)?;
        let (total, entities) = self.store.find_books(filter, limit, offset)
            .inspect_err(logging)?;

        let items = entities.iter()
            .map(|e| e.to_domain())
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(logging)?;

        Ok(Page {
            page: page.page(),
            items_per_page: page.items(),
            total_items: total_items(total)?,
            items,
        })
    }

    fn find_newest_books(&self, limit: u32) -> Result<Vec<Book>, StoreError> {
        self.store.find_newest_books(i64::from(limit))
            .and_then(|entities| entities.iter().map(|e| e.to_domain()).collect())
            .inspect_err(logging)
    }

    fn find_books_by_donor(&self, donor_id: UserId) -> Result<Vec<Book>, StoreError> {
        self.store.find_books_by_donor(db_id(donor_id)?)
            .and_then(|entities| entities.iter().map(|e| e.to_domain()).collect())
            .inspect_err(logging)
    }

    fn insert_book(&self, book: &Book) -> Result<Book, StoreError> {
        let saved = self.store.insert_book(book)
            .and_then(|e| e.to_domain())
            .inspect_err(logging)?;
        debug!(book_id = saved.id(), donor_id = saved.donor_id(), "book inserted");
        Ok(saved)
    }

    fn find_active_request(&self, book_id: BookId, requester_id: UserId) -> Result<Option<DonationRequest>, StoreError> {
        self.store.find_active_request(db_id(book_id)?, db_id(requester_id)?)
            .and_then(|entity| entity.map(|e| e.to_domain()).transpose())
            .inspect_err(logging)
    }

    fn find_requests_by_book(&self, book_id: BookId) -> Result<Vec<DonationRequest>, StoreError> {
        self.store.find_requests_by_book(db_id(book_id)?, false)
            .and_then(|entities| entities.iter().map(|e| e.to_domain()).collect())
            .inspect_err(logging)
    }

    fn list_active_requests(&self, book_id: BookId) -> Result<Vec<DonationRequest>, StoreError> {
        self.store.find_requests_by_book(db_id(book_id)?, true)
            .and_then(|entities| entities.iter().map(|e| e.to_domain()).collect())
            .inspect_err(logging)
    }

    fn find_requests_by_user(&self, requester_id: UserId, page: &PageRequest) -> Result<Page<DonationRequest>, StoreError> {
        let (limit, offset) = page_bounds(page)?;
        let (total, entities) = self.store
            .find_requests_by_user(db_id(requester_id)?, limit, offset)
            .inspect_err(logging)?;

        let items = entities.iter()
            .map(|e| e.to_domain())
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(logging)?;

        Ok(Page {
            page: page.page(),
            items_per_page: page.items(),
            total_items: total_items(total)?,
            items,
        })
    }

    fn insert_request(&self, request: &DonationRequest) -> Result<DonationRequest, StoreError> {
        let saved = self.store.insert_request(request)
            .and_then(|e| e.to_domain())
            .inspect_err(logging)?;
        debug!(request_id = saved.id(), book_id = saved.book_id(), "request inserted");
        Ok(saved)
    }

    fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.store.apply(changes)
            .inspect_err(logging)?;
        debug!(book = changes.book().is_some(), requests = changes.requests().len(), "change set applied");
        Ok(())
    }
}

/// PostgreSQL 사용자 저장소
pub struct PgUserRepository {
    store: DonationPgStore,
}

impl PgUserRepository {
    pub fn new(db_pool: DbPool) -> Self {
        Self {
            store: DonationPgStore::new(db_pool),
        }
    }
}

impl UserRepository for PgUserRepository {
    fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.store.find_user(db_id(id)?)
            .and_then(|entity| entity.map(|e| e.to_domain()).transpose())
            .inspect_err(logging)
    }

    fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let ids = ids.iter().map(|id| db_id(*id)).collect::<Result<Vec<_>, _>>()?;
        self.store.find_users(&ids)
            .and_then(|entities| entities.iter().map(|e| e.to_domain()).collect())
            .inspect_err(logging)
    }

    fn find_administrators(&self) -> Result<Vec<User>, StoreError> {
        self.store.find_users_by_role(Role::Administrator.code())
            .and_then(|entities| entities.iter().map(|e| e.to_domain()).collect())
            .inspect_err(logging)
    }
}

fn page_bounds(page: &PageRequest) -> Result<(i64, i64), StoreError> {
    let offset = i64::try_from(page.offset())
        .map_err(|_| StoreError::OutOfRange(format!("page {} of {} items", page.page(), page.items())))?;
    Ok((i64::from(page.items()), offset))
}

fn total_items(total: i64) -> Result<u64, StoreError> {
    u64::try_from(total).map_err(|_| StoreError::ConvertError(format!("negative count {}", total)))
}

fn logging(e: &StoreError) {
    match e {
        StoreError::StaleState(_) | StoreError::Duplicate(_) | StoreError::OutOfRange(_) => warn!("{:?}", e),
        _ => error!("{:?}", e),
    }
}
