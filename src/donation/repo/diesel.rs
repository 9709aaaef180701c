use crate::donation::{
    Book, BookChange, BookFilter, BookKeyword, BookStatus, ChangeSet, DonationRequest, DonationStatus, Role,
    StoreError, User,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::result::DatabaseErrorKind;
use r2d2::Pool;
use schema::donation::{book, book_request, users};

mod schema;

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Duplicate(info.message().to_owned())
            }
            e => StoreError::SqlExecuteError(e.to_string()),
        }
    }
}

/// 도메인 아이디를 `BIGINT` 컬럼 값으로 바꾼다.
pub fn db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::OutOfRange(format!("id {} exceeds {}", id, i64::MAX)))
}

fn domain_id(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::ConvertError(format!("negative id {}", id)))
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = book)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BookEntity {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub category: String,
    pub donor_id: i64,
    pub status: String,
    pub available: bool,
    pub choose_date: Option<NaiveDate>,
    pub registered_at: NaiveDateTime,
    pub modified_at: Option<NaiveDateTime>,
}

impl BookEntity {
    pub fn to_domain(&self) -> Result<Book, StoreError> {
        let mut builder = Book::builder()
            .id(domain_id(self.id)?)
            .title(self.title.clone())
            .author(self.author.clone())
            .category(self.category.clone())
            .donor_id(domain_id(self.donor_id)?)
            .status(BookStatus::try_from(self.status.as_str())?)
            .available(self.available)
            .registered_at(self.registered_at);

        if let Some(date) = self.choose_date {
            builder = builder.choose_date(date);
        }
        if let Some(modified_at) = self.modified_at {
            builder = builder.modified_at(modified_at);
        }

        builder.build()
            .map_err(|e| StoreError::ConvertError(format!("book {}: {}", self.id, e)))
    }
}

#[derive(Insertable)]
#[diesel(table_name = book)]
pub struct NewBookEntity<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub category: &'a str,
    pub donor_id: i64,
    pub status: &'a str,
    pub available: bool,
    pub choose_date: Option<NaiveDate>,
    pub registered_at: NaiveDateTime,
}

impl <'a, 'b> NewBookEntity<'a> where 'b: 'a {
    pub fn from(b: &'b Book) -> Result<Self, StoreError> {
        Ok(Self {
            title: b.title(),
            author: b.author(),
            category: b.category(),
            donor_id: db_id(b.donor_id())?,
            status: b.status().code(),
            available: b.available(),
            choose_date: b.choose_date(),
            registered_at: b.registered_at().unwrap_or_else(|| chrono::Local::now().naive_local()),
        })
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = book)]
#[diesel(treat_none_as_null = true)]
pub struct BookForm<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub category: &'a str,
    pub status: &'a str,
    pub available: bool,
    pub choose_date: Option<NaiveDate>,
    pub modified_at: Option<NaiveDateTime>,
}

impl <'a, 'b> BookForm<'a> where 'b: 'a {
    pub fn from(b: &'b Book) -> Self {
        Self {
            title: b.title(),
            author: b.author(),
            category: b.category(),
            status: b.status().code(),
            available: b.available(),
            choose_date: b.choose_date(),
            modified_at: Some(chrono::Local::now().naive_local()),
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = book_request)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RequestEntity {
    pub id: i64,
    pub book_id: i64,
    pub requester_id: i64,
    pub status: String,
    pub reason: String,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

impl RequestEntity {
    pub fn to_domain(&self) -> Result<DonationRequest, StoreError> {
        Ok(DonationRequest::exists(
            domain_id(self.id)?,
            domain_id(self.book_id)?,
            domain_id(self.requester_id)?,
            DonationStatus::try_from(self.status.as_str())?,
            self.reason.clone(),
            self.note.clone(),
            Some(self.created_at),
            self.updated_at,
        ))
    }
}

#[derive(Insertable)]
#[diesel(table_name = book_request)]
pub struct NewRequest<'a> {
    pub book_id: i64,
    pub requester_id: i64,
    pub status: &'a str,
    pub reason: &'a str,
    pub note: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

impl <'a, 'b> NewRequest<'a> where 'b: 'a {
    pub fn from(r: &'b DonationRequest) -> Result<Self, StoreError> {
        Ok(Self {
            book_id: db_id(r.book_id())?,
            requester_id: db_id(r.requester_id())?,
            status: r.status().code(),
            reason: r.reason(),
            note: r.note(),
            created_at: r.created_at().unwrap_or_else(|| chrono::Local::now().naive_local()),
        })
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = book_request)]
#[diesel(treat_none_as_null = true)]
pub struct RequestForm<'a> {
    pub status: &'a str,
    pub note: Option<&'a str>,
    pub updated_at: Option<NaiveDateTime>,
}

impl <'a, 'b> RequestForm<'a> where 'b: 'a {
    pub fn from(r: &'b DonationRequest) -> Self {
        Self {
            status: r.status().code(),
            note: r.note(),
            updated_at: Some(r.updated_at().unwrap_or_else(|| chrono::Local::now().naive_local())),
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl UserEntity {
    pub fn to_domain(&self) -> Result<User, StoreError> {
        let role = Role::try_from(self.role.as_str())?;
        Ok(User::new(domain_id(self.id)?, self.name.clone(), self.email.clone(), role))
    }
}

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

fn active_codes() -> Vec<&'static str> {
    DonationStatus::ACTIVE.iter().map(|s| s.code()).collect()
}

/// `LIKE` 특수 문자를 이스케이프한 부분 일치 패턴
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword.trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn filter_books<'a, ST>(mut query: book::BoxedQuery<'a, Pg, ST>, filter: &BookFilter) -> book::BoxedQuery<'a, Pg, ST> {
    if filter.listed_only {
        query = query
            .filter(book::available.eq(true))
            .filter(book::status.eq(BookStatus::Approved.code()));
    }
    match &filter.keyword {
        Some(BookKeyword::Title(text)) => query.filter(book::title.ilike(like_pattern(text))),
        Some(BookKeyword::Author(text)) => query.filter(book::author.ilike(like_pattern(text))),
        Some(BookKeyword::Any(text)) => {
            let pattern = like_pattern(text);
            query.filter(
                book::title.ilike(pattern.clone())
                    .or(book::author.ilike(pattern.clone()))
                    .or(book::category.ilike(pattern)),
            )
        }
        None => query,
    }
}

pub struct DonationPgStore {
    pool: Pool<ConnectionManager<PgConnection>>
}

impl DonationPgStore {
    pub fn new(pool: Pool<ConnectionManager<PgConnection>>) -> Self {
        Self { pool }
    }

    fn connection(&self) -> Result<PgPooledConnection, StoreError> {
        self.pool.get()
            .map_err(|e| StoreError::ConnectError(e.to_string()))
    }
}

impl DonationPgStore {

    pub fn find_book(&self, book_id: i64) -> Result<Option<BookEntity>, StoreError> {
        let mut connection = self.connection()?;
        let result = book::table
            .filter(book::id.eq(book_id))
            .select(BookEntity::as_select())
            .first(&mut connection)
            .optional()?;

        Ok(result)
    }

    /// 조건에 맞는 도서를 최근 등록순으로 조회하며 전체 개수를 함께 반환한다.
    pub fn find_books(&self, filter: &BookFilter, limit: i64, offset: i64) -> Result<(i64, Vec<BookEntity>), StoreError> {
        let mut connection = self.connection()?;
        let total = filter_books(book::table.select(diesel::dsl::count_star()).into_boxed(), filter)
            .get_result::<i64>(&mut connection)?;
        let results = filter_books(book::table.select(BookEntity::as_select()).into_boxed(), filter)
            .order_by((book::registered_at.desc(), book::id.desc()))
            .limit(limit)
            .offset(offset)
            .load(&mut connection)?;

        Ok((total, results))
    }

    pub fn find_newest_books(&self, limit: i64) -> Result<Vec<BookEntity>, StoreError> {
        let filter = BookFilter { keyword: None, listed_only: true };
        let mut connection = self.connection()?;
        let results = filter_books(book::table.select(BookEntity::as_select()).into_boxed(), &filter)
            .order_by((book::registered_at.desc(), book::id.desc()))
            .limit(limit)
            .load(&mut connection)?;

        Ok(results)
    }

    pub fn find_books_by_donor(&self, donor_id: i64) -> Result<Vec<BookEntity>, StoreError> {
        let mut connection = self.connection()?;
        let results = book::table
            .filter(book::donor_id.eq(donor_id))
            .order_by(book::id.desc())
            .select(BookEntity::as_select())
            .load(&mut connection)?;

        Ok(results)
    }

    pub fn insert_book(&self, b: &Book) -> Result<BookEntity, StoreError> {
        let mut connection = self.connection()?;
        let result = diesel::insert_into(book::table)
            .values(NewBookEntity::from(b)?)
            .returning(BookEntity::as_select())
            .get_result(&mut connection)?;

        Ok(result)
    }

    pub fn find_active_request(&self, book_id: i64, requester_id: i64) -> Result<Option<RequestEntity>, StoreError> {
        let mut connection = self.connection()?;
        let result = book_request::table
            .filter(book_request::book_id.eq(book_id))
            .filter(book_request::requester_id.eq(requester_id))
            .filter(book_request::status.eq_any(active_codes()))
            .select(RequestEntity::as_select())
            .first(&mut connection)
            .optional()?;

        Ok(result)
    }

    pub fn find_requests_by_book(&self, book_id: i64, only_active: bool) -> Result<Vec<RequestEntity>, StoreError> {
        let mut connection = self.connection()?;
        let mut query = book_request::table
            .filter(book_request::book_id.eq(book_id))
            .select(RequestEntity::as_select())
            .into_boxed();
        if only_active {
            query = query.filter(book_request::status.eq_any(active_codes()));
        }

        let results = query
            .order_by(book_request::id.asc())
            .load(&mut connection)?;

        Ok(results)
    }

    /// 요청자의 요청을 최신순으로 조회하며 전체 개수를 함께 반환한다.
    pub fn find_requests_by_user(&self, requester_id: i64, limit: i64, offset: i64) -> Result<(i64, Vec<RequestEntity>), StoreError> {
        let mut connection = self.connection()?;
        let total = book_request::table
            .filter(book_request::requester_id.eq(requester_id))
            .count()
            .get_result::<i64>(&mut connection)?;
        let results = book_request::table
            .filter(book_request::requester_id.eq(requester_id))
            .order_by((book_request::created_at.desc(), book_request::id.desc()))
            .limit(limit)
            .offset(offset)
            .select(RequestEntity::as_select())
            .load(&mut connection)?;

        Ok((total, results))
    }

    /// 도서 행을 잠근 상태에서 도서가 여전히 요청 가능한지 확인한 뒤 요청을 저장한다.
    pub fn insert_request(&self, r: &DonationRequest) -> Result<RequestEntity, StoreError> {
        let values = NewRequest::from(r)?;
        let mut connection = self.connection()?;

        connection.transaction::<_, StoreError, _>(|conn| {
            let locked = book::table
                .filter(book::id.eq(values.book_id))
                .select(BookEntity::as_select())
                .for_update()
                .first(conn)
                .optional()?;
            match locked {
                Some(entity) if entity.to_domain()?.is_requestable() => {}
                Some(entity) => {
                    return Err(StoreError::StaleState(format!("book {} is {} and cannot be requested", entity.id, entity.status)));
                }
                None => return Err(StoreError::StaleState(format!("book {} no longer exists", values.book_id))),
            }

            let result = diesel::insert_into(book_request::table)
                .values(&values)
                .returning(RequestEntity::as_select())
                .get_result(conn)?;
            Ok(result)
        })
    }

    /// 변경 묶음을 하나의 트랜잭션으로 반영한다.
    ///
    /// 모든 UPDATE/DELETE는 조회 시점의 상태를 조건으로 실행 되며, 영향 받은 행이 없으면
    /// 다른 요청이 먼저 상태를 바꾼 것이므로 트랜잭션 전체를 롤백한다.
    pub fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut connection = self.connection()?;

        connection.transaction::<_, StoreError, _>(|conn| {
            if let Some((book_id, expected)) = changes.expected_active_requests() {
                // 요청 저장과 같은 도서 행 잠금을 먼저 잡아 그 사이 새 요청이 끼어들지 못하게 한다.
                let locked = book::table
                    .filter(book::id.eq(db_id(book_id)?))
                    .select(book::id)
                    .for_update()
                    .first::<i64>(conn)
                    .optional()?;
                if locked.is_none() {
                    return Err(StoreError::StaleState(format!("book {} no longer exists", book_id)));
                }

                let mut active = book_request::table
                    .filter(book_request::book_id.eq(db_id(book_id)?))
                    .filter(book_request::status.eq_any(active_codes()))
                    .select(book_request::id)
                    .load::<i64>(conn)?
                    .into_iter()
                    .map(domain_id)
                    .collect::<Result<Vec<_>, _>>()?;
                active.sort_unstable();
                if active != expected {
                    return Err(StoreError::StaleState(format!("active requests of book {} have changed", book_id)));
                }
            }

            match changes.book() {
                Some(BookChange::Update { book: b, expected }) => {
                    let updated = diesel::update(book::table)
                        .filter(book::id.eq(db_id(b.id())?))
                        .filter(book::status.eq(expected.code()))
                        .set(BookForm::from(b))
                        .execute(conn)?;
                    if updated == 0 {
                        return Err(StoreError::StaleState(format!("book {} is no longer {}", b.id(), expected)));
                    }
                }
                Some(BookChange::Delete { id, expected }) => {
                    let deleted = diesel::delete(book::table)
                        .filter(book::id.eq(db_id(*id)?))
                        .filter(book::status.eq(expected.code()))
                        .execute(conn)?;
                    if deleted == 0 {
                        return Err(StoreError::StaleState(format!("book {} is no longer {}", id, expected)));
                    }
                }
                None => {}
            }

            for change in changes.requests() {
                let r = change.request();
                let updated = diesel::update(book_request::table)
                    .filter(book_request::id.eq(db_id(r.id())?))
                    .filter(book_request::status.eq(change.expected().code()))
                    .set(RequestForm::from(r))
                    .execute(conn)?;
                if updated == 0 {
                    return Err(StoreError::StaleState(format!("request {} is no longer {}", r.id(), change.expected())));
                }
            }

            Ok(())
        })
    }

    pub fn find_user(&self, user_id: i64) -> Result<Option<UserEntity>, StoreError> {
        let mut connection = self.connection()?;
        let result = users::table
            .filter(users::id.eq(user_id))
            .select(UserEntity::as_select())
            .first(&mut connection)
            .optional()?;

        Ok(result)
    }

    pub fn find_users(&self, user_ids: &[i64]) -> Result<Vec<UserEntity>, StoreError> {
        let mut connection = self.connection()?;
        let results = users::table
            .filter(users::id.eq_any(user_ids))
            .order_by(users::id.asc())
            .select(UserEntity::as_select())
            .load(&mut connection)?;

        Ok(results)
    }

    pub fn find_users_by_role(&self, role: &str) -> Result<Vec<UserEntity>, StoreError> {
        let mut connection = self.connection()?;
        let results = users::table
            .filter(users::role.eq(role))
            .order_by(users::id.asc())
            .select(UserEntity::as_select())
            .load(&mut connection)?;

        Ok(results)
    }
}
