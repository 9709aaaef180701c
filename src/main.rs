use book_donation_rust::configs::{connect_to_postgres, load_app_config, load_dotenv, set_global_logging_config};
use book_donation_rust::donation::auth::{ensure_permission, Permission};
use book_donation_rust::donation::service::DonationService;
use book_donation_rust::donation::{
    BookId, BookKeyword, BookUpdate, DonationError, NewBook, PageRequest, StoreError, UserId,
};
use book_donation_rust::notification::NotificationError;
use book_donation_rust::{create_authorization, create_donation_service, create_user_repository};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::process::ExitCode;
use tracing::{error, info};

/// 도서 나눔 관리 도구
#[derive(Debug, Parser)]
#[command(name = "book-donation", version, about)]
struct Cli {
    /// 명령을 실행하는 사용자 아이디
    #[arg(long)]
    caller: UserId,

    #[command(subcommand)]
    command: Command,
}

/// 도서 검색어. 하나만 지정할 수 있다.
#[derive(Debug, Args)]
#[group(multiple = false)]
struct KeywordArgs {
    /// 제목 일부
    #[arg(long)]
    title: Option<String>,
    /// 저자 일부
    #[arg(long)]
    author: Option<String>,
    /// 제목, 저자, 분류 중 하나에 포함된 문자열
    #[arg(long)]
    text: Option<String>,
}

impl KeywordArgs {
    fn into_keyword(self) -> Option<BookKeyword> {
        self.title.map(BookKeyword::Title)
            .or(self.author.map(BookKeyword::Author))
            .or(self.text.map(BookKeyword::Any))
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 나눔할 도서를 등록한다
    Register {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long, default_value = "")]
        category: String,
    },

    /// 도서를 요청한다
    Request {
        book_id: BookId,
        #[arg(long)]
        reason: String,
    },

    /// 선택일(YYYY-MM-DD)을 지정해 도서를 승인한다
    Approve {
        book_id: BookId,
        #[arg(long)]
        date: NaiveDate,
    },

    /// 승인된 도서를 요청자 중 한명에게 나눔한다
    Donate {
        book_id: BookId,
        #[arg(long)]
        grantee: UserId,
        #[arg(long, default_value = "")]
        note: String,
    },

    /// 사용자의 도서 요청을 거절한다
    Reject {
        book_id: BookId,
        #[arg(long)]
        requester: UserId,
        #[arg(long)]
        note: Option<String>,
    },

    /// 자신의 도서 요청을 취소한다
    Cancel {
        book_id: BookId,
    },

    /// 도서를 삭제한다
    Delete {
        book_id: BookId,
    },

    /// 나눔이 끝난 도서를 종료한다
    Close {
        book_id: BookId,
    },

    /// 도서 정보를 수정한다
    Update {
        book_id: BookId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },

    /// 도서를 조회한다
    Show {
        book_id: BookId,
    },

    /// 모든 도서를 최근 등록순으로 조회한다
    Books {
        #[command(flatten)]
        keyword: KeywordArgs,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 15)]
        items: u32,
    },

    /// 나눔 받을 수 있는 도서를 검색한다
    Search {
        #[command(flatten)]
        keyword: KeywordArgs,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 15)]
        items: u32,
    },

    /// 최근 등록된 나눔 도서
    Newest,

    /// 자신의 요청을 최신순으로 조회한다
    #[command(name = "my-requests")]
    MyRequests {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 15)]
        items: u32,
    },

    /// 도서에 활성 요청을 가진 사용자 목록
    Grantees {
        book_id: BookId,
    },

    /// 자신이 도서에 활성 요청을 가지고 있는지 확인한다
    Requested {
        book_id: BookId,
    },

    /// 자신이 등록한 도서 목록
    #[command(name = "my-donations")]
    MyDonations,
}

impl Command {
    fn required_permission(&self) -> Option<Permission> {
        match self {
            Command::Approve { .. } | Command::Reject { .. } | Command::Delete { .. } | Command::Update { .. } => {
                Some(Permission::ApproveBook)
            }
            Command::Donate { .. } | Command::Close { .. } | Command::Grantees { .. } | Command::Books { .. } => {
                Some(Permission::DonateBook)
            }
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    Donation(#[from] DonationError),

    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Donation(DonationError::Store(_)) => ExitCode::FAILURE,
            CliError::Donation(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

fn main() -> ExitCode {
    load_dotenv();
    let cli = Cli::parse();

    let _guard = match set_global_logging_config() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_app_config()?;
    let connection = connect_to_postgres()?;
    let users = create_user_repository(connection.clone());

    if let Some(permission) = cli.command.required_permission() {
        let authorization = create_authorization(users.clone());
        ensure_permission(&authorization, cli.caller, permission)?;
    }

    let service = create_donation_service(connection, users, &config)?;
    info!(caller = cli.caller, command = ?cli.command, "명령을 실행합니다.");
    execute(&service, cli.caller, cli.command)
}

fn execute(service: &DonationService, caller: UserId, command: Command) -> Result<(), CliError> {
    match command {
        Command::Register { title, author, category } => {
            print(&service.register_book(caller, NewBook { title, author, category })?)
        }
        Command::Request { book_id, reason } => {
            print(&service.request_book(book_id, caller, &reason)?)
        }
        Command::Approve { book_id, date } => {
            print(&service.approve_book(book_id, date)?)
        }
        Command::Donate { book_id, grantee, note } => {
            service.donate_book(book_id, grantee, &note)?;
            print(&json!({ "book_id": book_id, "grantee": grantee }))
        }
        Command::Reject { book_id, requester, note } => {
            print(&service.reject_request(book_id, requester, note.as_deref())?)
        }
        Command::Cancel { book_id } => {
            print(&service.cancel_request(book_id, caller)?)
        }
        Command::Delete { book_id } => {
            service.delete_book(book_id)?;
            print(&json!({ "deleted": book_id }))
        }
        Command::Close { book_id } => {
            print(&service.close_book(book_id)?)
        }
        Command::Update { book_id, title, author, category } => {
            print(&service.update_book(book_id, BookUpdate { title, author, category })?)
        }
        Command::Show { book_id } => {
            print(&service.find_book(book_id)?)
        }
        Command::Books { keyword, page, items } => {
            let page = PageRequest::new(page, items)?;
            print(&service.list_books(keyword.into_keyword(), &page)?)
        }
        Command::Search { keyword, page, items } => {
            let page = PageRequest::new(page, items)?;
            let keyword = keyword.into_keyword()
                .ok_or_else(|| DonationError::InvalidArgument("one of --title, --author or --text".to_owned()))?;
            print(&service.search_books(keyword, &page)?)
        }
        Command::Newest => {
            print(&service.newest_books()?)
        }
        Command::MyRequests { page, items } => {
            let page = PageRequest::new(page, items)?;
            print(&service.requests_of(caller, &page)?)
        }
        Command::Grantees { book_id } => {
            print(&service.grantee_candidates(book_id)?)
        }
        Command::Requested { book_id } => {
            let requested = service.has_requested(book_id, caller)?;
            print(&json!({ "book_id": book_id, "requested": requested }))
        }
        Command::MyDonations => {
            print(&service.donations_of(caller)?)
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
