use crate::donation::repo::DbPool;
use crate::donation::StoreError;
use diesel::r2d2::ConnectionManager;
use diesel::PgConnection;
use r2d2::Pool;
use serde::Deserialize;
use std::env;

mod logging;

pub use logging::{LogGuard, LoggingError};

/// 템플릿 디렉토리가 설정 되지 않았을 때 사용할 경로
const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// 메일 릴레이 설정
#[derive(Debug, Deserialize)]
pub struct MailConfig {
    endpoint: String,
    sender_name: String,
    sender_address: String,
    api_key: Option<String>,
    timeout_seconds: Option<u64>,
}

impl MailConfig {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    mail: MailConfig,
    template_dir: Option<String>,
}

impl AppConfig {
    pub fn mail(&self) -> &MailConfig {
        &self.mail
    }

    pub fn template_dir(&self) -> &str {
        self.template_dir.as_deref().unwrap_or(DEFAULT_TEMPLATE_DIR)
    }
}

/// 실행 환경에 따라 .env 파일을 로드한다.
pub fn load_dotenv() {
    let env_filename = env::var("RUN_MODE")
        .map(|env| format!(".env.{}", env))
        .unwrap_or_else(|_| ".env".into());

    dotenvy::from_filename(env_filename).ok();
}

/// 실행 환경에 맞는 `config/{RUN_MODE}.json` 파일을 읽는다.
///
/// `DONATION_` 접두사를 가진 환경 변수로 파일의 값을 덮어 쓸 수 있다. (예: `DONATION_MAIL__API_KEY`)
pub fn load_app_config() -> Result<AppConfig, config::ConfigError> {
    let env = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
    let config = config::Config::builder()
        .add_source(config::File::with_name(&format!("config/{}.json", env)))
        .add_source(config::Environment::with_prefix("DONATION").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// 데이터베이스 연결 풀을 생성한다.
pub fn connect_to_postgres() -> Result<DbPool, StoreError> {
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| StoreError::ConnectError("DATABASE_URL must be set".to_owned()))?;
    let manager = ConnectionManager::<PgConnection>::new(database_url);

    Pool::builder()
        .test_on_check_out(true)
        .build(manager)
        .map_err(|e| StoreError::ConnectError(format!("Could not build connection pool: {}", e)))
}

/// 프로그램에서 사용할 로깅 옵션을 설정한다.
///
/// `LOGGER_DIR`, `LOGGER_FILE_NAME`이 설정 되지 않으면 파일 없이 표준 에러에만 로그를 남긴다.
pub fn set_global_logging_config() -> Result<LogGuard, LoggingError> {
    let level = env::var("LOGGER_LEVEL").ok();

    let (dir, name) = match (env::var("LOGGER_DIR"), env::var("LOGGER_FILE_NAME")) {
        (Ok(dir), Ok(name)) => (dir, name),
        _ => return logging::set_console_logging_config(level.as_deref()),
    };

    let keep = env::var("LOGGER_KEEP")
        .ok()
        .map(|v| v.parse::<usize>().map_err(|e| LoggingError::InvalidOption(format!("LOGGER_KEEP: {}", e))))
        .transpose()?;
    let rotation = env::var("LOGGER_ROTATION").ok();

    let options = logging::Config {
        dir,
        name,
        keep,
        level,
        rotation,
    };

    logging::set_global_logging_config(&options)
}
