use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid logging option: {0}")]
    InvalidOption(String),

    #[error("cannot create log file appender: {0}")]
    AppenderFailed(String),

    #[error("global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// 파일 로그가 모두 기록 될 때까지 유지해야 하는 가드
///
/// 이 값이 drop 되면 버퍼에 남은 로그를 파일에 기록하고 백그라운드 작업을 종료한다.
#[must_use]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

pub struct Config {
    pub dir: String,
    pub name: String,

    /// 최대 로그 파일 개수로 로그 파일이 설정한 개수보다 커질 경우 기존의 로그파일들은 삭제 된다.
    /// 설정 되지 않을 시 로그 파일은 삭제 되지 않는다.
    pub keep: Option<usize>,

    /// 파일과 표준 에러에 출력할 로그의 레벨로 지정된 로그 레벨 이상만 로깅된다.
    /// 설정하지 않을시 기본값은 DEBUG로 설정 된다.
    ///
    /// 이 값은 [`tracing::Level`]로 변환 됨으로 자세한 사항은 해당 파일을 확인
    pub level: Option<String>,

    /// 로깅 파일이 분리 되는 기간으로 .log 파일 하나 당 설정된 기간 동안 로그가 기록 된다.
    /// 설정 되지 않을시 기본값은 DAILY로 설정된다.
    ///
    /// 이 값은 [`rolling::Rotation`]으로 변환 됨으로 자세한 사항은 해당 파일을 확인
    pub rotation: Option<String>,
}

pub fn set_global_logging_config(c: &Config) -> Result<LogGuard, LoggingError> {
    let rotation = c.rotation.as_deref()
        .map(parse_rotation)
        .transpose()?
        .unwrap_or(rolling::Rotation::DAILY);
    let level = c.level.as_deref()
        .map(parse_level)
        .transpose()?
        .unwrap_or(tracing::Level::DEBUG);

    let mut file_appender = rolling::RollingFileAppender::builder()
        .filename_prefix(c.name.clone())
        .filename_suffix("log")
        .rotation(rotation);

    if let Some(keep) = c.keep {
        file_appender = file_appender.max_log_files(keep);
    }

    let file_appender = file_appender.build(c.dir.clone())
        .map_err(|e| LoggingError::AppenderFailed(e.to_string()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let writer = std::io::stderr.and(non_blocking);

    tracing_subscriber::fmt()
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_timer(LocalTime::new(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]")))
        .with_writer(writer)
        .with_max_level(level)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LogGuard { _worker: Some(guard) })
}

/// 로그 파일 설정이 없을 때 표준 에러로만 JSON 로그를 남긴다. 표준 출력은 명령 결과에 사용한다.
pub fn set_console_logging_config(level: Option<&str>) -> Result<LogGuard, LoggingError> {
    let level = level
        .map(parse_level)
        .transpose()?
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .json()
        .with_timer(LocalTime::new(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]")))
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LogGuard { _worker: None })
}

fn parse_rotation(s: &str) -> Result<rolling::Rotation, LoggingError> {
    match s {
        "DAILY" => Ok(rolling::Rotation::DAILY),
        "HOURLY" => Ok(rolling::Rotation::HOURLY),
        "MINUTELY" => Ok(rolling::Rotation::MINUTELY),
        "NEVER" => Ok(rolling::Rotation::NEVER),
        _ => Err(LoggingError::InvalidOption(
            format!("로깅 파일 로테이션(rotation)은 \"DAILY\", \"HOURLY\", \"MINUTELY\", \"NEVER\"만 가능 합니다. (입력 값: {})", s),
        )),
    }
}

fn parse_level(l: &str) -> Result<tracing::Level, LoggingError> {
    match l {
        "TRACE" => Ok(tracing::Level::TRACE),
        "DEBUG" => Ok(tracing::Level::DEBUG),
        "INFO" => Ok(tracing::Level::INFO),
        "WARN" => Ok(tracing::Level::WARN),
        "ERROR" => Ok(tracing::Level::ERROR),
        _ => Err(LoggingError::InvalidOption(
            format!("로그 레벨(level)은 \"TRACE\", \"DEBUG\", \"INFO\", \"WARN\", \"ERROR\"만 가능 합니다. (입력 값: {})", l),
        )),
    }
}
