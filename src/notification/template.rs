use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// `{Book.Title}` 형태의 치환자
const PLACEHOLDER_PATTERN: &str = r"\{([A-Z][A-Za-z]*\.[A-Z][A-Za-z]*)\}";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("cannot read template {0}: {1}")]
    ReadFailed(String, String),

    /// 템플릿에 있는 치환자의 값이 전달 되지 않음
    #[error("missing template variable: {0}")]
    MissingVariable(String),
}

/// 메일 템플릿 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    BookRequested,
    BookDonated,
}

impl TemplateKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            TemplateKind::BookRequested => "BookRequestedTemplate.html",
            TemplateKind::BookDonated => "BookDonatedTemplate.html",
        }
    }
}

/// 치환자 이름 - 값
pub type Variables = HashMap<&'static str, String>;

/// 메일 템플릿 묶음
///
/// # Example
/// ```
/// use std::collections::HashMap;
/// use book_donation_rust::notification::template::{TemplateKind, Templates, Variables};
///
/// let templates = Templates::from_sources(HashMap::from([
///     (TemplateKind::BookDonated, "<b>{User.Name}</b> got {Book.Title}".to_owned()),
/// ]));
/// let vars = Variables::from([("User.Name", "Ana & Bia".to_owned()), ("Book.Title", "Iracema".to_owned())]);
///
/// let html = templates.render(TemplateKind::BookDonated, &vars).unwrap();
/// assert_eq!(html, "<b>Ana &amp; Bia</b> got Iracema");
/// ```
#[derive(Debug, Clone)]
pub struct Templates {
    pattern: Regex,
    sources: HashMap<TemplateKind, String>,
}

impl Templates {

    /// 디렉토리에서 모든 종류의 템플릿 파일을 읽는다.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        let mut sources = HashMap::new();
        for kind in [TemplateKind::BookRequested, TemplateKind::BookDonated] {
            let path = dir.join(kind.file_name());
            let source = fs::read_to_string(&path)
                .map_err(|e| TemplateError::ReadFailed(path.display().to_string(), e.to_string()))?;
            sources.insert(kind, source);
        }
        Ok(Self::from_sources(sources))
    }

    pub fn from_sources(sources: HashMap<TemplateKind, String>) -> Self {
        Self {
            pattern: Regex::new(PLACEHOLDER_PATTERN).unwrap(),
            sources,
        }
    }

    /// 템플릿의 치환자를 HTML 이스케이프된 값으로 바꾼다.
    /// 치환자 형태가 아닌 중괄호(스타일 시트 등)는 그대로 둔다.
    pub fn render(&self, kind: TemplateKind, vars: &Variables) -> Result<String, TemplateError> {
        let source = self.sources.get(&kind)
            .ok_or_else(|| TemplateError::NotFound(kind.file_name().to_owned()))?;

        let mut rendered = String::with_capacity(source.len());
        let mut last = 0;
        for captures in self.pattern.captures_iter(source) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let value = vars.get(name.as_str())
                .ok_or_else(|| TemplateError::MissingVariable(name.as_str().to_owned()))?;

            rendered.push_str(&source[last..whole.start()]);
            rendered.push_str(&html_escape::encode_text(value));
            last = whole.end();
        }
        rendered.push_str(&source[last..]);

        Ok(rendered)
    }
}
