use std::cell::{Cell, RefCell};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::CheckwikiConfig;
use crate::process::{ErrorTracker, PageStore};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 350;
const MIN_REQUEST_SPACING_MS: u64 = 100;

static NOBOTS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{nobots\}\}").expect("nobots pattern"));
static BOTS_DENY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{bots[^{}]*\|\s*deny\s*=\s*([^{}|]*)").expect("deny pattern"));
static BOTS_ALLOW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\{\{bots[^{}]*\|\s*allow\s*=\s*([^{}|]*)").expect("allow pattern")
});
static PRE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<pre>(.*)</pre>").expect("pre pattern"));

struct HttpClient {
    client: Client,
    user_agent: String,
    retries: usize,
    retry_delay_ms: u64,
    last_request_at: Cell<Option<Instant>>,
}

impl HttpClient {
    fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            retries: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            last_request_at: Cell::new(None),
        })
    }

    fn pace(&self) {
        if let Some(last) = self.last_request_at.get() {
            let spacing = Duration::from_millis(MIN_REQUEST_SPACING_MS);
            let elapsed = last.elapsed();
            if elapsed < spacing {
                sleep(spacing - elapsed);
            }
        }
    }

    fn request_text(&self, url: &str, params: &[(&str, String)]) -> Result<String> {
        let mut last_error = None::<String>;
        for attempt in 0..=self.retries {
            self.pace();
            let response = self
                .client
                .get(url)
                .header("User-Agent", self.user_agent.clone())
                .query(params)
                .send();
            self.last_request_at.set(Some(Instant::now()));

            match response {
                Ok(response) if response.status().is_success() => {
                    return response.text().context("failed to read response body");
                }
                Ok(response) => last_error = Some(format!("HTTP {}", response.status())),
                Err(error) => last_error = Some(error.to_string()),
            }
            if attempt < self.retries {
                sleep(Duration::from_millis(
                    self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                ));
            }
        }
        bail!(last_error.unwrap_or_else(|| "request failed".to_string()))
    }

    fn api_json(&self, api_url: &str, params: &[(&str, String)]) -> Result<Value> {
        let payload = self.api_call(api_url, params, false)?;
        check_api_error(&payload)?;
        Ok(payload)
    }

    fn api_post(&self, api_url: &str, params: &[(&str, String)]) -> Result<Value> {
        let payload = self.api_call(api_url, params, true)?;
        check_api_error(&payload)?;
        Ok(payload)
    }

    fn api_call(&self, api_url: &str, params: &[(&str, String)], post: bool) -> Result<Value> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format", "json".to_string()));
        pairs.push(("formatversion", "2".to_string()));
        for (key, value) in params {
            if !value.trim().is_empty() {
                pairs.push((*key, value.clone()));
            }
        }

        let mut last_error = None::<String>;
        for attempt in 0..=self.retries {
            self.pace();
            let request = if post {
                self.client.post(api_url).form(&pairs)
            } else {
                self.client.get(api_url).query(&pairs)
            };
            let response = request
                .header("User-Agent", self.user_agent.clone())
                .send();
            self.last_request_at.set(Some(Instant::now()));

            match response {
                Ok(response) if response.status().is_success() => {
                    return response.json().context("failed to decode API JSON response");
                }
                Ok(response) => last_error = Some(format!("HTTP {}", response.status())),
                Err(error) => last_error = Some(error.to_string()),
            }
            if attempt < self.retries {
                sleep(Duration::from_millis(
                    self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                ));
            }
        }
        bail!(last_error.unwrap_or_else(|| "API request failed".to_string()))
    }
}

fn check_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("api error [{code}]: {info}");
    }
    Ok(())
}

/// Extracts the main-slot wikitext from an `action=query` revisions payload.
/// `None` means the page does not exist.
pub(crate) fn extract_page_content(payload: &Value) -> Result<Option<String>> {
    let page = payload
        .get("query")
        .and_then(|value| value.get("pages"))
        .and_then(Value::as_array)
        .and_then(|pages| pages.first())
        .ok_or_else(|| anyhow!("invalid MediaWiki response shape"))?;

    if page.get("missing").is_some() {
        return Ok(None);
    }

    let content = page
        .get("revisions")
        .and_then(Value::as_array)
        .and_then(|revisions| revisions.first())
        .and_then(|revision| revision.get("slots"))
        .and_then(|slots| slots.get("main"))
        .and_then(|main| main.get("content"))
        .and_then(Value::as_str);
    Ok(content.map(ToString::to_string))
}

/// Bot exclusion check over page text: `{{nobots}}` and `{{bots|deny=...}}`
/// forbid edits, `{{bots|allow=...}}` restricts them to the listed accounts.
pub(crate) fn bot_may_edit(text: &str, username: Option<&str>) -> bool {
    if NOBOTS_MARKER.is_match(text) {
        return false;
    }
    for caps in BOTS_DENY.captures_iter(text) {
        let list = caps[1].trim();
        if list.eq_ignore_ascii_case("all") {
            return false;
        }
        if let Some(user) = username
            && list
                .split(',')
                .any(|name| name.trim().eq_ignore_ascii_case(user))
        {
            return false;
        }
    }
    for caps in BOTS_ALLOW.captures_iter(text) {
        let list = caps[1].trim();
        if list.eq_ignore_ascii_case("all") {
            continue;
        }
        if list.eq_ignore_ascii_case("none") {
            return false;
        }
        let allowed = username.is_some_and(|user| {
            list.split(',')
                .any(|name| name.trim().eq_ignore_ascii_case(user))
        });
        if !allowed {
            return false;
        }
    }
    true
}

/// Page store backed by the MediaWiki action API.
pub struct MediaWikiStore {
    http: HttpClient,
    api_url: String,
    bot_user: Option<String>,
    csrf_token: RefCell<Option<String>>,
    // one page is read up to three times per run (exists, can_edit, load)
    page_cache: RefCell<Option<(String, Option<String>)>>,
}

impl MediaWikiStore {
    pub fn new(config: &CheckwikiConfig) -> Result<Self> {
        let api_url = config
            .api_url()
            .ok_or_else(|| anyhow!("wiki.api_url is not configured"))?;
        Ok(Self {
            http: HttpClient::new(&config.user_agent())?,
            api_url,
            bot_user: None,
            csrf_token: RefCell::new(None),
            page_cache: RefCell::new(None),
        })
    }

    /// Logs in with a bot password. Required before [`PageStore::save`] on
    /// wikis that do not allow anonymous edits.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let payload = self.http.api_json(
            &self.api_url,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
        )?;
        let login_token = payload
            .get("query")
            .and_then(|value| value.get("tokens"))
            .and_then(|tokens| tokens.get("logintoken"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing login token"))?
            .to_string();

        let payload = self.http.api_post(
            &self.api_url,
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
        )?;
        let result = payload
            .get("login")
            .and_then(|login| login.get("result"))
            .and_then(Value::as_str)
            .unwrap_or("Failed");
        if result != "Success" {
            bail!("login failed: {result}");
        }

        self.bot_user = Some(username.to_string());
        Ok(())
    }

    fn fetch_page(&self, title: &str) -> Result<Option<String>> {
        if let Some((cached_title, content)) = self.page_cache.borrow().as_ref()
            && cached_title == title
        {
            return Ok(content.clone());
        }

        let payload = self.http.api_json(
            &self.api_url,
            &[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content".to_string()),
                ("rvslots", "main".to_string()),
            ],
        )?;
        let content = extract_page_content(&payload)?;
        *self.page_cache.borrow_mut() = Some((title.to_string(), content.clone()));
        Ok(content)
    }

    fn csrf_token(&self) -> Result<String> {
        if let Some(token) = self.csrf_token.borrow().as_ref() {
            return Ok(token.clone());
        }
        let payload = self.http.api_json(
            &self.api_url,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "csrf".to_string()),
            ],
        )?;
        let token = payload
            .get("query")
            .and_then(|value| value.get("tokens"))
            .and_then(|tokens| tokens.get("csrftoken"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing csrf token"))?
            .to_string();
        *self.csrf_token.borrow_mut() = Some(token.clone());
        Ok(token)
    }
}

impl PageStore for MediaWikiStore {
    fn exists(&self, title: &str) -> Result<bool> {
        Ok(self.fetch_page(title)?.is_some())
    }

    fn can_edit(&self, title: &str) -> Result<bool> {
        match self.fetch_page(title)? {
            Some(text) => Ok(bot_may_edit(&text, self.bot_user.as_deref())),
            None => Ok(false),
        }
    }

    fn load(&self, title: &str) -> Result<String> {
        self.fetch_page(title)?
            .ok_or_else(|| anyhow!("page does not exist: {title}"))
    }

    fn save(&self, title: &str, text: &str, summary: &str) -> Result<()> {
        let token = self.csrf_token()?;
        let payload = self.http.api_post(
            &self.api_url,
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", text.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
        )?;
        let result = payload
            .get("edit")
            .and_then(|edit| edit.get("result"))
            .and_then(Value::as_str)
            .unwrap_or("Failure");
        if result != "Success" {
            bail!("edit rejected: {result}");
        }
        // the stored copy changed; do not serve the stale one
        *self.page_cache.borrow_mut() = None;
        Ok(())
    }
}

/// Parses the tracker's `view=bots` response body into a title list. The
/// service banner check rejects error pages served with HTTP 200.
pub(crate) fn parse_title_list(body: &str) -> Vec<String> {
    if !body.contains("Check Wikipedia") {
        return Vec::new();
    }
    let Some(caps) = PRE_BLOCK.captures(body) else {
        return Vec::new();
    };
    caps[1]
        .trim()
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Error-tracking collaborator speaking the CheckWiki CGI protocol.
pub struct CheckWikiTracker {
    http: HttpClient,
    base_url: String,
    project: String,
}

impl CheckWikiTracker {
    pub fn new(config: &CheckwikiConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(&config.user_agent())?,
            base_url: config.tracker_url(),
            project: config.project(),
        })
    }
}

impl ErrorTracker for CheckWikiTracker {
    fn list_titles(&self, defect_id: &str, offset: usize) -> Result<Vec<String>> {
        let body = self.http.request_text(
            &self.base_url,
            &[
                ("project", self.project.clone()),
                ("view", "bots".to_string()),
                ("id", defect_id.to_string()),
                ("offset", offset.to_string()),
            ],
        )?;
        Ok(parse_title_list(&body))
    }

    fn mark_resolved(&self, defect_id: &str, title: &str) -> Result<()> {
        // id 0 covers the uncounted minor passes; nothing to report upstream
        if defect_id == "0" {
            return Ok(());
        }
        self.http.request_text(
            &self.base_url,
            &[
                ("project", self.project.clone()),
                ("view", "detail".to_string()),
                ("id", defect_id.to_string()),
                ("title", title.to_string()),
            ],
        )?;
        Ok(())
    }
}
