use crate::{addon::WorkshopItem, maps::MapClassifier};
use anyhow::{Context, Result};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};
use thiserror::Error;

pub const APP_ID: &str = "220";
pub const UNKNOWN_TITLE: &str = "Unknown title";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const FILE_DETAILS_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=";
const STEAM_HOST: &str = "steamcommunity.com";
const COLLECTION_PAGE_MARKER: &str = "myworkshopfiles/?section=collections&appid=220";
const ADDON_PAGE_MARKER: &str = "myworkshopfiles/?appid=220";
const MAP_TAG_MARKER: &str = "https://steamcommunity.com/workshop/browse/?appid=220&browsesort=toprated&section=readytouseitems&requiredtags%5B%5D=maps";

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

selector!(COLLECTION_ITEM_SELECTOR, "div.collectionItem");
selector!(ITEM_TITLE_SELECTOR, "div.workshopItemTitle");
selector!(SCRIPT_SELECTOR, "script");
selector!(DETAILS_LINK_SELECTOR, "a[href]");
regex!(SCRIPT_ID_REGEX, r#""id":"(\d+)""#);
regex!(URL_ID_REGEX, r"id=(\d+)");
regex!(DETAILS_HREF_REGEX, r"filedetails.*id=(\d+)");
regex!(INSTALLED_ENTRY_REGEX, r#""(\d+)"\s+"1""#);

pub trait WorkshopResolver: Send + Sync {
    fn resolve_collection(&self, url: &str) -> Result<Vec<WorkshopItem>>;
    fn resolve_single(&self, url: &str) -> Result<Option<WorkshopItem>>;
    fn resolve_by_id(&self, id: &str) -> Result<Option<WorkshopItem>>;
    fn page_kind(&self, url: &str) -> Result<PageKind>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Collection,
    Addon,
    Unknown,
}

impl PageKind {
    pub fn label(self) -> &'static str {
        match self {
            PageKind::Collection => "collection",
            PageKind::Addon => "addon",
            PageKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("enter a workshop URL")]
    Empty,
    #[error("invalid URL: expected a steamcommunity.com link")]
    NotSteam,
    #[error("failed to determine the workshop page type")]
    UnknownPage,
    #[error("page is not a workshop {}", .expected.label())]
    WrongKind { expected: PageKind },
}

pub struct SteamWorkshop {
    agent: ureq::Agent,
}

impl Default for SteamWorkshop {
    fn default() -> Self {
        Self::new()
    }
}

impl SteamWorkshop {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self { agent }
    }

    // None on 404.
    fn fetch(&self, url: &str) -> Result<Option<String>> {
        let response = match self.agent.get(url).set("User-Agent", USER_AGENT).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("fetch {url}")),
        };
        let body = response
            .into_string()
            .with_context(|| format!("read {url}"))?;
        Ok(Some(body))
    }
}

impl WorkshopResolver for SteamWorkshop {
    fn resolve_collection(&self, url: &str) -> Result<Vec<WorkshopItem>> {
        tracing::info!(url, "fetching collection");
        let body = self
            .fetch(url)?
            .with_context(|| format!("collection not found: {url}"))?;
        let items = parse_collection_page(&body);
        tracing::info!(count = items.len(), "collection resolved");
        Ok(items)
    }

    fn resolve_single(&self, url: &str) -> Result<Option<WorkshopItem>> {
        let Some(id) = id_from_url(url) else {
            return Ok(None);
        };
        let Some(body) = self.fetch(url)? else {
            return Ok(None);
        };
        Ok(parse_item_title(&body).map(|title| WorkshopItem::new(id, title)))
    }

    fn resolve_by_id(&self, id: &str) -> Result<Option<WorkshopItem>> {
        self.resolve_single(&file_details_url(id))
    }

    fn page_kind(&self, url: &str) -> Result<PageKind> {
        Ok(self
            .fetch(url)?
            .map(|body| page_kind_of(&body))
            .unwrap_or(PageKind::Unknown))
    }
}

impl MapClassifier for SteamWorkshop {
    fn is_map(&self, addon_id: &str) -> bool {
        match self.fetch(&file_details_url(addon_id)) {
            Ok(Some(body)) => is_map_page(&body),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(addon_id, "map check failed: {err:#}");
                false
            }
        }
    }
}

pub fn file_details_url(id: &str) -> String {
    format!("{FILE_DETAILS_URL}{id}")
}

pub fn id_from_url(url: &str) -> Option<String> {
    URL_ID_REGEX
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

pub fn parse_collection_page(html: &str) -> Vec<WorkshopItem> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for element in document.select(&COLLECTION_ITEM_SELECTOR) {
        let script_id = element
            .select(&SCRIPT_SELECTOR)
            .map(|script| script.text().collect::<String>())
            .find_map(|script| {
                SCRIPT_ID_REGEX
                    .captures(&script)
                    .and_then(|caps| caps.get(1))
                    .map(|id| id.as_str().to_string())
            });
        let id = script_id.or_else(|| {
            element
                .select(&DETAILS_LINK_SELECTOR)
                .filter_map(|link| link.value().attr("href"))
                .find_map(|href| {
                    DETAILS_HREF_REGEX
                        .captures(href)
                        .and_then(|caps| caps.get(1))
                        .map(|id| id.as_str().to_string())
                })
        });
        let Some(id) = id else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        let title = element
            .select(&ITEM_TITLE_SELECTOR)
            .next()
            .map(|title| title.text().collect::<String>().trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
        items.push(WorkshopItem::new(id, title));
    }

    items
}

pub fn parse_item_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = document
        .select(&ITEM_TITLE_SELECTOR)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if title.is_empty() {
        Some(UNKNOWN_TITLE.to_string())
    } else {
        Some(title)
    }
}

pub fn page_kind_of(html: &str) -> PageKind {
    if html.contains(COLLECTION_PAGE_MARKER) {
        PageKind::Collection
    } else if html.contains(ADDON_PAGE_MARKER) {
        PageKind::Addon
    } else {
        PageKind::Unknown
    }
}

pub fn is_map_page(html: &str) -> bool {
    html.contains(MAP_TAG_MARKER)
}

pub fn validate_url(
    resolver: &dyn WorkshopResolver,
    url: &str,
    expected: PageKind,
) -> std::result::Result<(), UrlError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(UrlError::Empty);
    }
    if !url.contains(STEAM_HOST) {
        return Err(UrlError::NotSteam);
    }
    let kind = resolver.page_kind(url).unwrap_or_else(|err| {
        tracing::warn!("page type check failed: {err:#}");
        PageKind::Unknown
    });
    match kind {
        PageKind::Unknown => Err(UrlError::UnknownPage),
        kind if kind != expected => Err(UrlError::WrongKind { expected }),
        _ => Ok(()),
    }
}

pub fn workshop_txt_path(hl2_root: &Path) -> PathBuf {
    hl2_root.join("hl2_complete").join("cfg").join("workshop.txt")
}

pub fn read_installed_ids(hl2_root: &Path) -> Result<Vec<String>> {
    let path = workshop_txt_path(hl2_root);
    if !path.exists() {
        anyhow::bail!("workshop.txt not found at {}", path.display());
    }
    let content = fs::read_to_string(&path).context("read workshop.txt")?;
    let ids = parse_installed_ids(&content);
    if ids.is_empty() {
        anyhow::bail!("no installed addons found in {}", path.display());
    }
    tracing::info!(count = ids.len(), "read installed addons from workshop.txt");
    Ok(ids)
}

pub fn parse_installed_ids(content: &str) -> Vec<String> {
    INSTALLED_ENTRY_REGEX
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
        .collect()
}
