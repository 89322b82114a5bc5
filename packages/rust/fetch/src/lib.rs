//! Network side of item normalization.
//!
//! This crate provides:
//! - [`client`]: HTTP client with browser profiles, bot-protection detection and downloads
//! - [`extract`]: Main-content extraction chain for arbitrary web pages
//! - [`wikipedia`]: Encyclopedia reference parsing and article fetching

pub mod client;
pub mod extract;
pub mod wikipedia;

pub use client::{
    BROWSER_PROFILES, BrowserProfile, DownloadedFile, FetchClient, FetchedPage, detect_challenge,
    url_hash,
};
pub use extract::{
    ArticleSelectorsStrategy, BodyStrategy, ExtractedContent, ExtractionChain, ExtractionStrategy,
    ParagraphsStrategy, ReadabilityStrategy,
};
pub use wikipedia::{WIKIPEDIA_LICENSE, WikiArticle, WikiRef, WikipediaClient};
