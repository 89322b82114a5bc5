//! Encyclopedia article client.
//!
//! References are article URLs (`/wiki/Title`), permanent links
//! (`index.php?title=Title&oldid=123`) or bare titles. Article HTML comes from
//! the MediaWiki action API (`action=parse`), which also reports the revision
//! id used for the citation.

use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use bindery_shared::ItemError;

use crate::client::FetchClient;

/// License note attached to encyclopedia citations.
pub const WIKIPEDIA_LICENSE: &str = "CC BY-SA 4.0";

const DEFAULT_LANG: &str = "en";

/// A parsed encyclopedia reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiRef {
    /// Language subdomain (`en`, `de`, …).
    pub lang: String,
    /// Canonical title with spaces, not underscores.
    pub title: String,
    /// Fixed revision, if the reference pins one.
    pub oldid: Option<u64>,
}

impl WikiRef {
    /// Parse an article URL, a permanent link, or a bare title.
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }

        let url = match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                return Some(Self {
                    lang: DEFAULT_LANG.into(),
                    title: canonical_title(reference),
                    oldid: None,
                });
            }
        };

        let lang = url
            .host_str()
            .filter(|h| h.ends_with("wikipedia.org"))
            .and_then(|h| h.split('.').next())
            .filter(|l| *l != "www" && *l != "wikipedia")
            .unwrap_or(DEFAULT_LANG)
            .to_string();

        let mut title = None;
        let mut oldid = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "title" => title = Some(value.into_owned()),
                "oldid" => oldid = value.parse().ok(),
                _ => {}
            }
        }

        if title.is_none() {
            if let Some(rest) = url.path().strip_prefix("/wiki/") {
                title = Some(decode_path_segment(rest));
            }
        }

        let title = canonical_title(&title?);
        (!title.is_empty()).then_some(Self { lang, title, oldid })
    }

    /// Public article URL for citations, pinned to `revid` when known.
    pub fn citation_url(&self, revid: Option<u64>) -> String {
        let slug = self.title.replace(' ', "_");
        match revid.or(self.oldid) {
            Some(rev) => {
                let title: String = url::form_urlencoded::byte_serialize(slug.as_bytes()).collect();
                format!(
                    "https://{}.wikipedia.org/w/index.php?title={title}&oldid={rev}",
                    self.lang
                )
            }
            None => format!("https://{}.wikipedia.org/wiki/{}", self.lang, slug),
        }
    }
}

fn canonical_title(raw: &str) -> String {
    raw.replace('_', " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Percent-decode a path segment; `+` stays literal in paths.
fn decode_path_segment(segment: &str) -> String {
    let escaped = segment.replace('+', "%2B");
    url::form_urlencoded::parse(format!("t={escaped}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| segment.to_string())
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

/// Article HTML and revision as returned by the API.
#[derive(Debug, Clone)]
pub struct WikiArticle {
    pub title: String,
    pub revid: Option<u64>,
    pub html: String,
    /// Citation URL pinned to the fetched revision.
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: Option<ParseBody>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ParseBody {
    title: String,
    #[serde(default)]
    revid: Option<u64>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

/// Fetches article HTML from a MediaWiki action API.
#[derive(Debug, Clone)]
pub struct WikipediaClient {
    client: FetchClient,
    /// Endpoint template; `{lang}` is replaced with the article language.
    api_template: String,
}

impl WikipediaClient {
    pub fn new(client: FetchClient, api_template: impl Into<String>) -> Self {
        Self {
            client,
            api_template: api_template.into(),
        }
    }

    /// Fetch the article (at its pinned revision, if any).
    #[instrument(skip(self), fields(title = %wiki.title, lang = %wiki.lang))]
    pub async fn fetch_article(&self, wiki: &WikiRef) -> Result<WikiArticle, ItemError> {
        let endpoint = self.api_template.replace("{lang}", &wiki.lang);
        let mut url = Url::parse(&endpoint)
            .map_err(|e| ItemError::fetch(&endpoint, format!("invalid API endpoint: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("action", "parse")
                .append_pair("prop", "text|revid")
                .append_pair("format", "json")
                .append_pair("formatversion", "2")
                .append_pair("redirects", "1")
                .append_pair("disableeditsection", "1");
            match wiki.oldid {
                Some(oldid) => query.append_pair("oldid", &oldid.to_string()),
                None => query.append_pair("page", &wiki.title),
            };
        }

        let display_url = wiki.citation_url(None);
        let response = self
            .client
            .http()
            .get(url.as_str())
            .header(
                "User-Agent",
                concat!("Bindery/", env!("CARGO_PKG_VERSION"), " (document export)"),
            )
            .send()
            .await
            .map_err(|e| ItemError::fetch(&display_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ItemError::fetch(&display_url, format!("HTTP {status}")));
        }

        let body: ParseResponse = response
            .json()
            .await
            .map_err(|e| ItemError::fetch(&display_url, format!("invalid API response: {e}")))?;

        if let Some(err) = body.error {
            return Err(ItemError::fetch(
                &display_url,
                format!("{}: {}", err.code, err.info),
            ));
        }
        let parse = body
            .parse
            .ok_or_else(|| ItemError::fetch(&display_url, "API response has no parse result"))?;

        debug!(revid = ?parse.revid, len = parse.text.len(), "article fetched");

        Ok(WikiArticle {
            url: wiki.citation_url(parse.revid),
            title: parse.title,
            revid: parse.revid,
            html: parse.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_article_url() {
        let r = WikiRef::parse("https://de.wikipedia.org/wiki/Adam_Smith").unwrap();
        assert_eq!(r.lang, "de");
        assert_eq!(r.title, "Adam Smith");
        assert_eq!(r.oldid, None);
    }

    #[test]
    fn parses_percent_encoded_and_mobile_urls() {
        let r = WikiRef::parse("https://en.m.wikipedia.org/wiki/Caf%C3%A9_au_lait").unwrap();
        assert_eq!(r.lang, "en");
        assert_eq!(r.title, "Café au lait");

        let r = WikiRef::parse("https://en.wikipedia.org/wiki/C++").unwrap();
        assert_eq!(r.title, "C++");
    }

    #[test]
    fn parses_permanent_link() {
        let r = WikiRef::parse(
            "https://en.wikipedia.org/w/index.php?title=Supply_and_demand&oldid=1187654321",
        )
        .unwrap();
        assert_eq!(r.title, "Supply and demand");
        assert_eq!(r.oldid, Some(1_187_654_321));
    }

    #[test]
    fn parses_bare_title() {
        let r = WikiRef::parse("Opportunity_cost").unwrap();
        assert_eq!(r.lang, "en");
        assert_eq!(r.title, "Opportunity cost");
        assert!(WikiRef::parse("  ").is_none());

        let r = WikiRef::parse("Category:Economics").unwrap();
        assert_eq!(r.title, "Category:Economics");
    }

    #[test]
    fn citation_url_pins_revision() {
        let r = WikiRef::parse("Adam Smith").unwrap();
        assert_eq!(r.citation_url(None), "https://en.wikipedia.org/wiki/Adam_Smith");
        assert_eq!(
            r.citation_url(Some(42)),
            "https://en.wikipedia.org/w/index.php?title=Adam_Smith&oldid=42"
        );
    }

    #[tokio::test]
    async fn fetches_article_with_revision() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("action", "parse"))
            .and(query_param("page", "Adam Smith"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "parse": {
                    "title": "Adam Smith",
                    "pageid": 2297,
                    "revid": 1190000001u64,
                    "text": "<div class=\"mw-parser-output\"><p>Adam Smith was a Scottish economist.</p></div>"
                }
            })))
            .mount(&server)
            .await;

        let wiki = WikipediaClient::new(
            FetchClient::new(5).unwrap(),
            format!("{}/w/api.php", server.uri()),
        );
        let article = wiki
            .fetch_article(&WikiRef::parse("Adam_Smith").unwrap())
            .await
            .unwrap();

        assert_eq!(article.revid, Some(1_190_000_001));
        assert!(article.html.contains("Scottish economist"));
        assert!(article.url.ends_with("oldid=1190000001"));
    }

    #[tokio::test]
    async fn api_error_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "code": "missingtitle", "info": "The page you specified doesn't exist." }
            })))
            .mount(&server)
            .await;

        let wiki = WikipediaClient::new(FetchClient::new(5).unwrap(), server.uri());
        let err = wiki
            .fetch_article(&WikiRef::parse("No such page").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::Fetch { .. }));
        assert!(err.to_string().contains("missingtitle"));
    }
}
