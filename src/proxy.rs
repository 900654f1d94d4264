// src/proxy.rs
//! Thin pass-through helpers for the map UI. Every upstream failure degrades to
//! an empty result; there are no retries.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ProxySection;

pub const GEOSEARCH_RADIUS_M: u32 = 10_000;
pub const GEOSEARCH_LIMIT: u32 = 5;
pub const NEWS_LIMIT: usize = 20;

static RE_IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap());

/// One news item as the UI expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    #[serde(rename = "pubDate")]
    pub pub_date: String,
    pub source: String,
    pub image: String,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    source: Option<SourceTag>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceTag {
    #[serde(rename = "$text", default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct GeoSearchReply {
    #[serde(default)]
    query: GeoSearchQuery,
}

#[derive(Debug, Default, Deserialize)]
struct GeoSearchQuery {
    #[serde(default)]
    geosearch: Vec<GeoSearchHit>,
}

#[derive(Debug, Deserialize)]
struct GeoSearchHit {
    title: Option<String>,
}

/// Yesterday in UTC as `YYYY-MM-DD` (latest complete imagery day).
pub fn gibs_date() -> String {
    (chrono::Utc::now() - chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string()
}

/// Parse an RSS document into at most [`NEWS_LIMIT`] items.
pub fn parse_news(xml: &str) -> Result<Vec<NewsItem>> {
    let cleaned = xml.replace("&nbsp;", " ");
    let rss: Rss = from_str(&cleaned).context("parsing news rss xml")?;
    Ok(rss
        .channel
        .item
        .into_iter()
        .take(NEWS_LIMIT)
        .map(|it| {
            let image = it
                .description
                .as_deref()
                .map(|d| html_escape::decode_html_entities(d).to_string())
                .and_then(|d| RE_IMG_SRC.captures(&d).map(|c| c[1].to_string()))
                .unwrap_or_default();
            NewsItem {
                title: it.title.unwrap_or_default(),
                link: it.link.unwrap_or_default(),
                pub_date: it.pub_date.unwrap_or_default(),
                source: it.source.map(|s| s.name).unwrap_or_default(),
                image,
            }
        })
        .collect())
}

#[derive(Clone)]
pub struct Proxies {
    cfg: ProxySection,
    http: reqwest::Client,
}

impl Proxies {
    pub fn from_config(cfg: &ProxySection) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(target: "proxy", error = %e, "http client build failed, upstream calls have no timeout");
                reqwest::Client::new()
            });
        Self {
            cfg: cfg.clone(),
            http,
        }
    }

    /// Titles of up to five articles within 10 km of the point.
    pub async fn geo_lookup(&self, lat: &str, lon: &str) -> Vec<String> {
        match self.try_geo_lookup(lat, lon).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(target: "proxy", error = %e, "geo lookup failed");
                Vec::new()
            }
        }
    }

    async fn try_geo_lookup(&self, lat: &str, lon: &str) -> Result<Vec<String>> {
        let coord = format!("{lat}|{lon}");
        let radius = GEOSEARCH_RADIUS_M.to_string();
        let limit = GEOSEARCH_LIMIT.to_string();
        let text = self
            .http
            .get(&self.cfg.geosearch_url)
            .query(&[
                ("action", "query"),
                ("list", "geosearch"),
                ("gscoord", coord.as_str()),
                ("gsradius", radius.as_str()),
                ("gslimit", limit.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .context("geosearch request")?
            .text()
            .await
            .context("geosearch body")?;
        let reply: GeoSearchReply = serde_json::from_str(&text).unwrap_or_default();
        Ok(reply
            .query
            .geosearch
            .into_iter()
            .filter_map(|h| h.title)
            .collect())
    }

    /// Upstream earthquake GeoJSON bytes, verbatim. `None` on any failure.
    pub async fn earthquakes(&self) -> Option<Bytes> {
        let res = async {
            self.http
                .get(&self.cfg.earthquakes_url)
                .send()
                .await?
                .bytes()
                .await
        }
        .await;
        match res {
            Ok(b) => Some(b),
            Err(e) => {
                warn!(target: "proxy", error = %e, "earthquake feed failed");
                None
            }
        }
    }

    pub async fn news_for_city(&self, city: &str) -> Vec<NewsItem> {
        match self.try_news(city).await {
            Ok(items) => items,
            Err(e) => {
                warn!(target: "proxy", error = %e, "news lookup failed");
                Vec::new()
            }
        }
    }

    async fn try_news(&self, city: &str) -> Result<Vec<NewsItem>> {
        let body = self
            .http
            .get(&self.cfg.news_rss_url)
            .query(&[("q", city), ("hl", "en-US"), ("gl", "US"), ("ceid", "US:en")])
            .send()
            .await
            .context("news rss request")?
            .text()
            .await
            .context("news rss body")?;
        parse_news(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Search</title>
<item>
  <title>Harbour reopens after storm</title>
  <link>https://news.example/a</link>
  <pubDate>Mon, 06 Oct 2025 09:30:00 GMT</pubDate>
  <description>&lt;img src="https://img.example/a.jpg"&gt;&lt;p&gt;text&lt;/p&gt;</description>
  <source url="https://paper.example">The Paper</source>
</item>
<item>
  <title>Second</title>
  <link>https://news.example/b</link>
</item>
</channel></rss>"#;

    #[test]
    fn parses_items_with_optional_fields() {
        let items = parse_news(RSS).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Harbour reopens after storm");
        assert_eq!(items[0].source, "The Paper");
        assert_eq!(items[0].image, "https://img.example/a.jpg");
        assert_eq!(items[0].pub_date, "Mon, 06 Oct 2025 09:30:00 GMT");
        assert_eq!(items[1].source, "");
        assert_eq!(items[1].image, "");
    }

    #[test]
    fn caps_item_count() {
        let mut xml = String::from("<rss><channel>");
        for i in 0..30 {
            xml.push_str(&format!("<item><title>t{i}</title></item>"));
        }
        xml.push_str("</channel></rss>");
        assert_eq!(parse_news(&xml).unwrap().len(), NEWS_LIMIT);
    }

    #[test]
    fn empty_channel_is_empty_list() {
        let items = parse_news("<rss><channel><title>x</title></channel></rss>").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn gibs_date_shape() {
        let d = gibs_date();
        assert_eq!(d.len(), 10);
        assert_eq!(&d[4..5], "-");
    }
}
