//! Web lookups for factual questions.
//!
//! A primary provider (Google Custom Search) is asked first; any failure or
//! empty result falls through to the secondary provider (DuckDuckGo Instant
//! Answers) exactly once. Failures never leave this module: they are logged and
//! reported as "no result".

use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::LookupError;
use crate::postprocess::ends_with_terminal;

pub const PRIMARY_TIMEOUT: Duration = Duration::from_secs(10);
pub const SECONDARY_TIMEOUT: Duration = Duration::from_secs(5);

pub const GOOGLE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
pub const DUCKDUCKGO_ENDPOINT: &str = "https://api.duckduckgo.com/";

const RESULT_COUNT: &str = "3";

pub const LOOKUP_PREFIX: &str = "Based on current information: ";

/// A web search oracle returning at most one answer string.
pub trait SearchProvider {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the provider answered but had nothing useful.
    fn search(&self, query: &str) -> Result<Option<String>, LookupError>;
}

/// Primary search with a single fallback hop to a secondary provider.
pub struct KnowledgeLookup {
    primary: Box<dyn SearchProvider>,
    secondary: Box<dyn SearchProvider>,
}

impl KnowledgeLookup {
    pub fn new(primary: Box<dyn SearchProvider>, secondary: Box<dyn SearchProvider>) -> Self {
        Self { primary, secondary }
    }

    pub fn lookup(&self, query: &str) -> Option<String> {
        match self.primary.search(query) {
            Ok(Some(answer)) => return Some(answer),
            Ok(None) => debug!("{} returned no results for {query:?}", self.primary.name()),
            Err(e @ LookupError::NotConfigured(_)) => debug!("{e}"),
            Err(e) => warn!("{} lookup failed: {e}", self.primary.name()),
        }

        match self.secondary.search(query) {
            Ok(answer) => {
                if answer.is_none() {
                    debug!("{} returned no results for {query:?}", self.secondary.name());
                }
                answer
            }
            Err(e) => {
                warn!("{} lookup failed: {e}", self.secondary.name());
                None
            }
        }
    }
}

/// Wrap a lookup answer as an assistant reply.
pub fn format_lookup_reply(answer: &str) -> String {
    let mut reply = format!("{LOOKUP_PREFIX}{}", answer.trim());
    if !ends_with_terminal(&reply) {
        reply.push('.');
    }
    reply
}

/// Google Custom Search JSON API.
pub struct GoogleSearch {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    engine_id: Option<String>,
}

impl GoogleSearch {
    pub fn new(api_key: Option<String>, engine_id: Option<String>) -> Result<Self, LookupError> {
        Self::with_endpoint(GOOGLE_ENDPOINT, api_key, engine_id)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        engine_id: Option<String>,
    ) -> Result<Self, LookupError> {
        let client = Client::builder().timeout(PRIMARY_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            engine_id,
        })
    }
}

impl SearchProvider for GoogleSearch {
    fn name(&self) -> &'static str {
        "google"
    }

    fn search(&self, query: &str) -> Result<Option<String>, LookupError> {
        let (Some(key), Some(cx)) = (&self.api_key, &self.engine_id) else {
            return Err(LookupError::NotConfigured(self.name()));
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", key.as_str()),
                ("cx", cx.as_str()),
                ("q", query),
                ("num", RESULT_COUNT),
            ])
            .send()?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        Ok(parse_google(&response.text()?)?)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

/// First result as "<title>. <snippet>".
pub fn parse_google(body: &str) -> Result<Option<String>, serde_json::Error> {
    let response: GoogleResponse = serde_json::from_str(body)?;
    Ok(response.items.into_iter().next().and_then(|item| {
        let title = single_line(&item.title);
        let snippet = single_line(&item.snippet);
        match (title.is_empty(), snippet.is_empty()) {
            (true, true) => None,
            (false, true) => Some(title),
            (true, false) => Some(snippet),
            (false, false) => Some(format!("{title}. {snippet}")),
        }
    }))
}

/// DuckDuckGo Instant Answer API. Needs no credentials.
pub struct DuckDuckGo {
    client: Client,
    endpoint: String,
}

impl DuckDuckGo {
    pub fn new() -> Result<Self, LookupError> {
        Self::with_endpoint(DUCKDUCKGO_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, LookupError> {
        let client = Client::builder().timeout(SECONDARY_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl SearchProvider for DuckDuckGo {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    fn search(&self, query: &str) -> Result<Option<String>, LookupError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        Ok(parse_duckduckgo(&response.text()?)?)
    }
}

#[derive(Debug, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    // Usually a string, but calculator-style answers are objects.
    #[serde(rename = "Answer", default)]
    answer: serde_json::Value,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text")]
    text: Option<String>,
}

/// Abstract, else direct answer, else the first related topic.
pub fn parse_duckduckgo(body: &str) -> Result<Option<String>, serde_json::Error> {
    let response: InstantAnswer = serde_json::from_str(body)?;

    let candidates = std::iter::once(Some(response.abstract_text))
        .chain(std::iter::once(response.answer.as_str().map(str::to_string)))
        .chain(response.related_topics.into_iter().map(|topic| topic.text));

    Ok(candidates
        .flatten()
        .map(|text| single_line(&text))
        .find(|text| !text.is_empty()))
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Scripted<F> {
        name: &'static str,
        respond: F,
    }

    impl<F> Scripted<F>
    where
        F: Fn(&str) -> Result<Option<String>, LookupError>,
    {
        fn new(name: &'static str, respond: F) -> Self {
            Self { name, respond }
        }
    }

    impl<F> SearchProvider for Scripted<F>
    where
        F: Fn(&str) -> Result<Option<String>, LookupError>,
    {
        fn name(&self) -> &'static str {
            self.name
        }

        fn search(&self, query: &str) -> Result<Option<String>, LookupError> {
            (self.respond)(query)
        }
    }

    #[test]
    fn google_first_item_title_and_snippet() {
        let body = r#"{"items":[{"title":"Paris","snippet":"Capital of France"},
            {"title":"Lyon","snippet":"Another city"}]}"#;
        assert_eq!(
            parse_google(body).unwrap().as_deref(),
            Some("Paris. Capital of France")
        );
    }

    #[test]
    fn google_without_items_is_no_result() {
        assert_eq!(parse_google(r#"{"kind":"customsearch#search"}"#).unwrap(), None);
        assert_eq!(parse_google(r#"{"items":[]}"#).unwrap(), None);
        assert!(parse_google("<html>").is_err());
    }

    #[test]
    fn duckduckgo_priority_order() {
        let abstract_first = r#"{"AbstractText":"Paris is the capital of France",
            "Answer":"Paris","RelatedTopics":[{"Text":"Paris, France"}]}"#;
        assert_eq!(
            parse_duckduckgo(abstract_first).unwrap().as_deref(),
            Some("Paris is the capital of France")
        );

        let answer_next = r#"{"AbstractText":"","Answer":"42","RelatedTopics":[]}"#;
        assert_eq!(parse_duckduckgo(answer_next).unwrap().as_deref(), Some("42"));

        let topic_group_skipped = r#"{"AbstractText":"","Answer":{"from":"calculator"},
            "RelatedTopics":[{"Name":"Places","Topics":[]},{"Text":"Ottawa - capital of Canada"}]}"#;
        assert_eq!(
            parse_duckduckgo(topic_group_skipped).unwrap().as_deref(),
            Some("Ottawa - capital of Canada")
        );

        assert_eq!(parse_duckduckgo("{}").unwrap(), None);
        assert!(parse_duckduckgo("not json").is_err());
    }

    #[test]
    fn primary_answer_skips_secondary() {
        let primary = Scripted::new("primary", |_: &str| Ok(Some("Paris. Capital of France".into())));
        let secondary = Scripted::new("secondary", |_: &str| Ok(Some("unused".into())));
        let lookup = KnowledgeLookup::new(Box::new(primary), Box::new(secondary));

        assert_eq!(
            lookup.lookup("capital of France").as_deref(),
            Some("Paris. Capital of France")
        );
    }

    #[test]
    fn falls_back_once_on_error_or_empty() {
        let failing = Scripted::new("primary", |_: &str| Err(LookupError::NotConfigured("primary")));
        let secondary = Scripted::new("secondary", |q: &str| Ok(Some(format!("answer for {q}"))));
        let lookup = KnowledgeLookup::new(Box::new(failing), Box::new(secondary));
        assert_eq!(lookup.lookup("x").as_deref(), Some("answer for x"));

        let empty = Scripted::new("primary", |_: &str| Ok(None));
        let secondary = Scripted::new("secondary", |_: &str| Ok(Some("fallback".into())));
        let lookup = KnowledgeLookup::new(Box::new(empty), Box::new(secondary));
        assert_eq!(lookup.lookup("x").as_deref(), Some("fallback"));
    }

    #[test]
    fn both_failing_is_no_result() {
        let lookup = KnowledgeLookup::new(
            Box::new(Scripted::new("primary", |_: &str| Ok(None))),
            Box::new(Scripted::new("secondary", |_: &str| {
                Err(LookupError::NotConfigured("secondary"))
            })),
        );
        assert_eq!(lookup.lookup("who is nobody"), None);
    }

    #[test]
    fn reply_wrapping_adds_prefix_and_period() {
        assert_eq!(
            format_lookup_reply("Paris. Capital of France"),
            "Based on current information: Paris. Capital of France."
        );
        assert_eq!(
            format_lookup_reply("It is sunny!"),
            "Based on current information: It is sunny!"
        );
    }

    #[test]
    fn google_needs_credentials() {
        let google = GoogleSearch::new(None, Some("cx".into())).unwrap();
        assert!(matches!(
            google.search("capital of France"),
            Err(LookupError::NotConfigured("google"))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn google_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .and(query_param("key", "test-key"))
            .and(query_param("cx", "test-cx"))
            .and(query_param("q", "capital of France"))
            .and(query_param("num", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items":[{"title":"Paris","snippet":"Capital of France"}]}"#,
            ))
            .mount(&server)
            .await;

        let endpoint = format!("{}/customsearch/v1", server.uri());
        let answer = tokio::task::spawn_blocking(move || {
            GoogleSearch::with_endpoint(endpoint, Some("test-key".into()), Some("test-cx".into()))
                .and_then(|google| google.search("capital of France"))
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(answer.as_deref(), Some("Paris. Capital of France"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duckduckgo_over_http_and_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("format", "json"))
            .and(query_param("no_html", "1"))
            .and(query_param("skip_disambig", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"AbstractText":"Paris is the capital of France"}"#,
            ))
            .mount(&server)
            .await;

        let endpoint = format!("{}/", server.uri());
        let answer = tokio::task::spawn_blocking(move || {
            DuckDuckGo::with_endpoint(endpoint).and_then(|ddg| ddg.search("capital of France"))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(answer.as_deref(), Some("Paris is the capital of France"));

        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&broken)
            .await;
        let endpoint = broken.uri();
        let result = tokio::task::spawn_blocking(move || {
            DuckDuckGo::with_endpoint(endpoint).and_then(|ddg| ddg.search("anything"))
        })
        .await
        .unwrap();
        assert!(matches!(result, Err(LookupError::Status(s)) if s.as_u16() == 503));
    }
}
