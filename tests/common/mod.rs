#![allow(dead_code)]

use std::cell::RefCell;

use async_trait::async_trait;
use portal_filter::error::{FilterError, Result};
use portal_filter::http::{HttpClient, HttpResponse};

/// HTTP client answering from a fixed list of routes.
///
/// A route matches if every needle occurs in the url with its query
/// decoded, `path?key=value&key=value`. The first matching route wins.
#[derive(Default)]
pub struct CannedHttp {
    routes: Vec<(Vec<String>, HttpResponse)>,
    pub requests: RefCell<Vec<String>>,
}

impl CannedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, needles: &[&str], status: u16, body: &str) -> Self {
        self.routes.push((
            needles.iter().map(|s| s.to_string()).collect(),
            HttpResponse {
                status,
                body: body.to_string(),
            },
        ));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

pub fn decode_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(u) => {
            let query = u
                .query_pairs()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}?{}", u.path(), query)
        }
        Err(_) => url.to_string(),
    }
}

#[async_trait(?Send)]
impl HttpClient for CannedHttp {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let decoded = decode_url(url);
        self.requests.borrow_mut().push(decoded.clone());
        self.routes
            .iter()
            .find(|(needles, _)| needles.iter().all(|n| decoded.contains(n.as_str())))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| FilterError::Network(format!("no route for {decoded}")))
    }
}
