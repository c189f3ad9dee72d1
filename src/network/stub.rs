//! Scripted [`Fetcher`] for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FetchError, Fetcher};
use crate::http::{Request, Response};

#[derive(Debug, Clone)]
enum Outcome {
    Respond(Response),
    Fail,
}

/// Answers from a per-URL script. Queued outcomes are consumed in order; the
/// last one sticks. Unscripted URLs fail as unreachable.
#[derive(Debug, Default)]
pub(crate) struct StubFetcher {
    routes: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, url: &str, response: Response) -> &Self {
        self.push(url, Outcome::Respond(response))
    }

    pub(crate) fn fail(&self, url: &str) -> &Self {
        self.push(url, Outcome::Fail)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    fn push(&self, url: &str, outcome: Outcome) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_owned())
            .or_default()
            .push_back(outcome);
        self
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url().to_string();
        self.calls.lock().unwrap().push(url.clone());

        let outcome = {
            let mut routes = self.routes.lock().unwrap();
            routes.get_mut(&url).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };

        // Let other tasks interleave, like a real network round trip would.
        tokio::task::yield_now().await;

        match outcome {
            Some(Outcome::Respond(response)) => Ok(response),
            Some(Outcome::Fail) | None => Err(FetchError::Unreachable { url }),
        }
    }
}
