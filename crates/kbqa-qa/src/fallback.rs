//! Fallback lookup for unanswered entities
//!
//! When the fact store has nothing usable for an entity, its encyclopedia
//! page is fetched in the background and the short infobox facts are written
//! back to the store so a later question can be answered locally.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kbqa_core::{FactStore, FactTriple, FallbackConfig, FallbackLookup, KbqaError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use tokio::task::JoinSet;

static BAIKE_NAME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("dt.basicInfo-item.name").expect("valid selector"));
static BAIKE_VALUE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("dd.basicInfo-item.value").expect("valid selector"));
static WIKI_NAME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th.infobox-label").expect("valid selector"));
static WIKI_VALUE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.infobox-data").expect("valid selector"));

static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+(?:-\d+)?\]").expect("valid citation pattern"));

/// Extract (name, value) pairs from an encyclopedia infobox.
///
/// Understands Baidu Baike `basicInfo-item` lists and Wikipedia
/// `infobox-label`/`infobox-data` rows. A name pairs with the element right
/// after it; pairs with an empty side are dropped.
pub fn parse_infobox(html: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);

    let mut pairs = named_values(&document, &BAIKE_NAME, &BAIKE_VALUE);
    pairs.extend(named_values(&document, &WIKI_NAME, &WIKI_VALUE));
    pairs
}

fn named_values(document: &Html, name: &Selector, value: &Selector) -> Vec<(String, String)> {
    document
        .select(name)
        .filter_map(|name_el| {
            let value_el = name_el
                .next_siblings()
                .find_map(ElementRef::wrap)
                .filter(|el| value.matches(el))?;

            let name: String = element_text(name_el).split_whitespace().collect();
            let value = element_text(value_el);
            (!name.is_empty() && !value.is_empty()).then_some((name, value))
        })
        .collect()
}

/// Visible text with citation markers removed and whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    let text = CITATION.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Infobox fallback lookup
///
/// Lookups run as background tasks on the current Tokio runtime; `drain`
/// waits for the ones still in flight.
#[derive(Clone)]
pub struct InfoboxLookup {
    client: Client,
    base_url: String,
    max_value_chars: usize,
    store: Option<Arc<dyn FactStore>>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl InfoboxLookup {
    /// Create a new lookup that only fetches
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KbqaError::LookupError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            max_value_chars: 10,
            store: None,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        })
    }

    /// Create from config; harvested facts go to `store` when `store_results` is set
    pub fn from_config(config: &FallbackConfig, store: Arc<dyn FactStore>) -> Result<Self> {
        let lookup = Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?
        .with_max_value_chars(config.max_value_chars);

        Ok(if config.store_results {
            lookup.with_store(store)
        } else {
            lookup
        })
    }

    /// Set longest value kept
    pub fn with_max_value_chars(mut self, max_value_chars: usize) -> Self {
        self.max_value_chars = max_value_chars;
        self
    }

    /// Write harvested facts into a store
    pub fn with_store(mut self, store: Arc<dyn FactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Page URL of an entity
    pub fn page_url(&self, entity: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| KbqaError::LookupError(format!("Invalid base URL: {e}")))?;

        url.path_segments_mut()
            .map_err(|_| KbqaError::LookupError(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push(entity);

        Ok(url)
    }

    /// Turn infobox pairs into facts, keeping short values only
    pub fn facts_from_html(&self, entity: &str, html: &str) -> Vec<FactTriple> {
        parse_infobox(html)
            .into_iter()
            .filter(|(_, value)| value.chars().count() <= self.max_value_chars)
            .map(|(name, value)| FactTriple::new(entity, name, value))
            .collect()
    }

    /// Fetch the entity page and extract its facts
    pub async fn lookup(&self, entity: &str) -> Result<Vec<FactTriple>> {
        let url = self.page_url(entity)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| KbqaError::LookupError(format!("Request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(KbqaError::LookupError(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| KbqaError::LookupError(format!("Failed to read page: {e}")))?;

        Ok(self.facts_from_html(entity, &html))
    }

    /// Look up an entity and store what was found
    pub async fn harvest(&self, entity: &str) -> Result<u64> {
        let facts = self.lookup(entity).await?;
        tracing::info!("Found {} infobox facts for {}", facts.len(), entity);

        self.store_new_facts(entity, facts).await
    }

    /// Store facts whose attribute the entity does not have yet
    pub async fn store_new_facts(&self, entity: &str, facts: Vec<FactTriple>) -> Result<u64> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut known: HashSet<String> = store
            .find_by_entity(entity)
            .await?
            .into_iter()
            .map(|fact| fact.attribute)
            .collect();

        let fresh: Vec<FactTriple> = facts
            .into_iter()
            .filter(|fact| known.insert(fact.attribute.clone()))
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }
        store.insert_batch(&fresh).await
    }

    fn take_tasks(&self) -> JoinSet<()> {
        self.tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default()
    }
}

#[async_trait]
impl FallbackLookup for InfoboxLookup {
    fn trigger(&self, entity: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime for fallback lookup of {}", entity);
            return;
        };
        let Ok(mut tasks) = self.tasks.lock() else {
            tracing::warn!("Fallback task set poisoned, skipping {}", entity);
            return;
        };

        // Reap finished lookups
        while tasks.try_join_next().is_some() {}

        let lookup = self.clone();
        let entity = entity.to_string();
        tasks.spawn_on(
            async move {
                match lookup.harvest(&entity).await {
                    Ok(stored) => tracing::debug!("Stored {} facts for {}", stored, entity),
                    Err(e) => tracing::warn!("Fallback lookup for {} failed: {}", entity, e),
                }
            },
            &handle,
        );
    }

    async fn drain(&self) {
        let mut tasks = self.take_tasks();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Fallback task aborted: {}", e);
            }
        }
    }
}

/// Fallback that only records the miss
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFallback;

#[async_trait]
impl FallbackLookup for NoopFallback {
    fn trigger(&self, entity: &str) {
        tracing::info!("No local answer for {}", entity);
    }
}
