//! End-to-end pipeline tests with in-process models and stores

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kbqa_core::{
    EncodedInput, FactStore, FactTriple, FallbackLookup, PairScorer, QueryOutcome, Result,
    TagCode, TagPredictor, TextEncoder, NO_ENTITY_MESSAGE,
};
use kbqa_extractor::TaggingNer;
use kbqa_qa::{CandidateRanker, KbqaOrchestrator};
use kbqa_store::InMemoryFactStore;

const O: TagCode = 0;
const B: TagCode = 1;
const I: TagCode = 2;

// ============================================================================
// Fakes
// ============================================================================

/// One id per non-space character; pairs encode only the second text
struct CharEncoder;

fn char_ids(text: &str) -> Vec<i64> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c as i64)
        .collect()
}

impl TextEncoder for CharEncoder {
    fn encode(&self, text: &str, max_length: usize) -> Result<EncodedInput> {
        let ids = char_ids(text);
        let types = vec![0; ids.len()];
        EncodedInput::padded(ids, types, max_length, 0, 0)
    }

    fn encode_pair(
        &self,
        _text: &str,
        pair: &str,
        max_length: usize,
        pad_segment_id: i64,
    ) -> Result<EncodedInput> {
        let ids = char_ids(pair);
        let types = vec![1; ids.len()];
        EncodedInput::padded(ids, types, max_length, 0, pad_segment_id)
    }
}

/// Returns one preset tag sequence
struct FixedTagger(Vec<TagCode>);

#[async_trait]
impl TagPredictor for FixedTagger {
    async fn predict_tags(&self, _input: &EncodedInput) -> Result<Vec<TagCode>> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Preset logits per attribute; unknown attributes do not match
#[derive(Default)]
struct TableScorer {
    logits: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableScorer {
    fn new(entries: &[(&str, [f32; 2])]) -> Self {
        Self {
            logits: entries
                .iter()
                .map(|(a, l)| (a.to_string(), l.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PairScorer for TableScorer {
    async fn score_pairs(&self, batch: &[EncodedInput]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(batch
            .iter()
            .map(|input| {
                let attribute: String = input
                    .input_ids
                    .iter()
                    .filter(|&&id| id != 0)
                    .filter_map(|&id| char::from_u32(id as u32))
                    .collect();
                self.logits
                    .get(&attribute)
                    .cloned()
                    .unwrap_or_else(|| vec![2.0, -2.0])
            })
            .collect())
    }

    fn name(&self) -> &str {
        "table"
    }
}

/// In-memory store counting lookups
struct CountingStore {
    inner: InMemoryFactStore,
    lookups: AtomicUsize,
}

impl CountingStore {
    fn new(triples: Vec<FactTriple>) -> Self {
        Self {
            inner: InMemoryFactStore::from_triples(triples),
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FactStore for CountingStore {
    async fn find_by_entity(&self, entity: &str) -> Result<Vec<FactTriple>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_entity(entity).await
    }

    async fn insert(&self, triple: &FactTriple) -> Result<()> {
        self.inner.insert(triple).await
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Records triggered entities and drains
#[derive(Default)]
struct RecordingFallback {
    entities: Mutex<Vec<String>>,
    drains: AtomicUsize,
}

impl RecordingFallback {
    fn entities(&self) -> Vec<String> {
        self.entities.lock().unwrap().clone()
    }
}

#[async_trait]
impl FallbackLookup for RecordingFallback {
    fn trigger(&self, entity: &str) {
        self.entities.lock().unwrap().push(entity.to_string());
    }

    async fn drain(&self) {
        self.drains.fetch_add(1, Ordering::SeqCst);
    }
}

struct Pipeline {
    orchestrator: KbqaOrchestrator,
    store: Arc<CountingStore>,
    scorer: Arc<TableScorer>,
    fallback: Arc<RecordingFallback>,
}

fn pipeline(tags: Vec<TagCode>, triples: Vec<FactTriple>, scorer: TableScorer) -> Pipeline {
    let encoder = Arc::new(CharEncoder);
    let store = Arc::new(CountingStore::new(triples));
    let scorer = Arc::new(scorer);
    let fallback = Arc::new(RecordingFallback::default());

    let recognizer = TaggingNer::new(encoder.clone(), Arc::new(FixedTagger(tags)));
    let ranker = CandidateRanker::new(encoder, scorer.clone()).with_batch_size(2);
    let orchestrator =
        KbqaOrchestrator::new(Arc::new(recognizer), store.clone(), ranker, fallback.clone());

    Pipeline {
        orchestrator,
        store,
        scorer,
        fallback,
    }
}

fn beijing_facts() -> Vec<FactTriple> {
    vec![
        FactTriple::new("北京", "面积", "16410"),
        FactTriple::new("北京", "人口", "2100万"),
        FactTriple::new("上海", "面积", "6340"),
    ]
}

/// Tags `北京` at the start of a question of `len` characters
fn beijing_tags(len: usize) -> Vec<TagCode> {
    let mut tags = vec![O; len];
    tags[0] = B;
    tags[1] = I;
    tags
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_entity_span_drives_lookup() {
    let p = pipeline(vec![O, B, I, I, O], vec![], TableScorer::default());

    let outcome = p.orchestrator.query("北京市在哪").await.unwrap();
    assert_eq!(outcome.entity(), Some("京市在"));
    assert_eq!(p.fallback.entities(), vec!["京市在"]);
}

#[tokio::test]
async fn test_exact_attribute_match() {
    let question = "北京的面积是多少";
    let p = pipeline(
        beijing_tags(question.chars().count()),
        beijing_facts(),
        TableScorer::default(),
    );

    let answer = p.orchestrator.answer(question).await.unwrap();
    assert_eq!(answer, "北京的面积是16410");
    assert_eq!(p.scorer.calls.load(Ordering::SeqCst), 0);
    assert!(p.fallback.entities().is_empty());
}

#[tokio::test]
async fn test_no_candidates_triggers_fallback_once() {
    let question = "北京的面积是多少";
    let p = pipeline(
        beijing_tags(question.chars().count()),
        vec![],
        TableScorer::default(),
    );

    let outcome = p.orchestrator.query(question).await.unwrap();
    assert_eq!(
        outcome,
        QueryOutcome::NoCandidates {
            entity: "北京".to_string()
        }
    );
    assert_eq!(outcome.to_string(), "未找到 北京 相关信息，尝试通过网络查找...");
    assert_eq!(p.fallback.entities(), vec!["北京"]);
}

#[tokio::test]
async fn test_no_entity_skips_store() {
    let p = pipeline(vec![O; 5], beijing_facts(), TableScorer::default());

    let answer = p.orchestrator.answer("今天天气好").await.unwrap();
    assert_eq!(answer, NO_ENTITY_MESSAGE);
    assert_eq!(p.store.lookups.load(Ordering::SeqCst), 0);
    assert!(p.fallback.entities().is_empty());
}

#[tokio::test]
async fn test_semantic_match_answers() {
    let question = "北京有多大";
    let facts = vec![
        FactTriple::new("北京", "人口", "2100万"),
        FactTriple::new("北京", "气候", "温带季风气候"),
        FactTriple::new("北京", "总面积", "16410平方千米"),
    ];
    let scorer = TableScorer::new(&[("总面积", [-1.0, 3.0]), ("人口", [0.0, 0.5])]);
    let p = pipeline(beijing_tags(question.chars().count()), facts, scorer);

    let answer = p.orchestrator.answer(question).await.unwrap();
    assert_eq!(answer, "北京的总面积是16410平方千米");
    // Three candidates in batches of two
    assert_eq!(p.scorer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_semantic_no_match_triggers_fallback() {
    let question = "北京有多大";
    let p = pipeline(
        beijing_tags(question.chars().count()),
        beijing_facts(),
        TableScorer::default(),
    );

    let outcome = p.orchestrator.query(question).await.unwrap();
    assert_eq!(
        outcome,
        QueryOutcome::NoMatch {
            entity: "北京".to_string()
        }
    );
    assert!(outcome.needs_fallback());
    assert_eq!(p.fallback.entities(), vec!["北京"]);
}

#[tokio::test]
async fn test_store_error_propagates() {
    struct FailingStore;

    #[async_trait]
    impl FactStore for FailingStore {
        async fn find_by_entity(&self, _entity: &str) -> Result<Vec<FactTriple>> {
            Err(kbqa_core::KbqaError::DatabaseError("connection refused".to_string()))
        }

        async fn insert(&self, _triple: &FactTriple) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    let encoder = Arc::new(CharEncoder);
    let fallback = Arc::new(RecordingFallback::default());
    let recognizer = TaggingNer::new(encoder.clone(), Arc::new(FixedTagger(beijing_tags(5))));
    let orchestrator = KbqaOrchestrator::new(
        Arc::new(recognizer),
        Arc::new(FailingStore),
        CandidateRanker::new(encoder, Arc::new(TableScorer::default())),
        fallback.clone(),
    );

    let result = orchestrator.query("北京有多大").await;
    assert!(matches!(result, Err(kbqa_core::KbqaError::DatabaseError(_))));
    assert!(fallback.entities().is_empty());
}

#[tokio::test]
async fn test_drain_reaches_fallback() {
    let question = "北京的面积是多少";
    let p = pipeline(
        beijing_tags(question.chars().count()),
        vec![],
        TableScorer::default(),
    );

    p.orchestrator.query(question).await.unwrap();
    assert_eq!(p.fallback.drains.load(Ordering::SeqCst), 0);

    p.orchestrator.drain().await;
    assert_eq!(p.fallback.drains.load(Ordering::SeqCst), 1);
    assert_eq!(p.fallback.entities(), vec!["北京"]);
}

#[tokio::test]
async fn test_drain_lets_infobox_write_back_finish() {
    use kbqa_qa::InfoboxLookup;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const PAGE: &str = r#"<html><body>
        <dt class="basicInfo-item name">面积</dt>
        <dd class="basicInfo-item value">16410平方千米</dd>
    </body></html>"#;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                PAGE.len(),
                PAGE
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    let store = Arc::new(InMemoryFactStore::new());
    let fallback = Arc::new(
        InfoboxLookup::new(format!("http://{addr}/item"), Duration::from_secs(5))
            .unwrap()
            .with_store(store.clone()),
    );
    let encoder = Arc::new(CharEncoder);
    let question = "北京的面积是多少";
    let recognizer = TaggingNer::new(
        encoder.clone(),
        Arc::new(FixedTagger(beijing_tags(question.chars().count()))),
    );
    let orchestrator = KbqaOrchestrator::new(
        Arc::new(recognizer),
        store.clone(),
        CandidateRanker::new(encoder, Arc::new(TableScorer::default())),
        fallback,
    );

    let first = orchestrator.answer(question).await.unwrap();
    assert_eq!(first, "未找到 北京 相关信息，尝试通过网络查找...");

    orchestrator.drain().await;
    let second = orchestrator.answer(question).await.unwrap();
    assert_eq!(second, "北京的面积是16410平方千米");
}
