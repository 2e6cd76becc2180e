#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use tenant_rag::config::Config;
use tenant_rag::embedding::EmbeddingProvider;
use tenant_rag::generate::ChatModel;
use tenant_rag::RagService;

/// Build a PDF with one page per entry; each page is a list of text lines.
pub fn pdf_bytes(pages: &[&[&str]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
        ];
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                operations.push(Operation::new("Td", vec![0.into(), (-18).into()]));
            }
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Two-page store policy used across the pipeline tests.
pub fn policy_pdf() -> Vec<u8> {
    pdf_bytes(&[
        &["Refunds are processed within 14 days of receiving the returned item."],
        &["Standard shipping takes three to five business days."],
    ])
}

/// Words grouped by topic; a text's vector counts its words per topic.
const CONCEPTS: &[&[&str]] = &[
    &["refund", "refunds", "refunded", "return", "returned", "returns"],
    &["long", "take", "takes", "within", "day", "days", "weeks"],
    &["shipping", "ship", "shipped", "delivery"],
    &["warranty", "guarantee", "covers", "cover"],
    &["price", "pricing", "cost", "plan", "dollars"],
];

/// Deterministic topic-count embedder. Text with no known words maps to the
/// zero vector, which has cosine 0 against everything.
pub struct ConceptEmbedder;

pub fn concept_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; CONCEPTS.len()];
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        for (i, concept) in CONCEPTS.iter().enumerate() {
            if concept.contains(&word.as_str()) {
                v[i] += 1.0;
            }
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for ConceptEmbedder {
    fn model_name(&self) -> &str {
        "concept-test"
    }

    fn dims(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| concept_vector(t)).collect())
    }
}

/// Concept embedder that sleeps inside every call and records how many
/// calls were in flight at once.
pub struct SlowEmbedder {
    pub delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn model_name(&self) -> &str {
        "concept-test"
    }

    fn dims(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| concept_vector(t)).collect())
    }
}

/// Concept embedder that never returns while `stalled` is set.
#[derive(Default)]
pub struct StallingEmbedder {
    pub stalled: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for StallingEmbedder {
    fn model_name(&self) -> &str {
        "concept-test"
    }

    fn dims(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(texts.iter().map(|t| concept_vector(t)).collect())
    }
}

/// Two-dimensional embedder: document text maps to `[1, 0]` and questions
/// (text ending in `?`) to a unit vector at the given cosine from it.
pub struct FixedAngleEmbedder {
    pub cosine: f32,
}

#[async_trait]
impl EmbeddingProvider for FixedAngleEmbedder {
    fn model_name(&self) -> &str {
        "fixed-angle"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let question = vec![self.cosine, (1.0 - self.cosine * self.cosine).sqrt()];
        Ok(texts
            .iter()
            .map(|t| {
                if t.trim_end().ends_with('?') {
                    question.clone()
                } else {
                    vec![1.0, 0.0]
                }
            })
            .collect())
    }
}

/// Chat model whose upstream always fails.
pub struct FailingChat;

#[async_trait]
impl ChatModel for FailingChat {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("chat completion API error (503 Service Unavailable)")
    }
}

/// Chat model that never answers.
pub struct StalledChat;

#[async_trait]
impl ChatModel for StalledChat {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        std::future::pending().await
    }
}

/// Chat model that records every prompt. It answers from the prompt when
/// the refund policy is in it and says it doesn't know otherwise.
#[derive(Default)]
pub struct RecordingChat {
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingChat {
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("14 days") {
            Ok("Refunds are processed within 14 days.".to_string())
        } else {
            Ok("I don't know".to_string())
        }
    }
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.root = root.to_path_buf();
    config
}

pub fn service_with(
    root: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
) -> (RagService, Arc<RecordingChat>) {
    let chat = Arc::new(RecordingChat::default());
    let service = RagService::new(&test_config(root), embedder, chat.clone());
    (service, chat)
}

pub fn service(root: &Path) -> (RagService, Arc<RecordingChat>) {
    service_with(root, Arc::new(ConceptEmbedder))
}
