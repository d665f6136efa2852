//! Stanford CoreNLP server client
//!
//! Sends lines to a running CoreNLP server and reads back tokens with NER
//! labels and, for the full profile, scored relation mentions. Newlines are
//! always sentence breaks so one input line never merges with the next.
//!
//! Responses use the server's XML output, the only format that carries the
//! relation annotator's `MachineReading` section. Each relation lists its
//! argument entities and one probability per relation label:
//!
//! ```xml
//! <relation id="RelationMention-1">
//!   <type>Work_For</type>
//!   <arguments>
//!     <entity id="EntityMention-1"><type>PEOPLE</type><span start="0" end="2"/></entity>
//!     ...
//!   </arguments>
//!   <probabilities>
//!     <probability><label>Work_For</label><value>0.76</value></probability>
//!     ...
//!   </probabilities>
//! </relation>
//! ```
//!
//! An entity's text is its `<value>` when present, otherwise the tokens its
//! span covers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;

use ise_core::{
    AnnotatedSentence, AnnotationProfile, Annotator, IseError, MentionEntity, NlpConfig,
    RelationMention, Result, Token,
};

/// CoreNLP server annotator
pub struct CoreNlpClient {
    client: Client,
    base_url: String,
    parse_model: String,
}

impl CoreNlpClient {
    /// Create a client with default parser model
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            parse_model: NlpConfig::default().parse_model,
        }
    }

    /// Create from config
    pub fn from_config(config: &NlpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IseError::Other(anyhow::anyhow!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.corenlp_url.trim_end_matches('/').to_string(),
            parse_model: config.parse_model.clone(),
        })
    }

    /// Server properties for a profile
    fn properties(&self, profile: AnnotationProfile) -> serde_json::Value {
        serde_json::json!({
            "annotators": profile.annotators(),
            "parse.model": self.parse_model,
            "ner.useSUTime": "0",
            "ssplit.newlineIsSentenceBreak": "always",
            "outputFormat": "xml",
        })
    }

    /// Parse a server response body
    pub fn parse_response(body: &str) -> Result<Vec<AnnotatedSentence>> {
        let mut reader = Reader::from_str(body);
        reader.config_mut().trim_text(true);
        let mut document = ResponseReader::default();

        loop {
            match reader.read_event().map_err(malformed)? {
                Event::Start(e) => {
                    let name = element_name(&e);
                    document.open(&name, &e)?;
                    document.path.push(name);
                }
                Event::Empty(e) => {
                    let name = element_name(&e);
                    document.open(&name, &e)?;
                    document.close(&name);
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(malformed)?;
                    document.text(&text)?;
                }
                Event::End(_) => {
                    if let Some(name) = document.path.pop() {
                        document.close(&name);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !document.saw_root {
            return Err(malformed("no <root> element"));
        }
        Ok(document.sentences)
    }
}

fn malformed(e: impl std::fmt::Display) -> IseError {
    IseError::Extraction(format!("Malformed CoreNLP response: {e}"))
}

fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Token span `[start, end)` of an entity
fn span(element: &BytesStart<'_>) -> Result<Option<(usize, usize)>> {
    let bound = |key: &str| -> Result<Option<usize>> {
        match element.try_get_attribute(key).map_err(malformed)? {
            Some(attr) => {
                let value = attr.unescape_value().map_err(malformed)?;
                value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| malformed(format!("span {key}={value:?}")))
            }
            None => Ok(None),
        }
    };
    Ok(bound("start")?.zip(bound("end")?))
}

/// Event-driven state for one response document
#[derive(Default)]
struct ResponseReader {
    /// Open elements, outermost first
    path: Vec<String>,
    saw_root: bool,
    sentences: Vec<AnnotatedSentence>,
    sentence: Option<SentenceBuilder>,
}

#[derive(Default)]
struct SentenceBuilder {
    tokens: Vec<Token>,
    token: Option<Token>,
    mentions: Vec<MentionBuilder>,
    mention: Option<MentionBuilder>,
    entity: Option<EntityBuilder>,
    label: Option<String>,
    score: Option<f64>,
}

#[derive(Default)]
struct MentionBuilder {
    entities: Vec<EntityBuilder>,
    scores: HashMap<String, f64>,
}

#[derive(Default)]
struct EntityBuilder {
    value: Option<String>,
    entity_type: String,
    span: Option<(usize, usize)>,
}

impl EntityBuilder {
    fn build(self, tokens: &[Token]) -> MentionEntity {
        let value = self.value.unwrap_or_else(|| match self.span {
            Some((start, end)) if start < end && end <= tokens.len() => tokens[start..end]
                .iter()
                .map(|t| t.word.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        });
        MentionEntity {
            value,
            entity_type: self.entity_type,
        }
    }
}

impl SentenceBuilder {
    fn build(self) -> AnnotatedSentence {
        let SentenceBuilder {
            tokens, mentions, ..
        } = self;
        let relations = mentions
            .into_iter()
            .map(|m| RelationMention {
                entities: m.entities.into_iter().map(|e| e.build(&tokens)).collect(),
                scores: m.scores,
            })
            .collect();
        AnnotatedSentence { tokens, relations }
    }
}

impl ResponseReader {
    fn open(&mut self, name: &str, element: &BytesStart<'_>) -> Result<()> {
        if self.path.is_empty() && name == "root" {
            self.saw_root = true;
        }
        let parent = self.path.last().map(String::as_str).unwrap_or("");
        if name == "sentence" && parent == "sentences" {
            self.sentence = Some(SentenceBuilder::default());
            return Ok(());
        }
        let Some(sentence) = self.sentence.as_mut() else {
            return Ok(());
        };

        match (name, parent) {
            ("token", "tokens") => sentence.token = Some(Token::new("", "O")),
            ("relation", "relations") => sentence.mention = Some(MentionBuilder::default()),
            // Entities under MachineReading/entities are not relation arguments
            ("entity", "arguments") if sentence.mention.is_some() => {
                sentence.entity = Some(EntityBuilder::default())
            }
            ("span", "entity") => {
                if let Some(entity) = sentence.entity.as_mut() {
                    entity.span = span(element)?;
                }
            }
            ("probability", "probabilities") => {
                sentence.label = None;
                sentence.score = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        let n = self.path.len();
        if n < 2 {
            return Ok(());
        }
        let (parent, name) = (self.path[n - 2].as_str(), self.path[n - 1].as_str());
        let Some(sentence) = self.sentence.as_mut() else {
            return Ok(());
        };

        match (parent, name) {
            ("token", "word") => {
                if let Some(token) = sentence.token.as_mut() {
                    token.word = text.to_string();
                }
            }
            ("token", "NER") => {
                if let Some(token) = sentence.token.as_mut() {
                    token.ner = text.to_string();
                }
            }
            ("entity", "type") => {
                if let Some(entity) = sentence.entity.as_mut() {
                    entity.entity_type = text.to_string();
                }
            }
            ("entity", "value") => {
                if let Some(entity) = sentence.entity.as_mut() {
                    entity.value = Some(text.to_string());
                }
            }
            // Entity-level probabilities are not relation scores
            ("probability", "label") if sentence.mention.is_some() && sentence.entity.is_none() => {
                sentence.label = Some(text.to_string());
            }
            ("probability", "value") if sentence.mention.is_some() && sentence.entity.is_none() => {
                let score = text
                    .trim()
                    .parse()
                    .map_err(|_| malformed(format!("probability {text:?}")))?;
                sentence.score = Some(score);
            }
            _ => {}
        }
        Ok(())
    }

    /// `name` has already been popped from `path`
    fn close(&mut self, name: &str) {
        let parent = self.path.last().map(String::as_str).unwrap_or("");
        if name == "sentence" && parent == "sentences" {
            if let Some(sentence) = self.sentence.take() {
                self.sentences.push(sentence.build());
            }
            return;
        }
        let Some(sentence) = self.sentence.as_mut() else {
            return;
        };

        match (name, parent) {
            ("token", "tokens") => {
                if let Some(token) = sentence.token.take() {
                    sentence.tokens.push(token);
                }
            }
            ("entity", "arguments") => {
                if let (Some(entity), Some(mention)) =
                    (sentence.entity.take(), sentence.mention.as_mut())
                {
                    mention.entities.push(entity);
                }
            }
            ("probability", "probabilities") => {
                if let (Some(label), Some(score), Some(mention)) = (
                    sentence.label.take(),
                    sentence.score.take(),
                    sentence.mention.as_mut(),
                ) {
                    mention.scores.insert(label, score);
                }
            }
            ("relation", "relations") => {
                if let Some(mention) = sentence.mention.take() {
                    sentence.mentions.push(mention);
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Annotator for CoreNlpClient {
    async fn annotate(
        &self,
        lines: &[String],
        profile: AnnotationProfile,
    ) -> Result<Vec<AnnotatedSentence>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .query(&[("properties", self.properties(profile).to_string())])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await
            .map_err(|e| IseError::Extraction(format!("CoreNLP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(IseError::Extraction(format!(
                "CoreNLP error {status}: {error_text}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IseError::Extraction(format!("Failed to read CoreNLP response: {e}")))?;

        Self::parse_response(&body)
    }
}
