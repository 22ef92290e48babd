pub mod error;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod schema;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::ExtractionError;
pub use llm::{ChatModel, ChatRequest, Message, ModelError, OllamaClient, Role};
pub use retry::RetryPolicy;
pub use schema::{
    Entity, ExtractedEntity, ExtractedRelation, ObjectKind, Relation,
};

use regex::Regex;
use serde::Serialize;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").expect("valid regex"));

pub struct Extractor {
    chat: Arc<dyn ChatModel>,
    max_rounds: usize,
}

impl Extractor {
    /// `max_rounds` continuation turns follow the first extraction; 0 disables them.
    pub fn new(chat: Arc<dyn ChatModel>, max_rounds: usize) -> Self {
        Self { chat, max_rounds }
    }

    /// Extract the entities of one chunk.
    pub async fn extract_entities(
        &self,
        chunk_id: &str,
        text: &str,
    ) -> Result<Vec<ExtractedEntity>, ExtractionError> {
        let prompt = prompt::build_entity_prompt(text);
        let entities = self.extract(chunk_id, ObjectKind::Entities, prompt).await?;

        info!(chunk_id, count = entities.len(), "entity extraction finished");
        Ok(entities)
    }

    /// Extract relations between `entities`, given as `(name, type)` pairs.
    pub async fn extract_relations(
        &self,
        chunk_id: &str,
        text: &str,
        entities: &[(String, String)],
    ) -> Result<Vec<ExtractedRelation>, ExtractionError> {
        let prompt = prompt::build_relation_prompt(text, entities);
        let relations = self.extract(chunk_id, ObjectKind::Relations, prompt).await?;

        info!(chunk_id, count = relations.len(), "relation extraction finished");
        Ok(relations)
    }

    async fn extract<T>(&self, chunk_id: &str, kind: ObjectKind, prompt: String) -> Result<Vec<T>, ExtractionError>
    where
        T: DeserializeOwned + Serialize,
    {
        let record = self.ask(chunk_id, kind, ChatRequest::new(prompt.clone()).json()).await?;
        let items = parse_batch(chunk_id, kind, &record)?;

        if self.max_rounds > 0 {
            self.loop_extract(chunk_id, kind, prompt, items).await
        } else {
            Ok(items)
        }
    }

    /// Ask the model, in the same conversation, to keep adding to the array.
    async fn loop_extract<T>(
        &self,
        chunk_id: &str,
        kind: ObjectKind,
        prompt: String,
        mut items: Vec<T>,
    ) -> Result<Vec<T>, ExtractionError>
    where
        T: DeserializeOwned + Serialize,
    {
        let first = serde_json::json!({ kind.key(): &items }).to_string();
        let mut history = Message::exchange(prompt, first).to_vec();

        for round in 0..self.max_rounds {
            let continue_prompt = prompt::build_continue_prompt(kind);
            let request = ChatRequest::new(continue_prompt.clone())
                .with_history(history.clone())
                .json();
            let record = self.ask(chunk_id, kind, request).await?;
            let more: Vec<T> = parse_batch(chunk_id, kind, &record)?;

            debug!(chunk_id, %kind, round, added = more.len(), "continuation round");
            items.extend(more);
            history.extend(Message::exchange(continue_prompt, record));

            if round + 1 == self.max_rounds {
                break;
            }

            let request = ChatRequest::new(prompt::build_loop_prompt(kind)).with_history(history.clone());
            let answer = self.ask(chunk_id, kind, request).await?;
            if !is_yes(&answer) {
                break;
            }
        }

        Ok(items)
    }

    async fn ask(&self, chunk_id: &str, kind: ObjectKind, request: ChatRequest) -> Result<String, ExtractionError> {
        self.chat
            .chat(request)
            .await
            .map_err(|source| ExtractionError::Model {
                chunk_id: chunk_id.to_string(),
                kind,
                source,
            })
    }
}

/// Parse `{"<kind>": [...]}`, tolerating a surrounding markdown code fence.
pub fn parse_batch<T: DeserializeOwned>(
    chunk_id: &str,
    kind: ObjectKind,
    record: &str,
) -> Result<Vec<T>, ExtractionError> {
    let malformed = |source| ExtractionError::MalformedJson {
        chunk_id: chunk_id.to_string(),
        kind,
        source,
    };

    let body = match CODE_FENCE.captures(record) {
        Some(caps) => caps.get(1).map_or(record, |m| m.as_str()),
        None => record,
    };

    let mut value: Value = serde_json::from_str(body).map_err(malformed)?;
    let items = value
        .get_mut(kind.key())
        .map(Value::take)
        .ok_or_else(|| serde_json::Error::missing_field(kind.key()))
        .map_err(malformed)?;

    serde_json::from_value(items).map_err(malformed)
}

fn is_yes(answer: &str) -> bool {
    answer
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .eq_ignore_ascii_case("yes")
}

/// Replace relation endpoint names with entity ids. Relations naming an entity
/// outside `name_to_id` are dropped.
pub fn resolve_endpoints(
    chunk_id: &str,
    mut relations: Vec<ExtractedRelation>,
    name_to_id: &HashMap<String, String>,
) -> Vec<ExtractedRelation> {
    for i in (0..relations.len()).rev() {
        let rel = &relations[i];
        let source = name_to_id.get(&rel.source);
        let target = name_to_id.get(&rel.target);

        match (source, target) {
            (Some(source), Some(target)) => {
                let (source, target) = (source.clone(), target.clone());
                let rel = &mut relations[i];
                rel.source = source;
                rel.target = target;
            }
            (None, _) => {
                info!(chunk_id, entity = %rel.source, relation = %rel.name, "dropping relation with unknown source");
                relations.remove(i);
            }
            (_, None) => {
                info!(chunk_id, entity = %rel.target, relation = %rel.name, "dropping relation with unknown target");
                relations.remove(i);
            }
        }
    }

    relations
}
