use serde::{Deserialize, Serialize};

/// Entity as emitted by the model, before identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default, alias = "description")]
    pub desc: String,
}

/// Relation as emitted by the model. `source`/`target` hold entity names until
/// they are resolved to entity ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    #[serde(default, alias = "relation")]
    pub name: String,
    #[serde(default, alias = "description")]
    pub desc: String,
}

/// A resolved graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    pub desc: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// A resolved graph edge between two entity ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source: String,
    pub target: String,
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl From<ExtractedEntity> for Entity {
    fn from(raw: ExtractedEntity) -> Self {
        Self {
            id: String::new(),
            name: raw.name,
            entity_type: raw.entity_type,
            desc: raw.desc,
            embedding: Vec::new(),
        }
    }
}

impl From<ExtractedRelation> for Relation {
    fn from(raw: ExtractedRelation) -> Self {
        Self {
            id: String::new(),
            source: raw.source,
            target: raw.target,
            name: raw.name,
            desc: raw.desc,
            embedding: Vec::new(),
        }
    }
}

/// Which half of the extraction a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Entities,
    Relations,
}

impl ObjectKind {
    /// JSON array key the model fills.
    pub fn key(&self) -> &'static str {
        match self {
            ObjectKind::Entities => "entities",
            ObjectKind::Relations => "relations",
        }
    }

    /// Prefix for minted ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ObjectKind::Entities => "ent",
            ObjectKind::Relations => "rel",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
