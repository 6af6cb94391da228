//! Storage module for the catalog cache
//!
//! This module defines the cached entities, their static table descriptors and
//! the SQLite store that persists them with merge-on-write semantics.

pub mod schema;
pub mod sqlite;
pub mod traits;

pub use schema::{
    create_table_sql, upsert_many_sql, upsert_sql, Column, ColumnType, TableDescriptor,
};
pub use sqlite::SqliteStore;
pub use traits::{PartOwned, Record, StorageError, StorageResult};

use rusqlite::types::Value;
use rusqlite::Row;
use schema::ColumnType::{Boolean, Integer, Real, Text};
use sha2::{Digest, Sha256};
use traits::{boolean, integer, real, text};

/// Length of the hex prefix used as a content id
const DEDUP_ID_LEN: usize = 16;

/// Derives a deterministic id from a part and the content fields of a record
///
/// The same inputs always produce the same id, so re-scraping identical content
/// lands on the same row instead of inserting a duplicate.
pub fn dedup_id(manufacturer_id: &str, fields: &[Option<&str>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manufacturer_id.as_bytes());
    for field in fields {
        // Unit separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0x1f]);
        hasher.update(field.unwrap_or("").as_bytes());
    }
    let mut id = hex::encode(hasher.finalize());
    id.truncate(DEDUP_ID_LEN);
    id
}

// ===== Descriptors =====

pub const PARTS_TABLE: TableDescriptor = TableDescriptor {
    name: "parts",
    primary_key: "manufacturer_id",
    auto_increment: false,
    columns: &[
        Column::new("manufacturer_id", Text),
        Column::new("catalog_id", Text),
        Column::new("name", Text),
        Column::new("url", Text),
        Column::new("availability", Boolean),
        Column::new("price", Real),
        Column::new("difficulty", Text),
        Column::new("time", Text),
        Column::new("rating", Real),
        Column::new("description", Text),
        Column::new("fixes", Text),
        Column::new("part_replacements", Text),
        Column::new("products", Text),
        Column::new("related_parts", Text),
    ],
    unique: &[],
};

pub const MODELS_TABLE: TableDescriptor = TableDescriptor {
    name: "models",
    primary_key: "id",
    auto_increment: false,
    columns: &[
        Column::new("id", Text),
        Column::new("name", Text),
        Column::new("description", Text),
        Column::new("parts", Text),
        Column::new("symptoms", Text),
    ],
    unique: &[],
};

pub const REPLACEMENTS_TABLE: TableDescriptor = TableDescriptor {
    name: "part_replacements",
    primary_key: "replacement_id",
    auto_increment: true,
    columns: &[
        Column::new("replacement_id", Integer),
        Column::new("manufacturer_id", Text),
        Column::new("replacement_text", Text),
    ],
    unique: &["manufacturer_id", "replacement_text"],
};

pub const REVIEWS_TABLE: TableDescriptor = TableDescriptor {
    name: "part_reviews",
    primary_key: "review_id",
    auto_increment: false,
    columns: &[
        Column::new("review_id", Text),
        Column::new("manufacturer_id", Text),
        Column::new("header", Text),
        Column::new("text", Text),
    ],
    unique: &[],
};

pub const STORIES_TABLE: TableDescriptor = TableDescriptor {
    name: "part_review_stories",
    primary_key: "story_id",
    auto_increment: false,
    columns: &[
        Column::new("story_id", Text),
        Column::new("manufacturer_id", Text),
        Column::new("title", Text),
        Column::new("text", Text),
    ],
    unique: &[],
};

pub const QNA_TABLE: TableDescriptor = TableDescriptor {
    name: "part_qna",
    primary_key: "qna_id",
    auto_increment: false,
    columns: &[
        Column::new("qna_id", Text),
        Column::new("manufacturer_id", Text),
        Column::new("question", Text),
        Column::new("model_number", Text),
        Column::new("answer", Text),
    ],
    unique: &[],
};

/// Every entity table, in creation order
pub const ALL_TABLES: &[&TableDescriptor] = &[
    &PARTS_TABLE,
    &MODELS_TABLE,
    &REPLACEMENTS_TABLE,
    &REVIEWS_TABLE,
    &STORIES_TABLE,
    &QNA_TABLE,
];

// ===== Records =====

/// A part, keyed by the vendor-assigned manufacturer code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartRecord {
    pub manufacturer_id: String,
    pub catalog_id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub availability: Option<bool>,
    pub price: Option<f64>,
    pub difficulty: Option<String>,
    pub time: Option<String>,
    pub rating: Option<f64>,
    pub description: Option<String>,
    pub fixes: Option<String>,
    pub part_replacements: Option<String>,
    pub products: Option<String>,
    pub related_parts: Option<String>,
}

impl PartRecord {
    pub fn new(manufacturer_id: impl Into<String>) -> Self {
        Self {
            manufacturer_id: manufacturer_id.into(),
            ..Default::default()
        }
    }

    /// Names of the scrapable fields that are still empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let checks: [(&'static str, bool); 13] = [
            ("catalog_id", self.catalog_id.is_none()),
            ("name", self.name.is_none()),
            ("url", self.url.is_none()),
            ("availability", self.availability.is_none()),
            ("price", self.price.is_none()),
            ("difficulty", self.difficulty.is_none()),
            ("time", self.time.is_none()),
            ("rating", self.rating.is_none()),
            ("description", self.description.is_none()),
            ("fixes", self.fixes.is_none()),
            ("part_replacements", self.part_replacements.is_none()),
            ("products", self.products.is_none()),
            ("related_parts", self.related_parts.is_none()),
        ];
        for (name, is_missing) in checks {
            if is_missing {
                missing.push(name);
            }
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

impl Record for PartRecord {
    const TABLE: &'static TableDescriptor = &PARTS_TABLE;

    fn key(&self) -> Value {
        Value::Text(self.manufacturer_id.clone())
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.manufacturer_id.clone()),
            text(&self.catalog_id),
            text(&self.name),
            text(&self.url),
            boolean(self.availability),
            real(self.price),
            text(&self.difficulty),
            text(&self.time),
            real(self.rating),
            text(&self.description),
            text(&self.fixes),
            text(&self.part_replacements),
            text(&self.products),
            text(&self.related_parts),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            manufacturer_id: row.get(0)?,
            catalog_id: row.get(1)?,
            name: row.get(2)?,
            url: row.get(3)?,
            availability: row.get(4)?,
            price: row.get(5)?,
            difficulty: row.get(6)?,
            time: row.get(7)?,
            rating: row.get(8)?,
            description: row.get(9)?,
            fixes: row.get(10)?,
            part_replacements: row.get(11)?,
            products: row.get(12)?,
            related_parts: row.get(13)?,
        })
    }
}

/// An appliance model, keyed by the vendor model number
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelRecord {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Comma-joined catalog ids in listing order
    pub parts: Option<String>,
    pub symptoms: Option<String>,
}

impl ModelRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

impl Record for ModelRecord {
    const TABLE: &'static TableDescriptor = &MODELS_TABLE;

    fn key(&self) -> Value {
        Value::Text(self.id.clone())
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.clone()),
            text(&self.name),
            text(&self.description),
            text(&self.parts),
            text(&self.symptoms),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            parts: row.get(3)?,
            symptoms: row.get(4)?,
        })
    }
}

/// One "replaces these" entry of a part; the id is assigned by SQLite
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementRecord {
    pub replacement_id: Option<i64>,
    pub manufacturer_id: String,
    pub replacement_text: String,
}

impl ReplacementRecord {
    pub fn new(manufacturer_id: impl Into<String>, replacement_text: impl Into<String>) -> Self {
        Self {
            replacement_id: None,
            manufacturer_id: manufacturer_id.into(),
            replacement_text: replacement_text.into(),
        }
    }
}

impl Record for ReplacementRecord {
    const TABLE: &'static TableDescriptor = &REPLACEMENTS_TABLE;

    fn key(&self) -> Value {
        integer(self.replacement_id)
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            integer(self.replacement_id),
            Value::Text(self.manufacturer_id.clone()),
            Value::Text(self.replacement_text.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            replacement_id: row.get(0)?,
            manufacturer_id: row.get(1)?,
            replacement_text: row.get(2)?,
        })
    }
}

impl PartOwned for ReplacementRecord {
    fn manufacturer_id(&self) -> &str {
        &self.manufacturer_id
    }
}

/// A customer review
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub review_id: String,
    pub manufacturer_id: String,
    pub header: Option<String>,
    pub text: Option<String>,
}

impl ReviewRecord {
    pub fn new(
        manufacturer_id: impl Into<String>,
        header: Option<String>,
        text: Option<String>,
    ) -> Self {
        let manufacturer_id = manufacturer_id.into();
        let review_id = dedup_id(&manufacturer_id, &[header.as_deref(), text.as_deref()]);
        Self {
            review_id,
            manufacturer_id,
            header,
            text,
        }
    }
}

impl Record for ReviewRecord {
    const TABLE: &'static TableDescriptor = &REVIEWS_TABLE;

    fn key(&self) -> Value {
        Value::Text(self.review_id.clone())
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.review_id.clone()),
            Value::Text(self.manufacturer_id.clone()),
            text(&self.header),
            text(&self.text),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            review_id: row.get(0)?,
            manufacturer_id: row.get(1)?,
            header: row.get(2)?,
            text: row.get(3)?,
        })
    }
}

impl PartOwned for ReviewRecord {
    fn manufacturer_id(&self) -> &str {
        &self.manufacturer_id
    }
}

/// A customer repair story
#[derive(Debug, Clone, PartialEq)]
pub struct StoryRecord {
    pub story_id: String,
    pub manufacturer_id: String,
    pub title: Option<String>,
    pub text: Option<String>,
}

impl StoryRecord {
    pub fn new(
        manufacturer_id: impl Into<String>,
        title: Option<String>,
        text: Option<String>,
    ) -> Self {
        let manufacturer_id = manufacturer_id.into();
        let story_id = dedup_id(&manufacturer_id, &[title.as_deref(), text.as_deref()]);
        Self {
            story_id,
            manufacturer_id,
            title,
            text,
        }
    }
}

impl Record for StoryRecord {
    const TABLE: &'static TableDescriptor = &STORIES_TABLE;

    fn key(&self) -> Value {
        Value::Text(self.story_id.clone())
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.story_id.clone()),
            Value::Text(self.manufacturer_id.clone()),
            text(&self.title),
            text(&self.text),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            story_id: row.get(0)?,
            manufacturer_id: row.get(1)?,
            title: row.get(2)?,
            text: row.get(3)?,
        })
    }
}

impl PartOwned for StoryRecord {
    fn manufacturer_id(&self) -> &str {
        &self.manufacturer_id
    }
}

/// A question and its answer, optionally tied to a model number
#[derive(Debug, Clone, PartialEq)]
pub struct QnaRecord {
    pub qna_id: String,
    pub manufacturer_id: String,
    pub question: Option<String>,
    pub model_number: Option<String>,
    pub answer: Option<String>,
}

impl QnaRecord {
    pub fn new(
        manufacturer_id: impl Into<String>,
        question: Option<String>,
        model_number: Option<String>,
        answer: Option<String>,
    ) -> Self {
        let manufacturer_id = manufacturer_id.into();
        let qna_id = dedup_id(
            &manufacturer_id,
            &[
                question.as_deref(),
                model_number.as_deref(),
                answer.as_deref(),
            ],
        );
        Self {
            qna_id,
            manufacturer_id,
            question,
            model_number,
            answer,
        }
    }
}

impl Record for QnaRecord {
    const TABLE: &'static TableDescriptor = &QNA_TABLE;

    fn key(&self) -> Value {
        Value::Text(self.qna_id.clone())
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.qna_id.clone()),
            Value::Text(self.manufacturer_id.clone()),
            text(&self.question),
            text(&self.model_number),
            text(&self.answer),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            qna_id: row.get(0)?,
            manufacturer_id: row.get(1)?,
            question: row.get(2)?,
            model_number: row.get(3)?,
            answer: row.get(4)?,
        })
    }
}

impl PartOwned for QnaRecord {
    fn manufacturer_id(&self) -> &str {
        &self.manufacturer_id
    }
}
