//! Movie document schema

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for movies
pub const MOVIE_COLLECTION: &str = "movies";

/// Movie document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MovieDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    /// 0 to 10 inclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

impl MovieDoc {
    pub fn new(
        title: String,
        description: String,
        year: Option<i32>,
        rating: Option<f64>,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            title,
            description,
            year,
            rating,
        }
    }

    /// Client-facing representation
    pub fn to_view(&self) -> MovieView {
        MovieView {
            id: self._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: self.title.clone(),
            description: self.description.clone(),
            year: self.year,
            rating: self.rating,
            created_at: self.metadata.created_at.map(|d| d.to_chrono()),
            updated_at: self.metadata.updated_at.map(|d| d.to_chrono()),
        }
    }
}

/// Movie as returned by the API
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovieView {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub year: Option<i32>,
    pub rating: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update applied by `PUT /api/movies/:id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub rating: Option<f64>,
}

impl MovieChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.year.is_none()
            && self.rating.is_none()
    }

    /// `$set` document for the changed fields
    pub fn to_set_document(&self) -> Document {
        let mut set = doc! { "metadata.updated_at": bson::DateTime::now() };
        if let Some(title) = &self.title {
            set.insert("title", title.as_str());
        }
        if let Some(description) = &self.description {
            set.insert("description", description.as_str());
        }
        if let Some(year) = self.year {
            set.insert("year", year);
        }
        if let Some(rating) = self.rating {
            set.insert("rating", rating);
        }
        set
    }
}

impl IntoIndexes for MovieDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "metadata.created_at": -1 },
            Some(
                IndexOptions::builder()
                    .name("created_at_desc".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for MovieDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
