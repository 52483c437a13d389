//! Repositories over the users and movies collections
//!
//! Handlers talk to these traits; `Mongo*Repository` is the production
//! implementation and `db::memory` provides in-process ones for tests.
//! Malformed ids are treated as "not found".

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime};
use std::sync::Arc;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{MovieChanges, MovieDoc, UserDoc, MOVIE_COLLECTION, USER_COLLECTION};
use crate::types::{MarqueeError, Result};

pub fn parse_object_id(id: &str) -> Option<ObjectId> {
    ObjectId::parse_str(id.trim()).ok()
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserDoc>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<UserDoc>>;

    /// Store a new user. A taken email is `MarqueeError::Conflict`.
    async fn create(&self, user: UserDoc) -> Result<UserDoc>;

    /// Add to the user's favorites (no-op if present). `None` if no such user.
    async fn add_favorite(&self, user_id: &str, movie_id: &str) -> Result<Option<Vec<String>>>;

    /// Remove from the user's favorites. `None` if no such user.
    async fn remove_favorite(&self, user_id: &str, movie_id: &str)
        -> Result<Option<Vec<String>>>;
}

#[async_trait]
pub trait MovieRepository: Send + Sync {
    /// All movies, newest first
    async fn list(&self) -> Result<Vec<MovieDoc>>;

    async fn get(&self, id: &str) -> Result<Option<MovieDoc>>;

    async fn create(&self, movie: MovieDoc) -> Result<MovieDoc>;

    async fn update(&self, id: &str, changes: MovieChanges) -> Result<Option<MovieDoc>>;

    /// Hard delete. Returns whether a movie was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove every movie, returning the count
    async fn delete_all(&self) -> Result<u64>;
}

pub type SharedUsers = Arc<dyn UserRepository>;
pub type SharedMovies = Arc<dyn MovieRepository>;

#[derive(Clone)]
pub struct MongoUserRepository {
    users: MongoCollection<UserDoc>,
}

impl MongoUserRepository {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            users: client.collection(USER_COLLECTION).await?,
        })
    }

    async fn favorites_of(&self, oid: ObjectId) -> Result<Option<Vec<String>>> {
        Ok(self
            .users
            .find_one(doc! { "_id": oid })
            .await?
            .map(|user| user.favorites))
    }
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "email": email }).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserDoc>> {
        match parse_object_id(id) {
            Some(oid) => self.users.find_one(doc! { "_id": oid }).await,
            None => Ok(None),
        }
    }

    async fn create(&self, mut user: UserDoc) -> Result<UserDoc> {
        let id = self.users.insert_one(user.clone()).await.map_err(|e| match e {
            MarqueeError::Conflict(_) => MarqueeError::Conflict("Email already in use".into()),
            other => other,
        })?;
        user._id = Some(id);
        Ok(user)
    }

    async fn add_favorite(&self, user_id: &str, movie_id: &str) -> Result<Option<Vec<String>>> {
        let Some(oid) = parse_object_id(user_id) else {
            return Ok(None);
        };

        let result = self
            .users
            .update_one(
                doc! { "_id": oid },
                doc! {
                    "$addToSet": { "favorites": movie_id },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Ok(None);
        }

        self.favorites_of(oid).await
    }

    async fn remove_favorite(
        &self,
        user_id: &str,
        movie_id: &str,
    ) -> Result<Option<Vec<String>>> {
        let Some(oid) = parse_object_id(user_id) else {
            return Ok(None);
        };

        let result = self
            .users
            .update_one(
                doc! { "_id": oid },
                doc! {
                    "$pull": { "favorites": movie_id },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Ok(None);
        }

        self.favorites_of(oid).await
    }
}

#[derive(Clone)]
pub struct MongoMovieRepository {
    movies: MongoCollection<MovieDoc>,
}

impl MongoMovieRepository {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            movies: client.collection(MOVIE_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl MovieRepository for MongoMovieRepository {
    async fn list(&self) -> Result<Vec<MovieDoc>> {
        self.movies
            .find_many(doc! {}, Some(doc! { "metadata.created_at": -1 }))
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<MovieDoc>> {
        match parse_object_id(id) {
            Some(oid) => self.movies.find_one(doc! { "_id": oid }).await,
            None => Ok(None),
        }
    }

    async fn create(&self, mut movie: MovieDoc) -> Result<MovieDoc> {
        let id = self.movies.insert_one(movie.clone()).await?;
        // Re-read so timestamps match what was stored
        match self.movies.find_one(doc! { "_id": id }).await? {
            Some(stored) => Ok(stored),
            None => {
                movie._id = Some(id);
                Ok(movie)
            }
        }
    }

    async fn update(&self, id: &str, changes: MovieChanges) -> Result<Option<MovieDoc>> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };

        if !changes.is_empty() {
            let result = self
                .movies
                .update_one(doc! { "_id": oid }, doc! { "$set": changes.to_set_document() })
                .await?;
            if result.matched_count == 0 {
                return Ok(None);
            }
        }

        self.movies.find_one(doc! { "_id": oid }).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(false);
        };
        let result = self.movies.delete_one(doc! { "_id": oid }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = self.movies.delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }
}
