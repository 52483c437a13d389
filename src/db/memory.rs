//! In-process repositories for handler and lifecycle tests

use async_trait::async_trait;
use bson::oid::ObjectId;
use tokio::sync::RwLock;

use crate::db::repository::{parse_object_id, MovieRepository, UserRepository};
use crate::db::schemas::{Metadata, MovieChanges, MovieDoc, UserDoc};
use crate::types::{MarqueeError, Result};

/// Mirror of the `$set` the Mongo repository issues
fn apply_changes(changes: &MovieChanges, movie: &mut MovieDoc) {
    if let Some(title) = &changes.title {
        movie.title = title.clone();
    }
    if let Some(description) = &changes.description {
        movie.description = description.clone();
    }
    if changes.year.is_some() {
        movie.year = changes.year;
    }
    if changes.rating.is_some() {
        movie.rating = changes.rating;
    }
    movie.metadata.touch();
}

#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<Vec<UserDoc>>,
}

impl MemoryUserRepository {
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    async fn update_favorites<F>(&self, user_id: &str, f: F) -> Result<Option<Vec<String>>>
    where
        F: FnOnce(&mut Vec<String>) + Send,
    {
        let Some(oid) = parse_object_id(user_id) else {
            return Ok(None);
        };
        let mut users = self.users.write().await;
        Ok(users.iter_mut().find(|u| u._id == Some(oid)).map(|user| {
            f(&mut user.favorites);
            user.metadata.touch();
            user.favorites.clone()
        }))
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserDoc>> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u._id == Some(oid)).cloned())
    }

    async fn create(&self, mut user: UserDoc) -> Result<UserDoc> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == user.email) {
            return Err(MarqueeError::Conflict("Email already in use".into()));
        }
        user._id = Some(ObjectId::new());
        user.metadata = Metadata::new();
        users.push(user.clone());
        Ok(user)
    }

    async fn add_favorite(&self, user_id: &str, movie_id: &str) -> Result<Option<Vec<String>>> {
        let movie_id = movie_id.to_string();
        self.update_favorites(user_id, move |favorites| {
            if !favorites.contains(&movie_id) {
                favorites.push(movie_id);
            }
        })
        .await
    }

    async fn remove_favorite(
        &self,
        user_id: &str,
        movie_id: &str,
    ) -> Result<Option<Vec<String>>> {
        let movie_id = movie_id.to_string();
        self.update_favorites(user_id, move |favorites| {
            favorites.retain(|f| *f != movie_id);
        })
        .await
    }
}

/// Movies kept in insertion order; listing reverses it
#[derive(Default)]
pub struct MemoryMovieRepository {
    movies: RwLock<Vec<MovieDoc>>,
}

#[async_trait]
impl MovieRepository for MemoryMovieRepository {
    async fn list(&self) -> Result<Vec<MovieDoc>> {
        Ok(self.movies.read().await.iter().rev().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<MovieDoc>> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };
        let movies = self.movies.read().await;
        Ok(movies.iter().find(|m| m._id == Some(oid)).cloned())
    }

    async fn create(&self, mut movie: MovieDoc) -> Result<MovieDoc> {
        movie._id = Some(ObjectId::new());
        movie.metadata = Metadata::new();
        self.movies.write().await.push(movie.clone());
        Ok(movie)
    }

    async fn update(&self, id: &str, changes: MovieChanges) -> Result<Option<MovieDoc>> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };
        let mut movies = self.movies.write().await;
        Ok(movies.iter_mut().find(|m| m._id == Some(oid)).map(|movie| {
            if !changes.is_empty() {
                apply_changes(&changes, movie);
            }
            movie.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(false);
        };
        let mut movies = self.movies.write().await;
        let before = movies.len();
        movies.retain(|m| m._id != Some(oid));
        Ok(movies.len() < before)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut movies = self.movies.write().await;
        let count = movies.len() as u64;
        movies.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_favorites_have_set_semantics() {
        let repo = MemoryUserRepository::default();
        let user = repo
            .create(UserDoc::new("Ann".into(), "ann@example.com".into(), "h".into()))
            .await
            .unwrap();
        let id = user.id_hex();

        repo.add_favorite(&id, "550").await.unwrap();
        let favorites = repo.add_favorite(&id, "550").await.unwrap().unwrap();
        assert_eq!(favorites, vec!["550".to_string()]);

        let favorites = repo.remove_favorite(&id, "550").await.unwrap().unwrap();
        assert!(favorites.is_empty());

        assert!(repo.add_favorite("not-an-id", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let repo = MemoryUserRepository::default();
        let doc = UserDoc::new("Ann".into(), "ann@example.com".into(), "h".into());
        repo.create(doc.clone()).await.unwrap();
        assert!(matches!(
            repo.create(doc).await,
            Err(MarqueeError::Conflict(_))
        ));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_movies_newest_first() {
        let repo = MemoryMovieRepository::default();
        for title in ["A", "B", "C"] {
            repo.create(MovieDoc::new(title.into(), String::new(), None, None))
                .await
                .unwrap();
        }
        let titles: Vec<String> = repo.list().await.unwrap().into_iter().map(|m| m.title).collect();
        assert_eq!(titles, vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn test_update_keeps_unchanged_fields() {
        let repo = MemoryMovieRepository::default();
        let movie = repo
            .create(MovieDoc::new("Heat".into(), "Crime".into(), Some(1995), None))
            .await
            .unwrap();
        let id = movie._id.unwrap().to_hex();

        let changes = MovieChanges {
            rating: Some(8.3),
            ..Default::default()
        };
        let updated = repo.update(&id, changes).await.unwrap().unwrap();
        assert_eq!(updated.title, "Heat");
        assert_eq!(updated.description, "Crime");
        assert_eq!(updated.year, Some(1995));
        assert_eq!(updated.rating, Some(8.3));
    }
}
