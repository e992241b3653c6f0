use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{CuratedListsRepo, RepoError},
    domain::curated::CuratedList,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct CuratedListRow {
    slug: String,
    label: String,
    description: String,
    movie_slugs: Vec<String>,
    is_active: bool,
    display_order: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<CuratedListRow> for CuratedList {
    fn from(row: CuratedListRow) -> Self {
        Self {
            slug: row.slug,
            label: row.label,
            description: row.description,
            movie_slugs: row.movie_slugs,
            is_active: row.is_active,
            display_order: row.display_order,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}

#[async_trait]
impl CuratedListsRepo for PostgresRepositories {
    async fn active_lists(&self) -> Result<Vec<CuratedList>, RepoError> {
        let rows = sqlx::query_as::<_, CuratedListRow>(
            r#"
            SELECT slug, label, description, movie_slugs, is_active, display_order,
                   created_at, updated_at
            FROM curated_lists
            WHERE is_active
            ORDER BY display_order, slug
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CuratedList::from).collect())
    }

    async fn find_list(&self, slug: &str) -> Result<Option<CuratedList>, RepoError> {
        let row = sqlx::query_as::<_, CuratedListRow>(
            r#"
            SELECT slug, label, description, movie_slugs, is_active, display_order,
                   created_at, updated_at
            FROM curated_lists
            WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CuratedList::from))
    }

    async fn upsert_list(&self, list: &CuratedList) -> Result<CuratedList, RepoError> {
        list.validate().map_err(|err| RepoError::InvalidInput {
            message: err.to_string(),
        })?;

        let row = sqlx::query_as::<_, CuratedListRow>(
            r#"
            INSERT INTO curated_lists (
                slug, label, description, movie_slugs, is_active, display_order
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (slug) DO UPDATE SET
                label = EXCLUDED.label,
                description = EXCLUDED.description,
                movie_slugs = EXCLUDED.movie_slugs,
                is_active = EXCLUDED.is_active,
                display_order = EXCLUDED.display_order,
                updated_at = now()
            RETURNING slug, label, description, movie_slugs, is_active, display_order,
                      created_at, updated_at
            "#,
        )
        .bind(&list.slug)
        .bind(&list.label)
        .bind(&list.description)
        .bind(&list.movie_slugs)
        .bind(list.is_active)
        .bind(list.display_order)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }
}
