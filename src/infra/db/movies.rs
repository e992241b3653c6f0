use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::PgArguments,
    query::Query,
    types::Json,
};
use time::OffsetDateTime;

use crate::{
    application::{
        ranking::{self, MIN_SEARCH_LEN},
        repos::{
            BrowseFilter, InsertOutcome, MovieSort, MoviesRepo, MoviesWriteRepo, RepoError,
        },
    },
    domain::{
        movies::{MovieEdit, MovieRecord, StreamingAvailability},
        slug::parse_movie_slug,
    },
};

use super::{PostgresRepositories, map_sqlx_error, util::like_escape};

const MOVIE_COLUMNS: &str = "slug, title, year, genres, rating, vote_count, popularity, \
    synopsis, cast_members, director, runtime_minutes, original_language, poster_url, \
    backdrop_url, trailer_url, external_ids, streaming, streaming_services, source_urls";

const INSERT_MOVIE: &str = r#"
    INSERT INTO movies (
        slug, title, year, genres, rating, vote_count, popularity, synopsis,
        cast_members, director, runtime_minutes, original_language, poster_url,
        backdrop_url, trailer_url, external_ids, streaming, streaming_services,
        streaming_providers, availability_types, source_urls
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
        $17, $18, $19, $20, $21
    )
"#;

const UPSERT_CONFLICT: &str = r#"
    ON CONFLICT (slug) DO UPDATE SET
        title = EXCLUDED.title,
        year = EXCLUDED.year,
        genres = EXCLUDED.genres,
        rating = EXCLUDED.rating,
        vote_count = EXCLUDED.vote_count,
        popularity = EXCLUDED.popularity,
        synopsis = EXCLUDED.synopsis,
        cast_members = EXCLUDED.cast_members,
        director = EXCLUDED.director,
        runtime_minutes = EXCLUDED.runtime_minutes,
        original_language = EXCLUDED.original_language,
        poster_url = EXCLUDED.poster_url,
        backdrop_url = EXCLUDED.backdrop_url,
        trailer_url = EXCLUDED.trailer_url,
        external_ids = EXCLUDED.external_ids,
        streaming = EXCLUDED.streaming,
        streaming_services = EXCLUDED.streaming_services,
        streaming_providers = EXCLUDED.streaming_providers,
        availability_types = EXCLUDED.availability_types,
        source_urls = EXCLUDED.source_urls,
        updated_at = now()
"#;

const INSERT_CONFLICT_SKIP: &str = " ON CONFLICT (slug) DO NOTHING";

const LAST_REFRESH_KEY: &str = "last_refresh";

#[derive(sqlx::FromRow)]
struct MovieRow {
    slug: String,
    title: String,
    year: Option<i32>,
    genres: Vec<String>,
    rating: Option<f64>,
    vote_count: Option<i64>,
    popularity: Option<f64>,
    synopsis: String,
    cast_members: Vec<String>,
    director: Option<String>,
    runtime_minutes: Option<i32>,
    original_language: Option<String>,
    poster_url: Option<String>,
    backdrop_url: Option<String>,
    trailer_url: Option<String>,
    external_ids: Json<BTreeMap<String, String>>,
    streaming: Json<StreamingAvailability>,
    streaming_services: Vec<String>,
    source_urls: Vec<String>,
}

impl From<MovieRow> for MovieRecord {
    fn from(row: MovieRow) -> Self {
        Self {
            slug: row.slug,
            title: row.title,
            year: row.year,
            genres: row.genres,
            rating: row.rating,
            vote_count: row.vote_count,
            popularity: row.popularity,
            synopsis: row.synopsis,
            cast: row.cast_members,
            director: row.director,
            runtime_minutes: row.runtime_minutes,
            original_language: row.original_language,
            poster_url: row.poster_url,
            backdrop_url: row.backdrop_url,
            trailer_url: row.trailer_url,
            external_ids: row.external_ids.0,
            streaming: row.streaming.0,
            streaming_services: row.streaming_services,
            source_urls: row.source_urls,
        }
    }
}

fn bind_movie<'q>(
    query: Query<'q, Postgres, PgArguments>,
    movie: &MovieRecord,
) -> Query<'q, Postgres, PgArguments> {
    let availability: Vec<String> = movie
        .streaming
        .availability_types()
        .into_iter()
        .map(|kind| kind.as_str().to_string())
        .collect();

    query
        .bind(movie.slug.clone())
        .bind(movie.title.clone())
        .bind(movie.year)
        .bind(movie.genres.clone())
        .bind(movie.rating)
        .bind(movie.vote_count)
        .bind(movie.popularity)
        .bind(movie.synopsis.clone())
        .bind(movie.cast.clone())
        .bind(movie.director.clone())
        .bind(movie.runtime_minutes)
        .bind(movie.original_language.clone())
        .bind(movie.poster_url.clone())
        .bind(movie.backdrop_url.clone())
        .bind(movie.trailer_url.clone())
        .bind(Json(movie.external_ids.clone()))
        .bind(Json(movie.streaming.clone()))
        .bind(movie.streaming_services.clone())
        .bind(movie.streaming_providers())
        .bind(availability)
        .bind(movie.source_urls.clone())
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &BrowseFilter) {
    let filter = filter.normalized();
    if let Some(genre) = filter.genre {
        qb.push(" AND ");
        qb.push_bind(genre);
        qb.push(" = ANY(genres)");
    }
    if let Some(service) = filter.service {
        qb.push(" AND ");
        qb.push_bind(service);
        qb.push(" = ANY(streaming_providers)");
    }
    if let Some(availability) = filter.availability {
        qb.push(" AND ");
        qb.push_bind(availability.as_str());
        qb.push(" = ANY(availability_types)");
    }
    if let Some(min_rating) = filter.min_rating {
        qb.push(" AND rating >= ");
        qb.push_bind(min_rating);
    }
}

fn order_clause(sort: MovieSort) -> &'static str {
    match sort {
        MovieSort::Rating => " ORDER BY rating DESC NULLS LAST, vote_count DESC NULLS LAST, slug",
        MovieSort::Year => " ORDER BY year DESC NULLS LAST, rating DESC NULLS LAST, slug",
        MovieSort::Popularity => {
            " ORDER BY popularity DESC NULLS LAST, rating DESC NULLS LAST, slug"
        }
        MovieSort::Title => " ORDER BY LOWER(title), slug",
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64, RepoError> {
    i64::try_from(value).map_err(|_| RepoError::InvalidInput {
        message: format!("{field} exceeds supported range"),
    })
}

#[async_trait]
impl MoviesRepo for PostgresRepositories {
    async fn find(
        &self,
        filter: &BrowseFilter,
        sort: MovieSort,
        skip: u64,
        limit: u32,
    ) -> Result<Vec<MovieRecord>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(MOVIE_COLUMNS);
        qb.push(" FROM movies WHERE TRUE");
        push_filter(&mut qb, filter);
        qb.push(order_clause(sort));
        qb.push(" OFFSET ");
        qb.push_bind(to_i64(skip, "skip")?);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<MovieRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(MovieRecord::from).collect())
    }

    async fn count(&self, filter: &BrowseFilter) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM movies WHERE TRUE");
        push_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<MovieRecord>, RepoError> {
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE slug = $1");
        let row = sqlx::query_as::<_, MovieRow>(&sql)
            .bind(slug)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        if let Some(row) = row {
            return Ok(Some(row.into()));
        }

        // Legacy slugs: match on the title part and let the year disambiguate.
        let (title_part, _) = parse_movie_slug(slug);
        if title_part.is_empty() {
            return Ok(None);
        }
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE slug LIKE $1 LIMIT 50");
        let candidates: Vec<MovieRecord> = sqlx::query_as::<_, MovieRow>(&sql)
            .bind(format!("{}%", like_escape(&title_part)))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(MovieRecord::from)
            .collect();

        Ok(ranking::find_by_slug(&candidates, slug).cloned())
    }

    async fn related(
        &self,
        movie: &MovieRecord,
        limit: u32,
    ) -> Result<Vec<MovieRecord>, RepoError> {
        let rows = if movie.genres.is_empty() {
            let sql = format!(
                "SELECT {MOVIE_COLUMNS} FROM movies WHERE slug <> $1 ORDER BY random() LIMIT $2"
            );
            sqlx::query_as::<_, MovieRow>(&sql)
                .bind(&movie.slug)
                .bind(i64::from(limit))
                .fetch_all(self.pool())
                .await
        } else {
            let sql = format!(
                "SELECT {MOVIE_COLUMNS} FROM movies \
                 WHERE slug <> $1 AND genres && $2 \
                 ORDER BY rating DESC NULLS LAST, vote_count DESC NULLS LAST \
                 LIMIT $3"
            );
            sqlx::query_as::<_, MovieRow>(&sql)
                .bind(&movie.slug)
                .bind(&movie.genres)
                .bind(i64::from(limit))
                .fetch_all(self.pool())
                .await
        }
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(MovieRecord::from).collect())
    }

    async fn top_rated(&self, limit: u32) -> Result<Vec<MovieRecord>, RepoError> {
        let sql = format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE rating IS NOT NULL \
             ORDER BY rating DESC, vote_count DESC NULLS LAST LIMIT $1"
        );
        let rows = sqlx::query_as::<_, MovieRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(MovieRecord::from).collect())
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<MovieRecord>, RepoError> {
        let query = query.trim().to_lowercase();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }
        let escaped = like_escape(&query);

        let sql = format!(
            r#"
            SELECT {MOVIE_COLUMNS} FROM (
                SELECT *,
                    (CASE
                        WHEN LOWER(title) = $1 THEN 100
                        WHEN LOWER(title) LIKE $2 THEN 75
                        WHEN LOWER(title) LIKE $3 THEN 50
                        WHEN LOWER(title) LIKE ANY($5) THEN 25
                        ELSE 0
                     END
                     + CASE
                        WHEN LOWER(COALESCE(director, '')) LIKE $3 THEN 20
                        WHEN LOWER(COALESCE(director, '')) LIKE ANY($5) THEN 10
                        ELSE 0
                       END
                     + CASE
                        WHEN EXISTS (
                            SELECT 1 FROM unnest(cast_members) AS member WHERE LOWER(member) LIKE $3
                        ) THEN 15
                        WHEN EXISTS (
                            SELECT 1 FROM unnest(cast_members) AS member
                            WHERE LOWER(member) LIKE ANY($5)
                        ) THEN 8
                        ELSE 0
                       END
                     + CASE WHEN EXISTS (
                           SELECT 1 FROM unnest(genres) AS genre WHERE LOWER(genre) LIKE $3
                       ) THEN 5 ELSE 0 END
                     + CASE WHEN LOWER(synopsis) LIKE $3 THEN 3 ELSE 0 END
                    ) AS score
                FROM movies
            ) ranked
            WHERE score > 0
            ORDER BY score DESC, rating DESC NULLS LAST, vote_count DESC NULLS LAST
            LIMIT $4
            "#
        );

        let rows = sqlx::query_as::<_, MovieRow>(&sql)
            .bind(&query)
            .bind(format!("{escaped}%"))
            .bind(format!("%{escaped}%"))
            .bind(i64::from(limit))
            .bind(word_patterns(&query))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(MovieRecord::from).collect())
    }

    async fn distinct_genres(&self) -> Result<Vec<String>, RepoError> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT genre FROM movies, unnest(genres) AS genre ORDER BY genre",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn distinct_services(&self) -> Result<Vec<String>, RepoError> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT provider FROM movies, unnest(streaming_providers) AS provider \
             ORDER BY provider",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn total_count(&self) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }

    async fn last_refresh(&self) -> Result<Option<OffsetDateTime>, RepoError> {
        sqlx::query_scalar::<_, OffsetDateTime>(
            "SELECT refreshed_at FROM store_metadata WHERE key = $1",
        )
        .bind(LAST_REFRESH_KEY)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.ping().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl MoviesWriteRepo for PostgresRepositories {
    async fn upsert_many(&self, movies: &[MovieRecord]) -> Result<u64, RepoError> {
        let sql = format!("{INSERT_MOVIE}{UPSERT_CONFLICT}");
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let mut written = 0;
        for movie in movies {
            let result = bind_movie(sqlx::query(&sql), movie)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(written)
    }

    async fn insert_new_only(&self, movies: &[MovieRecord]) -> Result<InsertOutcome, RepoError> {
        let sql = format!("{INSERT_MOVIE}{INSERT_CONFLICT_SKIP}");
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let mut outcome = InsertOutcome::default();
        for movie in movies {
            let result = bind_movie(sqlx::query(&sql), movie)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            if result.rows_affected() == 0 {
                outcome.skipped += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(outcome)
    }

    async fn update_movie(&self, slug: &str, edit: &MovieEdit) -> Result<MovieRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let select = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE slug = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, MovieRow>(&select)
            .bind(slug)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?;

        let mut movie = MovieRecord::from(row);
        edit.apply(&mut movie);

        let sql = format!("{INSERT_MOVIE}{UPSERT_CONFLICT}");
        bind_movie(sqlx::query(&sql), &movie)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(movie)
    }

    async fn delete_movie(&self, slug: &str) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM movies WHERE slug = $1")
            .bind(slug)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn set_last_refresh(&self, at: OffsetDateTime) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO store_metadata (key, refreshed_at)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET refreshed_at = EXCLUDED.refreshed_at
            "#,
        )
        .bind(LAST_REFRESH_KEY)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

/// `LIKE` patterns for the per-word relevance tiers.
fn word_patterns(query: &str) -> Vec<String> {
    ranking::search_words(query)
        .into_iter()
        .map(|word| format!("%{}%", like_escape(word)))
        .collect()
}
