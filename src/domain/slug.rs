//! Utilities for generating deterministic, human-friendly movie slugs.
//!
//! A movie slug is the slugified title (capped at [`MAX_TITLE_SLUG_LEN`]
//! characters) followed by `-{year}` when the year is known, e.g.
//! `the-dark-knight-2008`. [`parse_movie_slug`] inverts the year suffix so
//! legacy links without a stored slug can still be resolved.

use slug::slugify;
use thiserror::Error;

pub const MAX_TITLE_SLUG_LEN: usize = 50;
const FALLBACK_SLUG: &str = "movie";
const MIN_YEAR: i32 = 1880;
const MAX_YEAR: i32 = 2100;

/// Errors that can occur while generating a slug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Derive a base slug from the provided human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let candidate = slugify(input);

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Build the canonical slug for a movie title and optional release year.
pub fn movie_slug(title: &str, year: Option<i32>) -> String {
    let base = derive_slug(title)
        .map(|slug| truncate_slug(&slug, MAX_TITLE_SLUG_LEN))
        .unwrap_or_else(|_| FALLBACK_SLUG.to_string());

    match year {
        Some(year) => format!("{base}-{year}"),
        None => base,
    }
}

/// Split a slug into its title part and trailing release year, if any.
///
/// Only a trailing four-digit segment within a plausible release range is
/// treated as a year; `blade-runner-2049-2017` yields `("blade-runner-2049", Some(2017))`.
pub fn parse_movie_slug(slug: &str) -> (String, Option<i32>) {
    if let Some((head, tail)) = slug.rsplit_once('-')
        && tail.len() == 4
        && tail.bytes().all(|b| b.is_ascii_digit())
        && let Ok(year) = tail.parse::<i32>()
        && (MIN_YEAR..=MAX_YEAR).contains(&year)
        && !head.is_empty()
    {
        return (head.to_string(), Some(year));
    }

    (slug.to_string(), None)
}

fn truncate_slug(slug: &str, max_len: usize) -> String {
    if slug.len() <= max_len {
        return slug.to_string();
    }
    // slugify output is ASCII, so byte slicing is safe.
    slug[..max_len].trim_end_matches('-').to_string()
}
