//! In-process query evaluation over a slice of movies.
//!
//! Used when answering from the snapshot, so filtering, ordering and paging
//! match what the primary store does.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use crate::domain::movies::MovieRecord;
use crate::domain::slug::{movie_slug, parse_movie_slug};

use super::repos::{BrowseFilter, MovieSort};

pub const MIN_SEARCH_LEN: usize = 2;

const SCORE_EXACT_TITLE: u32 = 100;
const SCORE_TITLE_PREFIX: u32 = 75;
const SCORE_TITLE_SUBSTRING: u32 = 50;
const SCORE_TITLE_WORD: u32 = 25;
const SCORE_DIRECTOR: u32 = 20;
const SCORE_DIRECTOR_WORD: u32 = 10;
const SCORE_CAST: u32 = 15;
const SCORE_CAST_WORD: u32 = 8;
const SCORE_GENRE: u32 = 5;
const SCORE_SYNOPSIS: u32 = 3;

/// Query words long enough to score on their own.
pub fn search_words(query: &str) -> Vec<&str> {
    query
        .split_whitespace()
        .filter(|word| word.len() > 2)
        .collect()
}

/// Relevance of `movie` for an already-normalized query. Zero means no match.
pub fn search_score(movie: &MovieRecord, query: &str) -> u32 {
    let words = search_words(query);
    let has_word = |text: &str| words.iter().any(|word| text.contains(word));
    let mut score = 0;

    let title = movie.title.to_lowercase();
    if title == query {
        score += SCORE_EXACT_TITLE;
    } else if title.starts_with(query) {
        score += SCORE_TITLE_PREFIX;
    } else if title.contains(query) {
        score += SCORE_TITLE_SUBSTRING;
    } else if has_word(&title) {
        score += SCORE_TITLE_WORD;
    }

    if let Some(director) = &movie.director {
        let director = director.to_lowercase();
        if director.contains(query) {
            score += SCORE_DIRECTOR;
        } else if has_word(&director) {
            score += SCORE_DIRECTOR_WORD;
        }
    }

    let cast: Vec<String> = movie.cast.iter().map(|actor| actor.to_lowercase()).collect();
    if cast.iter().any(|actor| actor.contains(query)) {
        score += SCORE_CAST;
    } else if cast.iter().any(|actor| has_word(actor)) {
        score += SCORE_CAST_WORD;
    }

    if movie
        .genres
        .iter()
        .any(|genre| genre.to_lowercase().contains(query))
    {
        score += SCORE_GENRE;
    }

    if movie.synopsis.to_lowercase().contains(query) {
        score += SCORE_SYNOPSIS;
    }

    score
}

/// Rank movies by relevance, highest first; ties keep rating order.
pub fn rank_search(movies: &[MovieRecord], query: &str, limit: usize) -> Vec<MovieRecord> {
    let query = query.trim().to_lowercase();
    if query.chars().count() < MIN_SEARCH_LEN {
        return Vec::new();
    }

    let mut scored: Vec<(u32, &MovieRecord)> = movies
        .iter()
        .map(|movie| (search_score(movie, &query), movie))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|(left_score, left), (right_score, right)| {
        right_score
            .cmp(left_score)
            .then_with(|| by_rating(left, right))
    });
    scored
        .into_iter()
        .take(limit)
        .map(|(_, movie)| movie.clone())
        .collect()
}

fn desc_f64(left: Option<f64>, right: Option<f64>) -> Ordering {
    right
        .unwrap_or(f64::MIN)
        .total_cmp(&left.unwrap_or(f64::MIN))
}

fn by_rating(left: &MovieRecord, right: &MovieRecord) -> Ordering {
    desc_f64(left.rating, right.rating).then_with(|| right.vote_count.cmp(&left.vote_count))
}

pub fn sort_movies(movies: &mut [MovieRecord], sort: MovieSort) {
    match sort {
        MovieSort::Rating => movies.sort_by(by_rating),
        MovieSort::Year => movies.sort_by(|a, b| b.year.cmp(&a.year).then_with(|| by_rating(a, b))),
        MovieSort::Popularity => movies.sort_by(|a, b| {
            desc_f64(a.popularity, b.popularity).then_with(|| by_rating(a, b))
        }),
        MovieSort::Title => movies.sort_by_key(|movie| movie.title.to_lowercase()),
    }
}

/// Filter, sort and page. Returns the page plus the total number of matches.
pub fn browse(
    movies: &[MovieRecord],
    filter: &BrowseFilter,
    sort: MovieSort,
    skip: usize,
    limit: usize,
) -> (Vec<MovieRecord>, u64) {
    let mut matching: Vec<MovieRecord> = movies
        .iter()
        .filter(|movie| filter.matches(movie))
        .cloned()
        .collect();
    let total = matching.len() as u64;
    sort_movies(&mut matching, sort);
    let page = matching.into_iter().skip(skip).take(limit).collect();
    (page, total)
}

/// Rated movies, best first.
pub fn top_rated(movies: &[MovieRecord], limit: usize) -> Vec<MovieRecord> {
    let mut rated: Vec<MovieRecord> = movies
        .iter()
        .filter(|movie| movie.rating.is_some())
        .cloned()
        .collect();
    sort_movies(&mut rated, MovieSort::Rating);
    rated.truncate(limit);
    rated
}

/// Movies sharing at least one genre with `target`, by overlap then rating.
pub fn related(movies: &[MovieRecord], target: &MovieRecord, limit: usize) -> Vec<MovieRecord> {
    let genres: HashSet<&str> = target.genres.iter().map(String::as_str).collect();
    let mut scored: Vec<(usize, &MovieRecord)> = movies
        .iter()
        .filter(|movie| movie.slug != target.slug)
        .map(|movie| {
            let overlap = movie
                .genres
                .iter()
                .filter(|genre| genres.contains(genre.as_str()))
                .count();
            (overlap, movie)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .collect();
    scored.sort_by(|(left_overlap, left), (right_overlap, right)| {
        right_overlap
            .cmp(left_overlap)
            .then_with(|| desc_f64(left.rating, right.rating))
    });
    scored
        .into_iter()
        .take(limit)
        .map(|(_, movie)| movie.clone())
        .collect()
}

/// Find by slug, falling back to a title-and-year match for legacy slugs.
pub fn find_by_slug<'a>(movies: &'a [MovieRecord], slug: &str) -> Option<&'a MovieRecord> {
    if let Some(movie) = movies.iter().find(|movie| movie.slug == slug) {
        return Some(movie);
    }
    let (title_part, year) = parse_movie_slug(slug);
    movies.iter().find(|movie| {
        movie_slug(&movie.title, None) == title_part && year.is_none_or(|y| movie.year == Some(y))
    })
}

pub fn distinct_genres(movies: &[MovieRecord]) -> Vec<String> {
    movies
        .iter()
        .flat_map(|movie| movie.genres.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn distinct_services(movies: &[MovieRecord]) -> Vec<String> {
    movies
        .iter()
        .flat_map(|movie| movie.streaming_providers())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
