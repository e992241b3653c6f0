//! Values stored by the cache tier.

use serde::{Deserialize, Serialize};

use crate::domain::movies::MovieRecord;

use super::keys::CacheKind;

/// A cached query answer. Each variant belongs to exactly one [`CacheKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheValue {
    MovieRelated {
        movie: MovieRecord,
        related: Vec<MovieRecord>,
    },
    TopRated {
        movies: Vec<MovieRecord>,
    },
    Browse {
        movies: Vec<MovieRecord>,
        total: u64,
    },
    Search {
        movies: Vec<MovieRecord>,
    },
}

impl CacheValue {
    pub fn kind(&self) -> CacheKind {
        match self {
            Self::MovieRelated { .. } => CacheKind::MovieRelated,
            Self::TopRated { .. } => CacheKind::TopRated,
            Self::Browse { .. } => CacheKind::Browse,
            Self::Search { .. } => CacheKind::Search,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_self_describing() {
        let mut movie = MovieRecord::new("Inception", Some(2010));
        movie.rating = Some(8.8);
        let value = CacheValue::Browse {
            movies: vec![movie],
            total: 41,
        };

        let encoded = serde_json::to_string(&value).expect("encode");
        assert!(encoded.contains(r#""kind":"browse""#));

        let decoded: CacheValue = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, value);
        assert_eq!(decoded.kind(), CacheKind::Browse);
    }
}
