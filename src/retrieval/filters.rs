//! Post-fusion filtering, facets and sorting

use super::{Facets, SearchFilters, SearchResult, SortBy};
use chrono::{DateTime, Duration, Utc};

/// Apply `filters` and then `threshold`, preserving order.
///
/// Predicate types combine with AND; values within a list-valued predicate
/// combine with OR. The threshold on the combined score runs last.
pub fn apply_filters(
    results: Vec<SearchResult>,
    filters: &SearchFilters,
    threshold: f32,
) -> Vec<SearchResult> {
    let mut filtered = results;

    if !filters.file_types.is_empty() {
        let suffixes: Vec<String> = filters
            .file_types
            .iter()
            .map(|ft| format!(".{}", ft.trim_start_matches('.').to_lowercase()))
            .collect();
        filtered.retain(|r| {
            let filename = r.filename.to_lowercase();
            suffixes.iter().any(|suffix| filename.ends_with(suffix))
        });
    }

    if !filters.content_types.is_empty() {
        filtered.retain(|r| filters.content_types.contains(&r.content_type));
    }

    for (key, value) in &filters.metadata {
        filtered.retain(|r| r.metadata.get(key) == Some(value));
    }

    if filters.date_from.is_some() || filters.date_to.is_some() {
        filtered.retain(|r| match r.upload_time() {
            Some(t) => {
                filters.date_from.map_or(true, |from| t >= from)
                    && filters.date_to.map_or(true, |to| t <= to)
            }
            None => false,
        });
    }

    filtered.retain(|r| r.score >= threshold);
    filtered
}

/// Facet counts over `results`, relative to the current time
pub fn generate_facets(results: &[SearchResult]) -> Facets {
    generate_facets_at(results, Utc::now())
}

pub(crate) fn generate_facets_at(results: &[SearchResult], now: DateTime<Utc>) -> Facets {
    let mut facets = Facets::default();

    for result in results {
        if let Some(ext) = result.extension() {
            *facets.file_types.entry(ext).or_insert(0) += 1;
        }

        *facets
            .content_types
            .entry(result.content_type.clone())
            .or_insert(0) += 1;

        if let Some(author) = result.metadata.get("author").and_then(|v| v.as_str()) {
            *facets.authors.entry(author.to_string()).or_insert(0) += 1;
        }

        if let Some(uploaded) = result.upload_time() {
            *facets
                .date_ranges
                .entry(date_bucket(now - uploaded).to_string())
                .or_insert(0) += 1;
        }
    }

    facets
}

fn date_bucket(age: Duration) -> &'static str {
    if age <= Duration::days(1) {
        "last_day"
    } else if age <= Duration::days(7) {
        "last_week"
    } else if age <= Duration::days(30) {
        "last_month"
    } else {
        "older"
    }
}

/// Stable sort by the requested key
pub fn sort_results(results: &mut [SearchResult], sort_by: SortBy) {
    match sort_by {
        SortBy::Relevance => results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        // undated results sort last
        SortBy::Date => results.sort_by(|a, b| b.upload_time().cmp(&a.upload_time())),
        SortBy::Filename => results.sort_by(|a, b| a.filename.cmp(&b.filename)),
    }
}
