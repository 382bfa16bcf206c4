use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::stop_words::ENGLISH_STOP_WORDS;
use crate::error::{AppError, AppResult};
use crate::services::sparse::SparseMatrix;

/// Words of two or more word characters
const TOKEN_PATTERN: &str = r"(?u)\b\w\w+\b";

/// TF-IDF vectoriser over whitespace-ish text
///
/// Document frequency bounds are proportions of the corpus size. The fitted
/// vocabulary is kept sorted, so a term's column is its position in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    pub min_df: f64,
    pub max_df: f64,
    pub max_features: Option<usize>,
    vocabulary: Vec<String>,
    idf: Vec<f64>,
}

impl Default for TfidfVectorizer {
    fn default() -> Self {
        Self::new(0.003, 0.5, Some(5000))
    }
}

impl TfidfVectorizer {
    pub fn new(min_df: f64, max_df: f64, max_features: Option<usize>) -> Self {
        Self {
            min_df,
            max_df,
            max_features,
            vocabulary: Vec::new(),
            idf: Vec::new(),
        }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn feature_name(&self, column: usize) -> Option<&str> {
        self.vocabulary.get(column).map(String::as_str)
    }

    pub fn n_features(&self) -> usize {
        self.vocabulary.len()
    }

    /// Learns vocabulary and idf weights, then vectorises the same documents
    pub fn fit_transform(&mut self, documents: &[String]) -> AppResult<SparseMatrix> {
        if documents.is_empty() {
            return Err(AppError::Model("No documents to fit the vectorizer on".to_string()));
        }
        let counts = count_terms(documents)?;
        let n_docs = documents.len() as f64;

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &counts {
            for (term, &count) in doc {
                *doc_freq.entry(term.as_str()).or_insert(0) += 1;
                *term_freq.entry(term.as_str()).or_insert(0) += count;
            }
        }
        if doc_freq.is_empty() {
            return Err(AppError::Model(
                "Empty vocabulary; documents only contain stop words".to_string(),
            ));
        }

        let max_doc_count = self.max_df * n_docs;
        let min_doc_count = self.min_df * n_docs;
        if max_doc_count < min_doc_count {
            return Err(AppError::Model(
                "max_df corresponds to fewer documents than min_df".to_string(),
            ));
        }

        let mut kept: Vec<&str> = doc_freq
            .iter()
            .filter(|&(_, &df)| df as f64 >= min_doc_count && df as f64 <= max_doc_count)
            .map(|(&term, _)| term)
            .collect();

        if let Some(limit) = self.max_features {
            if kept.len() > limit {
                kept.sort_by(|a, b| term_freq[b].cmp(&term_freq[a]).then_with(|| a.cmp(b)));
                kept.truncate(limit);
            }
        }
        if kept.is_empty() {
            return Err(AppError::Model(
                "After pruning, no terms remain; adjust min_df or max_df".to_string(),
            ));
        }
        kept.sort_unstable();

        self.idf = kept
            .iter()
            .map(|term| ((1.0 + n_docs) / (1.0 + doc_freq[term] as f64)).ln() + 1.0)
            .collect();
        self.vocabulary = kept.into_iter().map(str::to_string).collect();

        tracing::info!(
            documents = documents.len(),
            features = self.vocabulary.len(),
            "TF-IDF vocabulary fitted"
        );

        self.weigh(&counts)
    }

    /// Vectorises documents against the fitted vocabulary
    pub fn transform(&self, documents: &[String]) -> AppResult<SparseMatrix> {
        if self.vocabulary.is_empty() {
            return Err(AppError::Model("Vectorizer has not been fitted".to_string()));
        }
        let counts = count_terms(documents)?;
        self.weigh(&counts)
    }

    fn weigh(&self, counts: &[HashMap<String, usize>]) -> AppResult<SparseMatrix> {
        let mut triplets = Vec::new();
        for (row, doc) in counts.iter().enumerate() {
            let mut entries: Vec<(usize, f64)> = doc
                .iter()
                .filter_map(|(term, &count)| {
                    self.vocabulary
                        .binary_search(term)
                        .ok()
                        .map(|col| (col, count as f64 * self.idf[col]))
                })
                .collect();

            let norm = entries.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for entry in entries.iter_mut() {
                    entry.1 /= norm;
                }
            }
            triplets.extend(entries.into_iter().map(|(col, v)| (row, col, v)));
        }
        SparseMatrix::from_triplets(counts.len(), self.vocabulary.len(), triplets)
    }
}

/// Lowercases, tokenises and drops stop words, counting terms per document
fn count_terms(documents: &[String]) -> AppResult<Vec<HashMap<String, usize>>> {
    let token_re = Regex::new(TOKEN_PATTERN)
        .map_err(|e| AppError::Model(format!("Invalid token pattern: {}", e)))?;
    let stop_words: HashSet<&str> = ENGLISH_STOP_WORDS.iter().copied().collect();

    Ok(documents
        .iter()
        .map(|doc| {
            let lowered = doc.to_lowercase();
            let mut counts = HashMap::new();
            for token in token_re.find_iter(&lowered) {
                let token = token.as_str();
                if !stop_words.contains(token) {
                    *counts.entry(token.to_string()).or_insert(0) += 1;
                }
            }
            counts
        })
        .collect())
}
