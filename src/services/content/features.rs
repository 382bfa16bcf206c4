use crate::models::ItemMetadata;

const DIRECTOR_REPEAT: usize = 3;
const WRITER_REPEAT: usize = 2;
const CAST_REPEAT: usize = 1;

/// Builds the text blob an item is vectorised from
///
/// Multi-word values are joined with `_` so a name stays a single token.
/// Directors and writers are repeated to weigh creative identity above cast.
pub fn metadata_document(item: &ItemMetadata) -> String {
    let mut doc = String::new();

    doc.push_str(&scalar_feature(item.original_language.as_deref()));
    doc.push_str(&scalar_feature(item.release_decade().as_deref()));

    let runtime_bucket = (item.runtime.unwrap_or(0.0) / 10.0).floor() as i64;
    doc.push_str(&format!("{}_mins ", runtime_bucket));

    doc.push_str(&list_feature(&item.genres, 1));
    doc.push_str(&list_feature(&item.tags, 1));
    doc.push_str(&list_feature(&item.directors, DIRECTOR_REPEAT));
    doc.push_str(&list_feature(&item.writers, WRITER_REPEAT));
    doc.push_str(&list_feature(&item.top_cast, CAST_REPEAT));

    doc
}

fn scalar_feature(value: Option<&str>) -> String {
    let cleaned = value
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    if cleaned.is_empty() {
        String::new()
    } else {
        format!("{} ", cleaned)
    }
}

fn list_feature(values: &[String], repeat: usize) -> String {
    if values.is_empty() {
        return String::new();
    }
    let joined = values
        .iter()
        .map(|v| v.trim().replace(' ', "_"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} ", vec![joined; repeat].join(" "))
}
