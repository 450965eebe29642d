//! YAML front-matter extraction.
//!
//! A front-matter block is a leading section delimited by lines consisting
//! exactly of `---`. Parse failures never fail the pipeline: the block is
//! treated as body text and an empty [`FrontMatter`] is returned.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

use trellis_core::FrontMatter;

/// Split `raw` into `(front_matter, body)`.
pub fn extract_front_matter(raw: &str) -> (FrontMatter, String) {
    let Some(block) = find_block(raw) else {
        return (FrontMatter::default(), raw.to_string());
    };

    match serde_yaml::from_str::<serde_yaml::Value>(block.yaml) {
        Ok(serde_yaml::Value::Mapping(mapping)) => {
            (from_mapping(mapping), block.body.to_string())
        }
        Ok(_) => {
            // A scalar or list at the top level is not front matter
            warn!("front matter is not a mapping, treating whole file as body");
            (FrontMatter::default(), raw.to_string())
        }
        Err(err) => {
            warn!("unparseable front matter, treating whole file as body: {err}");
            (FrontMatter::default(), raw.to_string())
        }
    }
}

struct Block<'a> {
    yaml: &'a str,
    body: &'a str,
}

fn find_block(raw: &str) -> Option<Block<'_>> {
    let rest = raw.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;

    // Find the closing delimiter line
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some(Block { yaml, body });
        }
        offset += line.len();
    }
    None
}

fn from_mapping(mapping: serde_yaml::Mapping) -> FrontMatter {
    let mut fm = FrontMatter::default();

    for (key, value) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            continue;
        };
        match key.as_str() {
            "title" => fm.title = scalar_to_string(&value),
            "tags" => fm.tags = normalize_tags(&value),
            "created" => fm.created = scalar_to_string(&value).map(|s| normalize_date(&s)),
            "modified" => fm.modified = scalar_to_string(&value).map(|s| normalize_date(&s)),
            "status" => fm.status = scalar_to_string(&value),
            "area" => fm.area = scalar_to_string(&value),
            "project" => fm.project = scalar_to_string(&value),
            _ => {
                if let Ok(json) = serde_json::to_value(&value) {
                    fm.extra.insert(key, json);
                }
            }
        }
    }

    fm
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Front-matter `tags` accepts a scalar, a comma-separated string, or a list.
pub fn normalize_tags(value: &serde_yaml::Value) -> Vec<String> {
    match value {
        serde_yaml::Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .filter_map(scalar_to_string)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        other => scalar_to_string(other).into_iter().collect(),
    }
}

/// Normalize date-ish strings to ISO-8601. Strings that do not parse are
/// passed through unchanged.
pub fn normalize_date(value: &str) -> String {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.with_timezone(&Utc).to_rfc3339();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return dt.and_utc().to_rfc3339();
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc()
            .to_rfc3339();
    }
    trimmed.to_string()
}

/// Convenience: parse a normalized front-matter date back to a timestamp.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_basic_front_matter() {
        let raw = "---\ntitle: My Note\ntags: [a, b]\n---\n# Body\n";
        let (fm, body) = extract_front_matter(raw);
        assert_eq!(fm.title.as_deref(), Some("My Note"));
        assert_eq!(fm.tags, vec!["a", "b"]);
        assert_eq!(body, "# Body\n");
    }

    #[test]
    fn missing_front_matter_yields_empty() {
        let raw = "# Just a heading\n";
        let (fm, body) = extract_front_matter(raw);
        assert!(fm.is_empty());
        assert_eq!(body, raw);
    }

    #[test]
    fn unterminated_block_is_body() {
        let raw = "---\ntitle: Oops\nno closing delimiter\n";
        let (fm, body) = extract_front_matter(raw);
        assert!(fm.is_empty());
        assert_eq!(body, raw);
    }

    #[test]
    fn invalid_yaml_degrades_to_body() {
        let raw = "---\ntitle: [unclosed\n---\nbody\n";
        let (fm, body) = extract_front_matter(raw);
        assert!(fm.is_empty());
        assert_eq!(body, raw);
    }

    #[test]
    fn comma_separated_tags() {
        let raw = "---\ntags: one, two , three\n---\nbody";
        let (fm, _) = extract_front_matter(raw);
        assert_eq!(fm.tags, vec!["one", "two", "three"]);
    }

    #[test]
    fn scalar_tag() {
        let raw = "---\ntags: solo\n---\nbody";
        let (fm, _) = extract_front_matter(raw);
        assert_eq!(fm.tags, vec!["solo"]);
    }

    #[test]
    fn dates_normalize_to_iso8601() {
        assert_eq!(normalize_date("2024-03-01"), "2024-03-01T00:00:00+00:00");
        assert_eq!(
            normalize_date("2024-03-01 10:30:00"),
            "2024-03-01T10:30:00+00:00"
        );
        // Already RFC 3339 stays stable under a second pass
        let once = normalize_date("2024-03-01T10:30:00Z");
        assert_eq!(normalize_date(&once), once);
    }

    #[test]
    fn unknown_keys_land_in_extra() {
        let raw = "---\ntitle: T\ncustom_field: 42\n---\nbody";
        let (fm, _) = extract_front_matter(raw);
        assert_eq!(fm.extra.get("custom_field"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn unicode_tags_survive() {
        let raw = "---\ntags: [日本語, café]\n---\nbody";
        let (fm, _) = extract_front_matter(raw);
        assert_eq!(fm.tags, vec!["日本語", "café"]);
    }
}
