//! Sort orders shared by the browse view and the text export.

use std::cmp::Ordering;

use super::types::{Annotation, AnnotationSort, Bucket, HighlightIndex, ListSort};

pub const PREVIEW_CHARS: usize = 50;
pub const UNKNOWN_OWNER: &str = "Unknown";

/// Resolves owner ids to display names.
pub trait OwnerDirectory {
    fn display_name(&self, owner: &str) -> Option<String>;
}

/// Display name of an owner, or `Unknown` when the host no longer knows it.
pub fn owner_name(directory: &dyn OwnerDirectory, owner: &str) -> String {
    directory
        .display_name(owner)
        .unwrap_or_else(|| UNKNOWN_OWNER.to_string())
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Owners with at least one non-empty bucket, in the requested order.
pub fn sorted_owners<'a>(
    index: &'a HighlightIndex,
    sort: ListSort,
    directory: &dyn OwnerDirectory,
) -> Vec<&'a str> {
    let mut owners: Vec<(&str, u64, String)> = index
        .owners
        .iter()
        .filter(|(_, chats)| chats.values().any(|bucket| !bucket.is_empty()))
        .map(|(owner, chats)| {
            let modified = chats
                .values()
                .filter(|bucket| !bucket.is_empty())
                .map(|bucket| bucket.last_modified)
                .max()
                .unwrap_or(0);
            (owner.as_str(), modified, owner_name(directory, owner))
        })
        .collect();

    match sort {
        ListSort::Name => owners.sort_by(|a, b| compare_names(&a.2, &b.2)),
        ListSort::Modified => owners.sort_by(|a, b| b.1.cmp(&a.1)),
    }
    owners.into_iter().map(|(owner, _, _)| owner).collect()
}

/// Non-empty buckets of one owner, in the requested order.
pub fn sorted_transcripts<'a>(
    index: &'a HighlightIndex,
    owner: &str,
    sort: ListSort,
) -> Vec<(&'a str, &'a Bucket)> {
    let Some(chats) = index.owners.get(owner) else {
        return Vec::new();
    };
    let mut transcripts: Vec<(&str, &Bucket)> = chats
        .iter()
        .filter(|(_, bucket)| !bucket.is_empty())
        .map(|(name, bucket)| (name.as_str(), bucket))
        .collect();

    match sort {
        ListSort::Name => transcripts.sort_by(|a, b| compare_names(a.0, b.0)),
        ListSort::Modified => transcripts.sort_by(|a, b| b.1.last_modified.cmp(&a.1.last_modified)),
    }
    transcripts
}

/// Reading order: message, then offset inside the message, then creation time.
pub fn reading_order(a: &Annotation, b: &Annotation) -> Ordering {
    a.message_index
        .cmp(&b.message_index)
        .then(a.text_offset.cmp(&b.text_offset))
        .then(a.created_at.cmp(&b.created_at))
}

pub fn sort_annotations(annotations: &mut [&Annotation], sort: AnnotationSort) {
    match sort {
        AnnotationSort::Message => annotations.sort_by(|a, b| reading_order(a, b)),
        AnnotationSort::Created => annotations.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}

/// First characters of the newest annotation in a bucket.
pub fn bucket_preview(bucket: &Bucket) -> String {
    let Some(latest) = bucket
        .highlights
        .iter()
        .reduce(|prev, next| if next.created_at > prev.created_at { next } else { prev })
    else {
        return String::new();
    };
    truncate_preview(&latest.normalized_text)
}

pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Names(HashMap<&'static str, &'static str>);

    impl OwnerDirectory for Names {
        fn display_name(&self, owner: &str) -> Option<String> {
            self.0.get(owner).map(|name| name.to_string())
        }
    }

    fn annotation(id: &str, message: usize, offset: usize, created: u64) -> Annotation {
        Annotation {
            id: id.to_string(),
            message_index: message,
            variant_index: 0,
            normalized_text: format!("text {}", id),
            text_offset: offset,
            color: "#FFE4B5".to_string(),
            color_slot: 0,
            note: String::new(),
            label: String::new(),
            created_at: created,
        }
    }

    fn bucket(modified: u64, highlights: Vec<Annotation>) -> Bucket {
        let mut bucket = Bucket::new(modified);
        bucket.highlights = highlights;
        bucket
    }

    fn sample_index() -> HighlightIndex {
        let mut index = HighlightIndex::default();
        let a = index.owners.entry("a.png".to_string()).or_default();
        a.insert("old".to_string(), bucket(10, vec![annotation("1", 0, 0, 1)]));
        a.insert("Beta".to_string(), bucket(30, vec![annotation("2", 0, 0, 2)]));
        a.insert("empty".to_string(), bucket(99, Vec::new()));
        let b = index.owners.entry("b.png".to_string()).or_default();
        b.insert("x".to_string(), bucket(20, vec![annotation("3", 0, 0, 3)]));
        let c = index.owners.entry("c.png".to_string()).or_default();
        c.insert("gone".to_string(), bucket(50, Vec::new()));
        index
    }

    #[test]
    fn test_owner_order_skips_empty_owners() {
        let index = sample_index();
        let names = Names(HashMap::from([("a.png", "zed"), ("b.png", "Amy")]));

        assert_eq!(
            sorted_owners(&index, ListSort::Modified, &names),
            vec!["a.png", "b.png"]
        );
        assert_eq!(
            sorted_owners(&index, ListSort::Name, &names),
            vec!["b.png", "a.png"]
        );
    }

    #[test]
    fn test_transcript_order() {
        let index = sample_index();
        let by_modified: Vec<&str> = sorted_transcripts(&index, "a.png", ListSort::Modified)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(by_modified, vec!["Beta", "old"]);

        let by_name: Vec<&str> = sorted_transcripts(&index, "a.png", ListSort::Name)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(by_name, vec!["Beta", "old"]);
        assert!(sorted_transcripts(&index, "nobody", ListSort::Name).is_empty());
    }

    #[test]
    fn test_reading_order_prefers_offset_over_creation() {
        let late_first = annotation("a", 2, 5, 900);
        let early_second = annotation("b", 2, 40, 100);
        let earlier_message = annotation("c", 1, 99, 999);
        let mut list = vec![&early_second, &late_first, &earlier_message];

        sort_annotations(&mut list, AnnotationSort::Message);
        let ids: Vec<&str> = list.iter().map(|hl| hl.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        sort_annotations(&mut list, AnnotationSort::Created);
        let ids: Vec<&str> = list.iter().map(|hl| hl.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_preview_uses_newest_annotation() {
        let mut newest = annotation("n", 0, 0, 50);
        newest.normalized_text = "y".repeat(60);
        let b = bucket(0, vec![annotation("o", 0, 0, 10), newest]);
        assert_eq!(bucket_preview(&b), format!("{}...", "y".repeat(50)));
        assert_eq!(truncate_preview("short"), "short");
        assert_eq!(bucket_preview(&Bucket::new(0)), "");
    }
}
