//! Build titles derived from the display counters.

use instruction_state::{Build, BuildSource};

/// Compose the title for a build from its counters and provenance.
///
/// Non-zero counters render as `Added N`, `Modified N`, `Removed N` joined by
/// `", "`, followed by `instruction` or `instructions` depending on the last
/// listed count. No changes renders as `Empty build`.
pub fn build_title(
    source: BuildSource,
    branch_label: Option<&str>,
    added: u64,
    modified: u64,
    removed: u64,
) -> String {
    let parts: Vec<(&str, u64)> = [("Added", added), ("Modified", modified), ("Removed", removed)]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .collect();

    let body = match parts.last() {
        None => "Empty build".to_string(),
        Some((_, last)) => {
            let noun = if *last == 1 { "instruction" } else { "instructions" };
            let joined = parts
                .iter()
                .map(|(verb, n)| format!("{} {}", verb, n))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} {}", joined, noun)
        }
    };

    match (source, branch_label) {
        (BuildSource::Git, Some(label)) if !label.is_empty() => format!("[{}] {}", label, body),
        (BuildSource::Rollback, _) => format!("Rollback: {}", body),
        (BuildSource::Merge, _) => format!("Merged: {}", body),
        _ => body,
    }
}

/// Recompute `build.title` from its current counters.
pub fn refresh_title(build: &mut Build) {
    build.title = build_title(
        build.source,
        build.branch_label.as_deref(),
        build.added_count,
        build.modified_count,
        build.removed_count,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_build() {
        assert_eq!(build_title(BuildSource::User, None, 0, 0, 0), "Empty build");
    }

    #[test]
    fn single_counter_pluralization() {
        assert_eq!(
            build_title(BuildSource::User, None, 1, 0, 0),
            "Added 1 instruction"
        );
        assert_eq!(
            build_title(BuildSource::User, None, 3, 0, 0),
            "Added 3 instructions"
        );
    }

    #[test]
    fn noun_follows_last_listed_count() {
        assert_eq!(
            build_title(BuildSource::Ai, None, 3, 0, 1),
            "Added 3, Removed 1 instruction"
        );
        assert_eq!(
            build_title(BuildSource::User, None, 1, 2, 0),
            "Added 1, Modified 2 instructions"
        );
    }

    #[test]
    fn git_label_prefix() {
        assert_eq!(
            build_title(BuildSource::Git, Some("main"), 0, 2, 0),
            "[main] Modified 2 instructions"
        );
        assert_eq!(
            build_title(BuildSource::Git, None, 0, 2, 0),
            "Modified 2 instructions"
        );
    }

    #[test]
    fn orchestrated_prefixes() {
        assert_eq!(
            build_title(BuildSource::Rollback, None, 0, 0, 0),
            "Rollback: Empty build"
        );
        assert_eq!(
            build_title(BuildSource::Merge, None, 1, 1, 1),
            "Merged: Added 1, Modified 1, Removed 1 instruction"
        );
    }
}
