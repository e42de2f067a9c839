//! Key space of the pipeline bucket.
//!
//! Seed content lives under `images/` plus two root files. The pipeline
//! writes everything else under a fixed set of working prefixes.

use std::fmt;

use super::error::Error;

pub const IMAGES_PREFIX: &str = "images/";
pub const PROMPT_KEY: &str = "prompt.txt";
pub const MODEL_KEY: &str = "sam3-model.tar.gz";
pub const SEED_ROOT_KEYS: [&str; 2] = [PROMPT_KEY, MODEL_KEY];

pub const WORKING_PREFIXES: [&str; 7] = [
    "inputs/",
    "async-failure/",
    "async-out/",
    "compared/",
    "llm_output/",
    "markdown/",
    "payload/",
];

pub fn default_working_prefixes() -> Vec<String> {
    WORKING_PREFIXES.iter().map(|p| p.to_string()).collect()
}

pub fn image_key(relative: &str) -> String {
    format!("{}{}", IMAGES_PREFIX, relative.trim_start_matches('/'))
}

/// Appends the trailing `/` that makes `prefix` a whole prefix group.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Normalizes working prefixes, rejecting any that would reach seed content.
pub fn validate_working_prefixes(prefixes: &[String]) -> Result<Vec<String>, Error> {
    let mut out: Vec<String> = Vec::with_capacity(prefixes.len());
    for raw in prefixes {
        let prefix = normalize_prefix(raw);
        if prefix.is_empty() {
            return Err(Error::config("working prefix must not be empty"));
        }
        let reaches_seed = IMAGES_PREFIX.starts_with(&prefix)
            || prefix.starts_with(IMAGES_PREFIX)
            || SEED_ROOT_KEYS.iter().any(|k| k.starts_with(&prefix));
        if reaches_seed {
            return Err(Error::config(format!(
                "working prefix {} overlaps seed content",
                prefix
            )));
        }
        if !out.contains(&prefix) {
            out.push(prefix);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixGroup {
    Images,
    SeedRoot,
    Working(String),
    Foreign,
}

/// Group of a key, or of a common prefix returned by a delimited listing.
pub fn group_of(key: &str, working: &[String]) -> PrefixGroup {
    if key.starts_with(IMAGES_PREFIX) {
        return PrefixGroup::Images;
    }
    if SEED_ROOT_KEYS.contains(&key) {
        return PrefixGroup::SeedRoot;
    }
    match working.iter().find(|p| key.starts_with(p.as_str())) {
        Some(p) => PrefixGroup::Working(p.clone()),
        None => PrefixGroup::Foreign,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Empty,
    /// Both root seed files present and nothing under a working prefix.
    Seeded,
    Dirty,
    /// Objects present but the seed is incomplete, e.g. after a failed
    /// upload or when only foreign keys remain. Needs a reset.
    Partial,
}

impl fmt::Display for BucketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BucketState::Empty => "empty",
            BucketState::Seeded => "seeded",
            BucketState::Dirty => "dirty",
            BucketState::Partial => "partial (seed incomplete)",
        };
        f.write_str(s)
    }
}

pub fn classify<'a, I>(keys: I, working: &[String]) -> BucketState
where
    I: IntoIterator<Item = &'a str>,
{
    let mut any = false;
    let mut roots = 0;
    for key in keys {
        any = true;
        match group_of(key, working) {
            PrefixGroup::Working(_) => return BucketState::Dirty,
            PrefixGroup::SeedRoot => roots += 1,
            PrefixGroup::Images | PrefixGroup::Foreign => {}
        }
    }
    match (any, roots >= SEED_ROOT_KEYS.len()) {
        (false, _) => BucketState::Empty,
        (true, true) => BucketState::Seeded,
        (true, false) => BucketState::Partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_gain_trailing_slash() {
        assert_eq!(normalize_prefix("inputs"), "inputs/");
        assert_eq!(normalize_prefix("/markdown/"), "markdown/");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    fn image_keys_keep_relative_path() {
        assert_eq!(image_key("cats/tabby.png"), "images/cats/tabby.png");
    }

    #[test]
    fn seed_overlapping_prefixes_are_rejected() {
        for bad in &["images", "images/raw/", "/", ""] {
            assert!(
                validate_working_prefixes(&[bad.to_string()]).is_err(),
                "{} should be rejected",
                bad
            );
        }
        let ok = validate_working_prefixes(&["inputs".into(), "inputs/".into(), "routing-artifacts".into()])
            .unwrap();
        assert_eq!(ok, vec!["inputs/".to_string(), "routing-artifacts/".to_string()]);
    }

    #[test]
    fn keys_fall_into_groups() {
        let working = default_working_prefixes();
        assert_eq!(group_of("images/cat.png", &working), PrefixGroup::Images);
        assert_eq!(group_of("prompt.txt", &working), PrefixGroup::SeedRoot);
        assert_eq!(
            group_of("async-out/1.json", &working),
            PrefixGroup::Working("async-out/".into())
        );
        assert_eq!(group_of("notes.txt", &working), PrefixGroup::Foreign);
    }

    #[test]
    fn state_follows_working_prefixes() {
        let working = default_working_prefixes();
        assert_eq!(classify(Vec::<&str>::new(), &working), BucketState::Empty);
        assert_eq!(
            classify(vec!["images/", "prompt.txt", "sam3-model.tar.gz"], &working),
            BucketState::Seeded
        );
        assert_eq!(
            classify(vec!["prompt.txt", "sam3-model.tar.gz", "notes.txt"], &working),
            BucketState::Seeded
        );
        assert_eq!(
            classify(vec!["images/", "markdown/", "prompt.txt"], &working),
            BucketState::Dirty
        );
    }

    #[test]
    fn incomplete_seed_is_partial() {
        let working = default_working_prefixes();
        assert_eq!(classify(vec!["notes.txt"], &working), BucketState::Partial);
        assert_eq!(classify(vec!["images/"], &working), BucketState::Partial);
        assert_eq!(classify(vec!["images/", "prompt.txt"], &working), BucketState::Partial);
        assert_eq!(classify(vec!["images/", "inputs/"], &working), BucketState::Dirty);
    }
}
