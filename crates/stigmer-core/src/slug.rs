// Slug normalization.
//
// Slugs are computed once, at create time, from the resource name and are
// never recomputed on update. Uniqueness is enforced per
// (kind, owner_scope, org) by the duplicate-check pipeline step.

/// Normalize a human-readable name into a URL-safe slug: lowercase,
/// non-alphanumeric runs collapse into single dashes, leading/trailing
/// dashes trimmed.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Slug of the default instance auto-created for a template resource.
pub fn default_instance_slug(template_slug: &str) -> String {
    format!("{}-default", template_slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_lowercase() {
        assert_eq!(slugify("Pipeline"), "pipeline");
        assert_eq!(slugify("My Agent"), "my-agent");
    }

    #[test]
    fn test_punctuation_collapses() {
        assert_eq!(slugify("Hello,   World!!"), "hello-world");
        assert_eq!(slugify("a__b--c"), "a-b-c");
    }

    #[test]
    fn test_trimmed() {
        assert_eq!(slugify("  spaced out  "), "spaced-out");
        assert_eq!(slugify("---x---"), "x");
    }

    #[test]
    fn test_empty_and_symbol_only() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_stable() {
        let name = "Run-1 (retry)";
        assert_eq!(slugify(name), slugify(name));
    }

    #[test]
    fn test_default_instance_slug() {
        assert_eq!(default_instance_slug("pipeline"), "pipeline-default");
    }
}
