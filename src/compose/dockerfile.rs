use std::collections::BTreeSet;

/// Base images named by the `FROM` instructions of a Dockerfile.
///
/// `--platform` flags, references to earlier build stages and `scratch` are
/// skipped. Order of first appearance is kept.
pub fn images_from_dockerfile(content: &str) -> Vec<String> {
    let mut stages = BTreeSet::new();
    let mut images = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        let Some((keyword, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        if !keyword.eq_ignore_ascii_case("FROM") {
            continue;
        }

        let mut tokens = rest.split_whitespace().filter(|t| !t.starts_with("--"));
        let Some(image) = tokens.next() else {
            continue;
        };
        if let (Some(as_kw), Some(alias)) = (tokens.next(), tokens.next()) {
            if as_kw.eq_ignore_ascii_case("AS") {
                stages.insert(alias.to_ascii_lowercase());
            }
        }

        let lowered = image.to_ascii_lowercase();
        if lowered == "scratch" || stages.contains(&lowered) {
            continue;
        }
        if !images.iter().any(|i| i == image) {
            images.push(image.to_string());
        }
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_from() {
        assert_eq!(images_from_dockerfile("FROM postgres:16\nRUN true\n"), vec!["postgres:16"]);
    }

    #[test]
    fn multi_stage_skips_stage_references_and_scratch() {
        let dockerfile = "\
FROM --platform=$BUILDPLATFORM rust:1.80 AS build
RUN cargo build
from build AS test
FROM scratch
FROM debian:bookworm-slim
COPY --from=build /app /app
";
        assert_eq!(
            images_from_dockerfile(dockerfile),
            vec!["rust:1.80", "debian:bookworm-slim"]
        );
    }

    #[test]
    fn no_from_means_no_images() {
        assert!(images_from_dockerfile("# empty\nRUN echo hi").is_empty());
    }
}
