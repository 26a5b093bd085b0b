use std::fmt;

use thiserror::Error;

/// Tag applied when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Registry host used for blob fetches when a reference names no registry.
pub const DEFAULT_REGISTRY_HOST: &str = "registry-1.docker.io";

/// Official images on the default registry live under this namespace.
const OFFICIAL_NAMESPACE: &str = "library";

/// Host aliases that all mean the default registry.
const DEFAULT_REGISTRY_ALIASES: &[&str] = &["docker.io", "index.docker.io", DEFAULT_REGISTRY_HOST];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("image reference is empty")]
    Empty,

    #[error("image reference '{0}' has no repository name")]
    MissingRepository(String),
}

/// A normalized image reference.
///
/// `tag` is never empty and `repository` never contains the tag separator.
/// `repository` is kept exactly as the caller wrote it; the `library/`
/// namespacing only shows up through [`ImageReference::registry_repository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host when the first path segment looks like one.
    pub registry: Option<String>,
    pub repository: String,
    pub tag: String,
    /// Content digest (`sha256:...`) when the reference was pinned with `@`.
    pub digest: Option<String>,
}

impl ImageReference {
    /// Normalize a user-supplied reference. Pure string work, no I/O.
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name, digest) = match raw.split_once('@') {
            Some((name, digest)) if !digest.is_empty() => (name, Some(digest.to_string())),
            Some((name, _)) => (name, None),
            None => (raw, None),
        };

        let (name, tag) = split_tag(name);
        let (registry, repository) = split_registry(name);
        if repository.is_empty() {
            return Err(ReferenceError::MissingRepository(raw.to_string()));
        }

        Ok(Self {
            registry: registry.map(str::to_string),
            repository: repository.to_string(),
            tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
            digest,
        })
    }

    /// `registry/repository` without tag or digest, as `list-tags` expects it.
    pub fn repository_path(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{registry}/{}", self.repository),
            None => self.repository.clone(),
        }
    }

    /// Whether blob fetches go to the default registry.
    pub fn on_default_registry(&self) -> bool {
        self.registry
            .as_deref()
            .is_none_or(|r| DEFAULT_REGISTRY_ALIASES.contains(&r))
    }

    /// Host serving the registry HTTP API for this reference.
    pub fn registry_host(&self) -> &str {
        match &self.registry {
            Some(registry) if !self.on_default_registry() => registry.as_str(),
            _ => DEFAULT_REGISTRY_HOST,
        }
    }

    /// Repository name as the registry API knows it (`nginx` -> `library/nginx`
    /// on the default registry).
    pub fn registry_repository(&self) -> String {
        if self.on_default_registry() && !self.repository.contains('/') {
            format!("{OFFICIAL_NAMESPACE}/{}", self.repository)
        } else {
            self.repository.clone()
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository_path())?;
        match &self.digest {
            Some(digest) => write!(f, "@{digest}"),
            None => write!(f, ":{}", self.tag),
        }
    }
}

/// Whether `raw` names a tag explicitly (`repo:tag`), ignoring registry ports.
pub fn has_explicit_tag(raw: &str) -> bool {
    let name = raw.trim().split('@').next().unwrap_or_default();
    split_tag(name).1.is_some()
}

/// Split `name:tag`. The tag colon always comes after the last `/`, so
/// `localhost:5000/app` has no tag.
fn split_tag(name: &str) -> (&str, Option<&str>) {
    let last_segment = name.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name[last_segment..].rfind(':') {
        Some(pos) => {
            let colon = last_segment + pos;
            let tag = &name[colon + 1..];
            (&name[..colon], Some(tag).filter(|t| !t.is_empty()))
        }
        None => (name, None),
    }
}

/// The first segment is a registry host when it contains a dot or a port.
fn split_registry(name: &str) -> (Option<&str>, &str) {
    match name.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') => (Some(first), rest),
        _ => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_latest() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, None);
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.to_string(), "nginx:latest");
    }

    #[test]
    fn second_pass_is_stable() {
        let once = ImageReference::parse("nginx").unwrap().to_string();
        let twice = ImageReference::parse(&once).unwrap().to_string();
        assert_eq!(once, twice);
        assert_eq!(twice.matches(":latest").count(), 1);
    }

    #[test]
    fn explicit_tag_kept() {
        let r = ImageReference::parse("redis:7.2-alpine").unwrap();
        assert_eq!(r.repository, "redis");
        assert_eq!(r.tag, "7.2-alpine");
    }

    #[test]
    fn registry_with_port_is_not_a_tag() {
        let r = ImageReference::parse("localhost:5000/team/app").unwrap();
        assert_eq!(r.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.to_string(), "localhost:5000/team/app:latest");
    }

    #[test]
    fn dotted_first_segment_is_registry() {
        let r = ImageReference::parse("ghcr.io/org/tool:v1").unwrap();
        assert_eq!(r.registry.as_deref(), Some("ghcr.io"));
        assert_eq!(r.repository, "org/tool");
        assert_eq!(r.registry_host(), "ghcr.io");
        assert_eq!(r.registry_repository(), "org/tool");
    }

    #[test]
    fn user_namespace_stays_on_default_registry() {
        let r = ImageReference::parse("someuser/app:2").unwrap();
        assert_eq!(r.registry, None);
        assert_eq!(r.repository, "someuser/app");
        assert_eq!(r.registry_host(), DEFAULT_REGISTRY_HOST);
        assert_eq!(r.registry_repository(), "someuser/app");
    }

    #[test]
    fn official_image_namespaced_only_for_registry_paths() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.registry_repository(), "library/nginx");
        assert_eq!(r.to_string(), "nginx:1.25");

        let hub = ImageReference::parse("docker.io/nginx").unwrap();
        assert_eq!(hub.registry_host(), DEFAULT_REGISTRY_HOST);
        assert_eq!(hub.registry_repository(), "library/nginx");
        assert_eq!(hub.to_string(), "docker.io/nginx:latest");
    }

    #[test]
    fn digest_pinned_reference() {
        let r = ImageReference::parse("alpine@sha256:abc123").unwrap();
        assert_eq!(r.repository, "alpine");
        assert_eq!(r.digest.as_deref(), Some("sha256:abc123"));
        assert_eq!(r.tag, "latest");
        assert_eq!(r.to_string(), "alpine@sha256:abc123");
    }

    #[test]
    fn trailing_colon_defaults_tag() {
        let r = ImageReference::parse("nginx:").unwrap();
        assert_eq!(r.tag, "latest");
        assert!(!r.repository.contains(':'));
    }

    #[test]
    fn empty_input_rejected() {
        assert_eq!(ImageReference::parse(""), Err(ReferenceError::Empty));
        assert_eq!(ImageReference::parse("   "), Err(ReferenceError::Empty));
        assert!(matches!(
            ImageReference::parse(":v1"),
            Err(ReferenceError::MissingRepository(_))
        ));
    }

    #[test]
    fn explicit_tag_detection() {
        assert!(has_explicit_tag("nginx:1.25"));
        assert!(has_explicit_tag("localhost:5000/app:dev"));
        assert!(!has_explicit_tag("nginx"));
        assert!(!has_explicit_tag("localhost:5000/app"));
        assert!(!has_explicit_tag("alpine@sha256:abc"));
    }
}
