//! Name type definitions.

use crate::define_name;
use crate::IdError;

define_name!(HostName, "hostname", validate_hostname);
define_name!(ContainerName, "container name", validate_container_name);
define_name!(DockerImage, "docker image", validate_docker_image);

/// Maximum length of a fully qualified hostname.
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single DNS label.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a container name.
pub const MAX_CONTAINER_NAME_LEN: usize = 128;

/// Maximum length of an image reference.
pub const MAX_IMAGE_LEN: usize = 512;

impl HostName {
    /// Returns the first DNS label, e.g. `host1` for `host1.example.com`.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl ContainerName {
    /// Derives a container name from the first label of a hostname.
    #[must_use]
    pub fn from_hostname(hostname: &HostName) -> Self {
        // DNS label characters are a subset of container name characters.
        Self(hostname.short_name().to_string())
    }
}

impl DockerImage {
    /// Returns the tag part of the reference, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        let last_segment = self.0.rsplit('/').next().unwrap_or(&self.0);
        if last_segment.contains('@') {
            return None;
        }
        last_segment.split_once(':').map(|(_, tag)| tag)
    }
}

fn validate_hostname(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if s.len() > MAX_HOSTNAME_LEN {
        return Err(IdError::TooLong {
            kind,
            max: MAX_HOSTNAME_LEN,
        });
    }

    for label in s.split('.') {
        if label.is_empty() {
            return Err(IdError::InvalidFormat {
                kind,
                value: s.to_string(),
                message: "empty label",
            });
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(IdError::InvalidFormat {
                kind,
                value: s.to_string(),
                message: "label longer than 63 characters",
            });
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(IdError::InvalidFormat {
                kind,
                value: s.to_string(),
                message: "label starts or ends with '-'",
            });
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(IdError::InvalidCharacter {
                kind,
                character: c,
                value: s.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_container_name(kind: &'static str, s: &str) -> Result<(), IdError> {
    let Some(first) = s.chars().next() else {
        return Err(IdError::Empty { kind });
    };
    if s.len() > MAX_CONTAINER_NAME_LEN {
        return Err(IdError::TooLong {
            kind,
            max: MAX_CONTAINER_NAME_LEN,
        });
    }
    if !first.is_ascii_alphanumeric() {
        return Err(IdError::InvalidFormat {
            kind,
            value: s.to_string(),
            message: "must start with a letter or digit",
        });
    }
    if let Some(c) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(IdError::InvalidCharacter {
            kind,
            character: c,
            value: s.to_string(),
        });
    }
    Ok(())
}

fn validate_docker_image(kind: &'static str, s: &str) -> Result<(), IdError> {
    let Some(first) = s.chars().next() else {
        return Err(IdError::Empty { kind });
    };
    if s.len() > MAX_IMAGE_LEN {
        return Err(IdError::TooLong {
            kind,
            max: MAX_IMAGE_LEN,
        });
    }
    if matches!(first, ':' | '@' | '/') {
        return Err(IdError::InvalidFormat {
            kind,
            value: s.to_string(),
            message: "missing repository",
        });
    }
    if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::InvalidCharacter {
            kind,
            character: c,
            value: s.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hostname_valid() {
        let host = HostName::parse("host1.yahoo.com").unwrap();
        assert_eq!(host.as_str(), "host1.yahoo.com");
        assert_eq!(host.short_name(), "host1");
        assert_eq!(host.to_string(), "host1.yahoo.com");
    }

    #[test]
    fn test_hostname_invalid() {
        assert!(HostName::parse("").unwrap_err().is_empty());
        assert!(HostName::parse("host..com").is_err());
        assert!(HostName::parse("-host.com").is_err());
        assert!(HostName::parse("host_1.com").is_err());
        assert!(HostName::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_container_name() {
        assert!(ContainerName::parse("container").is_ok());
        assert!(ContainerName::parse("c_1.x-y").is_ok());
        assert!(ContainerName::parse("_c").is_err());
        assert!(ContainerName::parse("c/1").is_err());
        assert!(ContainerName::parse("").is_err());
    }

    #[test]
    fn test_container_name_from_hostname() {
        let host = HostName::parse("docker-1.prod.example.com").unwrap();
        assert_eq!(ContainerName::from_hostname(&host).as_str(), "docker-1");
    }

    #[test]
    fn test_docker_image() {
        let image = DockerImage::parse("registry:5000/vespa/node:6.1.2").unwrap();
        assert_eq!(image.tag(), Some("6.1.2"));

        let untagged = DockerImage::parse("dockerImage").unwrap();
        assert_eq!(untagged.tag(), None);

        let digest = DockerImage::parse("repo/app@sha256:abcd").unwrap();
        assert_eq!(digest.tag(), None);

        assert!(DockerImage::parse("image with space").is_err());
        assert!(DockerImage::parse(":tag").is_err());
    }

    #[test]
    fn test_serde_as_plain_string() {
        let host = HostName::parse("host1").unwrap();
        let json = serde_json::to_string(&host).unwrap();
        assert_eq!(json, "\"host1\"");

        let parsed: HostName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, host);

        let invalid: Result<HostName, _> = serde_json::from_str("\"bad host\"");
        assert!(invalid.is_err());
    }

    proptest! {
        #[test]
        fn test_generated_hostnames_parse(
            labels in prop::collection::vec("[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?", 1..5)
        ) {
            let raw = labels.join(".");
            let host = HostName::parse(&raw).unwrap();
            prop_assert_eq!(host.as_str(), raw.as_str());
            prop_assert!(ContainerName::parse(host.short_name()).is_ok());
        }
    }
}
