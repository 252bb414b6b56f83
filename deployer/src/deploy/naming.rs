//! Deterministic names derived from an agent ID

use crate::errors::DeployerError;
use crate::utils::sha256_hash;

/// Longest agent ID that still yields a valid workload name, including the
/// case suffix
pub const MAX_AGENT_ID_LEN: usize = 39;

/// Hex digits of the case suffix
const CASE_SUFFIX_LEN: usize = 8;

/// Check that an agent ID can be used in object paths and workload names
pub fn validate_agent_id(agent_id: &str) -> Result<(), DeployerError> {
    if agent_id.is_empty() {
        return Err(DeployerError::InvalidArgument(
            "agentId is required".to_string(),
        ));
    }
    if agent_id.len() > MAX_AGENT_ID_LEN {
        return Err(DeployerError::InvalidArgument(format!(
            "agentId must be at most {} characters",
            MAX_AGENT_ID_LEN
        )));
    }
    if !agent_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    {
        return Err(DeployerError::InvalidArgument(
            "agentId may only contain letters, digits and '-'".to_string(),
        ));
    }
    if agent_id.starts_with('-') || agent_id.ends_with('-') {
        return Err(DeployerError::InvalidArgument(
            "agentId must not start or end with '-'".to_string(),
        ));
    }
    // `--` is reserved for the case suffix of workload names
    if agent_id.contains("--") {
        return Err(DeployerError::InvalidArgument(
            "agentId must not contain '--'".to_string(),
        ));
    }
    Ok(())
}

/// Workload name, e.g. `trading-agent-abc123`.
///
/// Names must be lowercase, so an ID with uppercase letters gets a
/// `--<hash>` suffix taken from the original ID; `Abc` and `abc` never share
/// a workload.
pub fn deployment_name(prefix: &str, agent_id: &str) -> String {
    let lowered = agent_id.to_ascii_lowercase();
    if lowered == agent_id {
        return format!("{}-{}", prefix, lowered);
    }
    let hash = sha256_hash(agent_id.as_bytes());
    format!("{}-{}--{}", prefix, lowered, &hash[..CASE_SUFFIX_LEN])
}

/// Fully qualified image reference, e.g. `gcr.io/proj/trading-agent-abc123`
pub fn image_name(registry: &str, project_id: &str, prefix: &str, agent_id: &str) -> String {
    format!(
        "{}/{}/{}",
        registry,
        project_id,
        deployment_name(prefix, agent_id)
    )
}

/// Object path of an agent's uploaded source archive
pub fn source_object(owner_id: &str, agent_id: &str, archive: &str) -> String {
    format!("{}/{}/{}", owner_id, agent_id, archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::manifest::is_dns1123_label;

    #[test]
    fn test_valid_agent_ids() {
        let longest = "a".repeat(MAX_AGENT_ID_LEN);
        for id in ["abc123", "A1b2C3", "agent-7", longest.as_str()] {
            assert!(validate_agent_id(id).is_ok(), "{} should be valid", id);
        }
    }

    #[test]
    fn test_invalid_agent_ids() {
        let too_long = "a".repeat(MAX_AGENT_ID_LEN + 1);
        for id in [
            "",
            "-abc",
            "abc-",
            "a/b",
            "a b",
            "a.b",
            "ägent",
            "a--b",
            too_long.as_str(),
        ] {
            assert!(
                matches!(validate_agent_id(id), Err(DeployerError::InvalidArgument(_))),
                "{:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_names_are_deterministic() {
        assert_eq!(deployment_name("trading-agent", "abc123"), "trading-agent-abc123");
        assert_eq!(
            image_name("gcr.io", "proj", "trading-agent", "abc123"),
            "gcr.io/proj/trading-agent-abc123"
        );
        assert_eq!(
            image_name("gcr.io", "proj", "trading-agent", "abc123"),
            image_name("gcr.io", "proj", "trading-agent", "abc123")
        );
        assert_eq!(
            source_object("u1", "abc123", "agent-source.zip"),
            "u1/abc123/agent-source.zip"
        );
    }

    #[test]
    fn test_ids_differing_in_case_get_distinct_names() {
        let lower = deployment_name("trading-agent", "abc");
        let mixed = deployment_name("trading-agent", "Abc");
        let upper = deployment_name("trading-agent", "ABC");

        assert_eq!(lower, "trading-agent-abc");
        assert!(mixed.starts_with("trading-agent-abc--"));
        assert_eq!(mixed.len(), lower.len() + 2 + CASE_SUFFIX_LEN);
        assert_ne!(mixed, upper);
        assert_eq!(mixed, deployment_name("trading-agent", "Abc"));
        assert!(is_dns1123_label(&mixed));
    }

    #[test]
    fn test_longest_id_yields_valid_workload_name() {
        let id = "Z".repeat(MAX_AGENT_ID_LEN);
        validate_agent_id(&id).unwrap();
        assert!(is_dns1123_label(&deployment_name("trading-agent", &id)));
    }
}
