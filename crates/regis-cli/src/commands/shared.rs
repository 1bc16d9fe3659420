use serde::de::DeserializeOwned;

/// Parse a `snake_case` enum value through its serde representation.
/// Hyphens are accepted in place of underscores.
pub fn parse_enum<T>(raw: &str, field: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let normalized = raw.replace('-', "_");
    let json = format!("\"{normalized}\"");
    serde_json::from_str(&json).map_err(|error| anyhow::anyhow!("invalid {field} '{raw}': {error}"))
}

#[cfg(test)]
mod tests {
    use regis_core::enums::{AuditAction, EntityType};

    use super::parse_enum;

    #[test]
    fn parses_snake_case_enum() {
        let entity: EntityType = parse_enum("version", "entity-type").expect("should parse");
        assert_eq!(entity, EntityType::Version);
    }

    #[test]
    fn parses_hyphenated_alias() {
        let action: AuditAction = parse_enum("status-changed", "action").expect("should parse");
        assert_eq!(action, AuditAction::StatusChanged);
    }

    #[test]
    fn errors_on_invalid_enum() {
        let err = parse_enum::<EntityType>("widget", "entity-type").expect_err("should fail");
        assert!(err.to_string().contains("invalid entity-type 'widget'"));
    }
}
