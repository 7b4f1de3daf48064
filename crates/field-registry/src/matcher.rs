//! Raw field-name matching.
//!
//! Pure composition of the normalizer and registry lookup; no side effects.
//! Ingestion calls this once per incoming key and routes `Ambiguous` and
//! `NoMatch` results to the unknown-field tracker.

use leadforge_core::{MatchResult, ScopeContext, normalize};

use crate::FieldRegistry;

/// Match one raw vendor field name against the registry within a scope.
pub fn match_field(
    registry: &FieldRegistry,
    raw_field_name: &str,
    ctx: &ScopeContext,
) -> MatchResult {
    registry.resolve_candidates(&normalize(raw_field_name), ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldRegistry;
    use leadforge_core::{
        AliasConfidence, AliasOwner, AliasScope, FieldDataType, SystemField,
    };
    use state_store::MemStateStore;
    use std::sync::Arc;

    async fn registry_with_email() -> FieldRegistry {
        let reg = FieldRegistry::open(Arc::new(MemStateStore::new()))
            .await
            .unwrap();
        reg.register_field(SystemField::new(
            "email",
            "Email",
            FieldDataType::String,
        ))
        .await
        .unwrap();
        reg.register_alias(
            "email",
            "email_address",
            AliasScope::Global,
            AliasConfidence::High,
            &AliasOwner::global(),
        )
        .await
        .unwrap();
        reg
    }

    #[tokio::test]
    async fn test_match_goes_through_normalizer() {
        let reg = registry_with_email().await;
        let ctx = ScopeContext::global();

        for raw in ["email_address", "Email Address", "EMAILADDRESS", "e m a i l address"]
        {
            assert_eq!(
                match_field(&reg, raw, &ctx),
                MatchResult::Exact {
                    field_key: "email".into()
                },
                "raw = {raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_normalize_equal_names_match_equally() {
        let reg = registry_with_email().await;
        let ctx = ScopeContext::source("src-1");

        // Any two spellings with the same normalized form must produce the
        // same result against the same registry and scope.
        let pairs = [
            ("first_name", "First Name"),
            ("email-address", "EMAIL_ADDRESS"),
            ("##", "  "),
        ];
        for (a, b) in pairs {
            assert_eq!(
                match_field(&reg, a, &ctx),
                match_field(&reg, b, &ctx),
                "pair = ({a:?}, {b:?})"
            );
        }
    }

    #[tokio::test]
    async fn test_symbol_only_name_is_no_match() {
        let reg = registry_with_email().await;
        assert_eq!(
            match_field(&reg, "!!!", &ScopeContext::global()),
            MatchResult::NoMatch
        );
    }
}
