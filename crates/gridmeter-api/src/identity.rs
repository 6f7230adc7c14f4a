//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "REST and WebSocket surface for the gridmeter runtime."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use gridmeter_common::config::ApiToken;
use gridmeter_core::Principal;
use tracing::debug;

/// Resolves bearer tokens to principals. The API trusts whatever principal
/// comes back; ownership checks happen in the core and billing layers.
pub trait Identity: Send + Sync + 'static {
    fn authenticate(&self, token: &str) -> Option<Principal>;
}

/// Fixed token table sourced from configuration.
#[derive(Debug, Clone)]
pub struct StaticTokenIdentity {
    tokens: Arc<HashMap<String, Principal>>,
}

impl StaticTokenIdentity {
    pub fn new(entries: impl IntoIterator<Item = (String, Principal)>) -> Self {
        Self {
            tokens: Arc::new(entries.into_iter().collect()),
        }
    }

    /// Build the table from the `[[api.tokens]]` configuration entries.
    pub fn from_config(tokens: &[ApiToken]) -> Self {
        Self::new(tokens.iter().map(|t| {
            let principal = if t.admin {
                Principal::admin(t.user_id)
            } else {
                Principal::user(t.user_id)
            };
            (t.token.clone(), principal)
        }))
    }
}

impl Identity for StaticTokenIdentity {
    fn authenticate(&self, token: &str) -> Option<Principal> {
        let principal = self.tokens.get(token).copied();
        if principal.is_none() {
            debug!("api token rejected");
        }
        principal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn tokens_map_to_principals() {
        let user = Uuid::new_v4();
        let operator = Uuid::new_v4();
        let identity = StaticTokenIdentity::from_config(&[
            ApiToken {
                token: "user-token".into(),
                user_id: user,
                admin: false,
            },
            ApiToken {
                token: "admin-token".into(),
                user_id: operator,
                admin: true,
            },
        ]);

        let principal = identity.authenticate("user-token").unwrap();
        assert_eq!(principal.user_id, user);
        assert!(!principal.admin);
        assert!(identity.authenticate("admin-token").unwrap().admin);
        assert!(identity.authenticate("missing").is_none());
    }
}
