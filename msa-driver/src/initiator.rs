//! Initiator reconciler.
//!
//! `set initiator` both creates and updates a nickname, and re-running it
//! with the same arguments is a no-op on the array, so create and update
//! share one path. Deletion removes only the nickname; the initiator
//! itself remains whatever the fabric reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use msa_client::Initiator;

use crate::api::CommandApi;
use crate::error::{DriverError, Result};
use crate::lookup;
use crate::validate::validate_initiator_id;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiatorPlan {
    /// WWPN, IQN, EUI, or NAA identifier.
    pub initiator_id: String,
    pub nickname: String,
    /// Optional host profile (standard, hp-ux, openvms).
    pub profile: Option<String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiatorState {
    pub id: String,
    pub initiator_id: String,
    pub nickname: String,
    pub profile: Option<String>,
    pub host_id: Option<String>,
    pub host_key: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

pub struct InitiatorReconciler<C> {
    api: C,
}

impl<C: CommandApi> InitiatorReconciler<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        plan: &InitiatorPlan,
    ) -> Result<InitiatorState> {
        self.apply(cancel, plan).await
    }

    /// Nickname and profile changes reuse the same idempotent command.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        plan: &InitiatorPlan,
    ) -> Result<InitiatorState> {
        self.apply(cancel, plan).await
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        plan: &InitiatorPlan,
    ) -> Result<InitiatorState> {
        let id = plan.initiator_id.trim();
        let nickname = plan.nickname.trim();
        if id.is_empty() || nickname.is_empty() {
            return Err(DriverError::Validation(
                "initiator_id and nickname are required".to_string(),
            ));
        }
        validate_initiator_id(id)?;

        let mut parts: Vec<&str> = vec!["set", "initiator", "id", id, "nickname", nickname];
        let profile = plan.profile.as_deref().map(str::trim).unwrap_or("");
        if !profile.is_empty() {
            parts.push("profile");
            parts.push(profile);
        }
        self.api.execute(cancel, &parts).await?;

        let initiator = lookup::find_initiator(&self.api, cancel, id, nickname)
            .await?
            .ok_or(DriverError::NotFound { kind: "initiator" })?;

        info!(initiator = id, nickname, "initiator nickname set");
        Ok(state_from(plan, &initiator, true))
    }

    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &InitiatorState,
    ) -> Result<Option<InitiatorState>> {
        let id = if state.id.trim().is_empty() {
            state.initiator_id.trim()
        } else {
            state.id.trim()
        };
        let nickname = state.nickname.trim();
        if id.is_empty() && nickname.is_empty() {
            return Err(DriverError::State("initiator_id is required".to_string()));
        }

        let Some(initiator) = lookup::find_initiator(&self.api, cancel, id, nickname).await?
        else {
            return Ok(None);
        };

        let plan = InitiatorPlan {
            initiator_id: state.initiator_id.clone(),
            nickname: state.nickname.clone(),
            profile: state.profile.clone(),
            allow_destroy: state.allow_destroy,
        };
        Ok(Some(state_from(&plan, &initiator, false)))
    }

    /// Removes the nickname only.
    pub async fn delete(&self, cancel: &CancellationToken, state: &InitiatorState) -> Result<()> {
        if !state.allow_destroy {
            return Err(DriverError::ConsentRequired { kind: "initiator" });
        }

        let id = if state.id.trim().is_empty() {
            state.initiator_id.trim()
        } else {
            state.id.trim()
        };
        if id.is_empty() {
            return Err(DriverError::State(
                "initiator_id is required for deletion".to_string(),
            ));
        }

        self.api
            .execute(cancel, &["delete", "initiator-nickname", id])
            .await?;
        info!(initiator = id, "initiator nickname deleted");
        Ok(())
    }

    /// Import by initiator id.
    pub async fn import(&self, cancel: &CancellationToken, id: &str) -> Result<InitiatorState> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DriverError::Validation(
                "import requires an initiator id".to_string(),
            ));
        }

        let initiator = lookup::find_initiator(&self.api, cancel, id, "")
            .await?
            .ok_or(DriverError::NotFound { kind: "initiator" })?;

        let plan = InitiatorPlan {
            initiator_id: initiator.id.clone(),
            nickname: initiator.nickname.clone(),
            profile: None,
            allow_destroy: false,
        };
        Ok(state_from(&plan, &initiator, false))
    }
}

/// `preserve_plan` keeps the operator's casing for the identifier and
/// nickname after a mutation; reads take the array's values. The profile
/// keeps the planned spelling when it matches case-insensitively and is
/// otherwise lowercased from the API.
fn state_from(plan: &InitiatorPlan, initiator: &Initiator, preserve_plan: bool) -> InitiatorState {
    let planned_id = plan.initiator_id.trim();
    let planned_nickname = plan.nickname.trim();
    let planned_profile = plan.profile.as_deref().map(str::trim).unwrap_or("");

    let mut state = InitiatorState {
        allow_destroy: plan.allow_destroy,
        ..InitiatorState::default()
    };

    state.initiator_id = if !planned_id.is_empty() {
        planned_id.to_string()
    } else {
        initiator.id.clone()
    };
    if !initiator.id.is_empty() {
        state.id = initiator.id.clone();
    } else {
        state.id = state.initiator_id.clone();
    }

    state.nickname = if preserve_plan && !planned_nickname.is_empty() {
        planned_nickname.to_string()
    } else if !initiator.nickname.is_empty() {
        initiator.nickname.clone()
    } else {
        planned_nickname.to_string()
    };

    let api_profile = initiator.profile.trim();
    state.profile = if preserve_plan && !planned_profile.is_empty() {
        Some(planned_profile.to_string())
    } else if !api_profile.is_empty() {
        if !planned_profile.is_empty() && planned_profile.eq_ignore_ascii_case(api_profile) {
            Some(planned_profile.to_string())
        } else {
            Some(api_profile.to_lowercase())
        }
    } else {
        None
    };

    if !initiator.host_id.is_empty() {
        state.host_id = Some(initiator.host_id.clone());
    }
    if !initiator.host_key.is_empty() {
        state.host_key = Some(initiator.host_key.clone());
    }
    state.properties = initiator.properties.clone();

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{response_with, FakeApi, Scripted};

    fn initiator_object(id: &str, nickname: &str, profile: &str) -> String {
        format!(
            r#"<OBJECT basetype="initiator" name="initiator" oid="2">
                <PROPERTY name="id">{id}</PROPERTY>
                <PROPERTY name="nickname">{nickname}</PROPERTY>
                <PROPERTY name="profile">{profile}</PROPERTY>
            </OBJECT>"#
        )
    }

    fn plan(id: &str, nickname: &str) -> InitiatorPlan {
        InitiatorPlan {
            initiator_id: id.to_string(),
            nickname: nickname.to_string(),
            profile: None,
            allow_destroy: true,
        }
    }

    #[tokio::test]
    async fn test_create_sets_nickname() {
        let api = FakeApi::new();
        api.on(
            "set initiator id 21000024FF543C7E nickname esx01-p1",
            Scripted::Ok(response_with("")),
        );
        api.on(
            "show initiators",
            Scripted::Ok(response_with(&initiator_object(
                "21000024ff543c7e",
                "esx01-p1",
                "Standard",
            ))),
        );

        let reconciler = InitiatorReconciler::new(&api);
        let cancel = CancellationToken::new();
        let state = reconciler
            .create(&cancel, &plan("21000024FF543C7E", "esx01-p1"))
            .await
            .unwrap();

        // Planned casing is preserved; the canonical id is the array's.
        assert_eq!(state.initiator_id, "21000024FF543C7E");
        assert_eq!(state.id, "21000024ff543c7e");
        assert_eq!(state.nickname, "esx01-p1");
        // API profile is lowercased when the plan did not set one.
        assert_eq!(state.profile.as_deref(), Some("standard"));
    }

    #[tokio::test]
    async fn test_profile_keeps_planned_spelling_when_equal() {
        let api = FakeApi::new();
        api.on(
            "show initiators",
            Scripted::Ok(response_with(&initiator_object(
                "21000024ff543c7e",
                "esx01-p1",
                "Standard",
            ))),
        );

        let reconciler = InitiatorReconciler::new(&api);
        let cancel = CancellationToken::new();
        let state = InitiatorState {
            initiator_id: "21000024ff543c7e".to_string(),
            nickname: "esx01-p1".to_string(),
            profile: Some("STANDARD".to_string()),
            ..InitiatorState::default()
        };
        let read = reconciler.read(&cancel, &state).await.unwrap().unwrap();
        assert_eq!(read.profile.as_deref(), Some("STANDARD"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_id() {
        let api = FakeApi::new();
        let reconciler = InitiatorReconciler::new(&api);
        let cancel = CancellationToken::new();
        let err = reconciler
            .create(&cancel, &plan("not-hex", "nick"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Validation(_)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_with_profile_command_shape() {
        let api = FakeApi::new();
        api.on(
            "set initiator id iqn.2024-01.org.example:node1 nickname node1 profile standard",
            Scripted::Ok(response_with("")),
        );
        api.on(
            "show initiators",
            Scripted::Ok(response_with(&initiator_object(
                "iqn.2024-01.org.example:node1",
                "node1",
                "Standard",
            ))),
        );

        let reconciler = InitiatorReconciler::new(&api);
        let cancel = CancellationToken::new();
        let mut plan = plan("iqn.2024-01.org.example:node1", "node1");
        plan.profile = Some("standard".to_string());
        let state = reconciler.create(&cancel, &plan).await.unwrap();
        assert_eq!(state.profile.as_deref(), Some("standard"));
        assert!(api.called(
            "set initiator id iqn.2024-01.org.example:node1 nickname node1 profile standard"
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_nickname_only_under_consent() {
        let api = FakeApi::new();
        api.on(
            "delete initiator-nickname 21000024ff543c7e",
            Scripted::Ok(response_with("")),
        );

        let reconciler = InitiatorReconciler::new(&api);
        let cancel = CancellationToken::new();
        let mut state = InitiatorState {
            id: "21000024ff543c7e".to_string(),
            initiator_id: "21000024ff543c7e".to_string(),
            nickname: "esx01-p1".to_string(),
            allow_destroy: false,
            ..InitiatorState::default()
        };

        let err = reconciler.delete(&cancel, &state).await.unwrap_err();
        assert!(matches!(err, DriverError::ConsentRequired { kind: "initiator" }));

        state.allow_destroy = true;
        reconciler.delete(&cancel, &state).await.unwrap();
        assert!(api.called("delete initiator-nickname 21000024ff543c7e"));
    }

    #[tokio::test]
    async fn test_read_drift() {
        let api = FakeApi::new();
        api.on("show initiators", Scripted::Ok(response_with("")));

        let reconciler = InitiatorReconciler::new(&api);
        let cancel = CancellationToken::new();
        let state = InitiatorState {
            initiator_id: "21000024ff543c7e".to_string(),
            ..InitiatorState::default()
        };
        assert!(reconciler.read(&cancel, &state).await.unwrap().is_none());
    }
}
