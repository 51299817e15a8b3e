//! Shared lookups over the array's `show` views.
//!
//! Every lookup follows the same identity rules: an exact serial-number
//! match wins, then the first case-insensitive name match. These back both
//! the reconcilers and the thin read-only data sources.

use tokio_util::sync::CancellationToken;

use msa_client::{
    host_groups_from_response, hosts_from_response, initiators_from_response,
    pool_names_from_response, pools_from_response, snapshots_from_response, volumes_from_response,
    Host, HostGroup, Initiator, Pool, Snapshot, Volume,
};

use crate::api::CommandApi;
use crate::error::{DriverError, Result};

pub async fn find_volume<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    name: &str,
    serial: &str,
) -> Result<Option<Volume>> {
    let response = api.execute(cancel, &["show", "volumes"]).await?;
    let volumes = volumes_from_response(&response);

    if !serial.is_empty() {
        if let Some(volume) = volumes.iter().find(|vol| vol.serial_number == serial) {
            return Ok(Some(volume.clone()));
        }
    }

    Ok(volumes
        .into_iter()
        .find(|vol| !name.is_empty() && vol.name.eq_ignore_ascii_case(name)))
}

pub async fn find_snapshot<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    name: &str,
    serial: &str,
) -> Result<Option<Snapshot>> {
    let response = api.execute(cancel, &["show", "snapshots"]).await?;
    let snapshots = snapshots_from_response(&response);

    if !serial.is_empty() {
        if let Some(snapshot) = snapshots.iter().find(|snap| snap.serial_number == serial) {
            return Ok(Some(snapshot.clone()));
        }
    }

    Ok(snapshots
        .into_iter()
        .find(|snap| !name.is_empty() && snap.name.eq_ignore_ascii_case(name)))
}

/// Host enumeration goes through `show host-groups`: the dialect nests
/// host objects under their groups, and ungrouped hosts appear under a
/// placeholder group, so the flattened view covers everything.
pub async fn find_host<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    name: &str,
) -> Result<Option<Host>> {
    let response = api.execute(cancel, &["show", "host-groups"]).await?;
    Ok(hosts_from_response(&response)
        .into_iter()
        .find(|host| !name.is_empty() && host.name.eq_ignore_ascii_case(name)))
}

pub async fn find_host_group<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    name: &str,
) -> Result<Option<HostGroup>> {
    let response = api.execute(cancel, &["show", "host-groups"]).await?;
    Ok(host_groups_from_response(&response)
        .into_iter()
        .find(|group| !name.is_empty() && group.name.eq_ignore_ascii_case(name)))
}

/// Initiators resolve by id first, then by nickname.
pub async fn find_initiator<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    id: &str,
    nickname: &str,
) -> Result<Option<Initiator>> {
    let response = api.execute(cancel, &["show", "initiators"]).await?;
    let initiators = initiators_from_response(&response);

    if !id.is_empty() {
        if let Some(initiator) = initiators
            .iter()
            .find(|init| init.id.eq_ignore_ascii_case(id))
        {
            return Ok(Some(initiator.clone()));
        }
    }

    Ok(initiators
        .into_iter()
        .find(|init| !nickname.is_empty() && init.nickname.eq_ignore_ascii_case(nickname)))
}

pub async fn find_pool<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    name: &str,
) -> Result<Option<Pool>> {
    let response = api.execute(cancel, &["show", "pools"]).await?;
    let pools = pools_from_response(&response);

    if let Some(pool) = pools.iter().find(|pool| pool.serial_number == name) {
        return Ok(Some(pool.clone()));
    }

    Ok(pools
        .into_iter()
        .find(|pool| !name.is_empty() && pool.name.eq_ignore_ascii_case(name)))
}

/// The placement default when a plan names neither pool nor vdisk: usable
/// only when the array reports exactly one pool.
pub async fn default_pool<C: CommandApi>(api: &C, cancel: &CancellationToken) -> Result<String> {
    let response = api.execute(cancel, &["show", "pools"]).await?;
    let mut names = pool_names_from_response(&response);

    match names.len() {
        1 => Ok(names.remove(0)),
        0 => Err(DriverError::Validation(
            "no pools were returned; set pool or vdisk explicitly".to_string(),
        )),
        _ => Err(DriverError::Validation(format!(
            "multiple pools found; set pool or vdisk explicitly ({})",
            names.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{response_with, volume_object, FakeApi, Scripted};

    #[tokio::test]
    async fn test_find_volume_prefers_serial() {
        let api = FakeApi::new();
        let objects = format!(
            "{}{}",
            volume_object("vol01", "serial-1", "A", "1953792"),
            volume_object("VOL01", "serial-2", "B", "1953792"),
        );
        api.on("show volumes", Scripted::Ok(response_with(&objects)));

        let cancel = CancellationToken::new();
        let by_serial = find_volume(&api, &cancel, "vol01", "serial-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_serial.pool_name, "B");

        // Name fallback is case-insensitive, first match wins.
        let by_name = find_volume(&api, &cancel, "Vol01", "")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.serial_number, "serial-1");

        assert!(find_volume(&api, &cancel, "missing", "")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_default_pool_requires_exactly_one() {
        let api = FakeApi::new();
        api.on(
            "show pools",
            Scripted::Ok(response_with(
                r#"<OBJECT basetype="pools" name="pool" oid="2">
                    <PROPERTY name="pool-name">A</PROPERTY>
                </OBJECT>"#,
            )),
        );
        let cancel = CancellationToken::new();
        assert_eq!(default_pool(&api, &cancel).await.unwrap(), "A");

        let api = FakeApi::new();
        api.on("show pools", Scripted::Ok(response_with("")));
        assert!(default_pool(&api, &cancel).await.is_err());

        let api = FakeApi::new();
        api.on(
            "show pools",
            Scripted::Ok(response_with(
                r#"<OBJECT basetype="pools" name="pool" oid="2">
                    <PROPERTY name="pool-name">A</PROPERTY>
                </OBJECT>
                <OBJECT basetype="pools" name="pool" oid="3">
                    <PROPERTY name="pool-name">B</PROPERTY>
                </OBJECT>"#,
            )),
        );
        let err = default_pool(&api, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("multiple pools"));
    }
}
