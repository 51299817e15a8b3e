//! Integration tests for msa-driver
//!
//! Drives whole reconcile flows through the public API against a scripted
//! in-memory command endpoint, plus the filesystem destroy lock against a
//! real temporary directory.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use msa_client::xml::parse_response;
use msa_client::{ApiError, ClientError, Response, Status};
use msa_driver::{
    CommandApi, DestroyLock, DestroyLockOptions, DriverError, MappingPlan, MappingReconciler,
    VolumePlan, VolumeReconciler, VolumeState,
};

/// Minimal scripted endpoint: responses queue per command, the last entry
/// repeats, unscripted commands answer "Invalid command.".
#[derive(Default)]
struct ScriptedArray {
    responses: Mutex<HashMap<String, VecDeque<Response>>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedArray {
    fn respond(&self, command: &str, objects: &str) -> &Self {
        let body = format!(
            r#"<RESPONSE VERSION="L100">
                <OBJECT basetype="status" name="status" oid="1">
                    <PROPERTY name="response-type-numeric">0</PROPERTY>
                    <PROPERTY name="response">Command completed successfully.</PROPERTY>
                </OBJECT>{objects}</RESPONSE>"#
        );
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(parse_response(body.as_bytes()).unwrap());
        self
    }

    fn fail(&self, command: &str, message: &str) -> &Self {
        self.failures
            .lock()
            .unwrap()
            .insert(command.to_string(), message.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandApi for ScriptedArray {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        parts: &[&str],
    ) -> Result<Response, ClientError> {
        let command = parts.join(" ");
        self.calls.lock().unwrap().push(command.clone());

        if let Some(message) = self.failures.lock().unwrap().get(&command) {
            return Err(ClientError::Api(ApiError {
                status: Status {
                    response_type: "Error".to_string(),
                    response_type_numeric: 1,
                    response: message.clone(),
                    return_code: -1,
                    ..Status::default()
                },
            }));
        }

        let mut responses = self.responses.lock().unwrap();
        let scripted = match responses.get_mut(&command) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        scripted.ok_or_else(|| {
            ClientError::Api(ApiError {
                status: Status {
                    response_type: "Error".to_string(),
                    response_type_numeric: 1,
                    response: "Invalid command.".to_string(),
                    return_code: -1,
                    ..Status::default()
                },
            })
        })
    }
}

fn volume_object(name: &str, serial: &str, pool: &str, size_numeric: &str) -> String {
    format!(
        r#"<OBJECT basetype="volumes" name="volume" oid="2">
            <PROPERTY name="volume-name">{name}</PROPERTY>
            <PROPERTY name="serial-number">{serial}</PROPERTY>
            <PROPERTY name="storage-pool-name">{pool}</PROPERTY>
            <PROPERTY name="size-numeric">{size_numeric}</PROPERTY>
        </OBJECT>"#
    )
}

#[tokio::test]
async fn test_volume_lifecycle_end_to_end() {
    let array = ScriptedArray::default();
    array.respond("show volumes", "");
    array.respond(
        "show volumes",
        &volume_object("vol01", "serial-1", "A", "1953792"),
    );
    array.respond("create volume vol01 pool A size 1GB access no-access", "");
    for probe in [
        "show maps volume serial-1",
        "show maps volume vol01",
        "show maps",
        "show volume-copy",
        "show connections volume vol01",
        "show connections volume serial-1",
        "show sessions volume vol01",
        "show sessions volume serial-1",
        "show connections",
        "show sessions",
        "show host-connections",
    ] {
        array.respond(probe, "");
    }
    array.respond("delete volumes serial-1", "");

    let tmp = tempfile::tempdir().unwrap();
    let lock_options = DestroyLockOptions {
        dir: tmp.path().join("lock.d"),
        wait: Duration::from_secs(5),
    };
    let reconciler = VolumeReconciler::new(&array).with_lock_options(lock_options);
    let cancel = CancellationToken::new();

    let plan = VolumePlan {
        name: "vol01".to_string(),
        size: "1GB".to_string(),
        pool: Some("A".to_string()),
        vdisk: None,
        allow_destroy: true,
    };

    // Create, observe identity, read back, then delete.
    let state = reconciler.create(&cancel, &plan).await.unwrap();
    assert_eq!(state.serial_number.as_deref(), Some("serial-1"));
    assert_eq!(state.wwid.as_deref(), Some("serial-1"));

    let read = reconciler.read(&cancel, &state).await.unwrap().unwrap();
    assert_eq!(read.pool.as_deref(), Some("A"));

    reconciler.delete(&cancel, &state).await.unwrap();
    assert!(array.calls().contains(&"delete volumes serial-1".to_string()));
}

#[tokio::test]
async fn test_volume_collision_produces_no_state() {
    let array = ScriptedArray::default();
    array.respond("show volumes", "");
    array.respond(
        "show volumes",
        // Existing vol01 is ~1GB; the plan wants 2GB.
        &volume_object("vol01", "serial-1", "A", "1953792"),
    );
    array.fail(
        "create volume vol01 pool A size 2GB access no-access",
        "Error: The name is already in use.",
    );

    let reconciler = VolumeReconciler::new(&array);
    let cancel = CancellationToken::new();
    let plan = VolumePlan {
        name: "vol01".to_string(),
        size: "2GB".to_string(),
        pool: Some("A".to_string()),
        vdisk: None,
        allow_destroy: false,
    };

    let err = reconciler.create(&cancel, &plan).await.unwrap_err();
    assert!(matches!(err, DriverError::Collision { kind: "volume", .. }));
}

#[tokio::test]
async fn test_mapping_flow_matches_spec_shape() {
    let array = ScriptedArray::default();
    array.respond(
        "map volume access read-write ports a1,b1 lun 10 initiator Host1.* vol01",
        "",
    );
    array.respond(
        "show maps initiator Host1.*",
        r#"<OBJECT basetype="volume-view" name="mapping" oid="7">
            <PROPERTY name="volume">vol01</PROPERTY>
            <PROPERTY name="lun">10</PROPERTY>
            <PROPERTY name="access">read-write</PROPERTY>
            <PROPERTY name="ports">a1,b1</PROPERTY>
        </OBJECT>"#,
    );

    let reconciler = MappingReconciler::new(&array);
    let cancel = CancellationToken::new();
    let plan = MappingPlan {
        volume_name: "vol01".to_string(),
        target_type: "host".to_string(),
        target_name: "Host1".to_string(),
        access: Some("rw".to_string()),
        lun: Some("10".to_string()),
        ports: Some(vec!["a1".to_string(), "b1".to_string()]),
    };

    let state = reconciler.create(&cancel, &plan).await.unwrap();
    assert_eq!(state.id, "vol01:Host1.*");
    assert_eq!(state.access.as_deref(), Some("read-write"));
}

#[tokio::test]
async fn test_consent_refusal_never_touches_the_array() {
    let array = ScriptedArray::default();
    let reconciler = VolumeReconciler::new(&array);
    let cancel = CancellationToken::new();

    let state = VolumeState {
        id: "serial-1".to_string(),
        name: "vol01".to_string(),
        allow_destroy: false,
        ..VolumeState::default()
    };

    let err = reconciler.delete(&cancel, &state).await.unwrap_err();
    assert!(matches!(err, DriverError::ConsentRequired { kind: "volume" }));
    assert!(array.calls().is_empty());
}

#[tokio::test]
async fn test_destroy_lock_serializes_two_holders() {
    let tmp = tempfile::tempdir().unwrap();
    let options = DestroyLockOptions {
        dir: tmp.path().join("lock.d"),
        wait: Duration::from_secs(10),
    };
    let cancel = CancellationToken::new();

    let first = DestroyLock::acquire(&cancel, "first", &options).await.unwrap();

    // The second waiter only gets the lock after the first releases.
    let second = {
        let options = options.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { DestroyLock::acquire(&cancel, "second", &options).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!second.is_finished(), "second holder must wait");

    first.release().unwrap();
    let second = second.await.unwrap().unwrap();
    second.release().unwrap();
}

#[test]
fn test_state_records_round_trip_as_json() {
    let state = VolumeState {
        id: "serial-1".to_string(),
        name: "vol01".to_string(),
        size: "1GB".to_string(),
        pool: Some("A".to_string()),
        vdisk: None,
        durable_id: Some("V0".to_string()),
        serial_number: Some("serial-1".to_string()),
        wwid: Some("serial-1".to_string()),
        allow_destroy: true,
    };

    let json = serde_json::to_string(&state).unwrap();
    let parsed: VolumeState = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.id, state.id);
    assert_eq!(parsed.pool, state.pool);
    assert!(parsed.allow_destroy);

    // allow_destroy defaults to false for states written before the flag
    // existed.
    let legacy: VolumeState =
        serde_json::from_str(r#"{"id":"s","name":"v","size":"1GB","pool":null,"vdisk":null,"durable_id":null,"serial_number":null,"wwid":null}"#)
            .unwrap();
    assert!(!legacy.allow_destroy);
}

#[tokio::test]
async fn test_serial_import_then_read_round_trip() {
    let array = ScriptedArray::default();
    array.respond(
        "show volumes",
        &volume_object("vol01", "serial-1", "A", "1953792"),
    );

    let reconciler = VolumeReconciler::new(&array);
    let cancel = CancellationToken::new();

    let imported = reconciler.import(&cancel, "serial-1").await.unwrap();
    let read = reconciler.read(&cancel, &imported).await.unwrap().unwrap();

    assert_eq!(read.name, imported.name);
    assert_eq!(read.id, imported.id);
    assert_eq!(read.pool, imported.pool);
}
