//! Scripted [`CommandApi`] fake for reconciler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use msa_client::xml::parse_response;
use msa_client::{ApiError, ClientError, Response, Status};
use tokio_util::sync::CancellationToken;

use crate::api::CommandApi;

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Ok(Response),
    Api(ApiError),
    HttpStatus(u16),
}

/// Responses are scripted per joined command string. Each command pops its
/// queue; the final entry is sticky so polling loops can re-ask. Commands
/// with no script yield an "invalid command" API error, which doubles as
/// the unsupported-probe case.
#[derive(Default)]
pub(crate) struct FakeApi {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, command: &str, result: Scripted) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, command: &str) -> bool {
        self.calls().iter().any(|call| call == command)
    }
}

#[async_trait]
impl CommandApi for FakeApi {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        parts: &[&str],
    ) -> Result<Response, ClientError> {
        let command = parts.join(" ");
        self.calls.lock().unwrap().push(command.clone());

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&command) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match scripted {
            Some(Scripted::Ok(response)) => Ok(response),
            Some(Scripted::Api(err)) => Err(ClientError::Api(err)),
            Some(Scripted::HttpStatus(status)) => Err(ClientError::HttpStatus(status)),
            None => Err(ClientError::Api(api_error("Invalid command."))),
        }
    }
}

pub(crate) fn api_error(message: &str) -> ApiError {
    ApiError {
        status: Status {
            response_type: "Error".to_string(),
            response_type_numeric: 1,
            response: message.to_string(),
            return_code: -1,
            ..Status::default()
        },
    }
}

/// An empty successful response (status object only).
pub(crate) fn ok_response() -> Response {
    response_with("")
}

/// A successful response wrapping the given `<OBJECT>` fragments.
pub(crate) fn response_with(objects: &str) -> Response {
    let body = format!(
        r#"<RESPONSE VERSION="L100">
            <OBJECT basetype="status" name="status" oid="1">
                <PROPERTY name="response-type">Success</PROPERTY>
                <PROPERTY name="response-type-numeric">0</PROPERTY>
                <PROPERTY name="response">Command completed successfully.</PROPERTY>
                <PROPERTY name="return-code">0</PROPERTY>
            </OBJECT>{objects}</RESPONSE>"#
    );
    parse_response(body.as_bytes()).expect("test fixture parses")
}

pub(crate) fn volume_object(name: &str, serial: &str, pool: &str, size_numeric: &str) -> String {
    format!(
        r#"<OBJECT basetype="volumes" name="volume" oid="2">
            <PROPERTY name="volume-name">{name}</PROPERTY>
            <PROPERTY name="serial-number">{serial}</PROPERTY>
            <PROPERTY name="durable-id">V1</PROPERTY>
            <PROPERTY name="storage-pool-name">{pool}</PROPERTY>
            <PROPERTY name="size-numeric">{size_numeric}</PROPERTY>
            <PROPERTY name="wwn">600C0FF000{serial}</PROPERTY>
        </OBJECT>"#
    )
}

pub(crate) fn cancelled_token() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}
