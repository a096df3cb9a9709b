//! Free Freebox router (Freebox OS API v4).
//!
//! Login is a two-step handshake: `GET /api/v4/login/` hands out a
//! challenge, and `POST /api/v4/login/session/` trades the app id plus
//! `hex(HMAC-SHA1(app_token, challenge))` for a session token. Data calls
//! carry the token in `X-Fbx-App-Auth`.
//!
//! Every response is wrapped in `{"success": bool, "result": ...}`.

use crate::adaptor::DeviceAdaptor;
use crate::builder::RecordSet;
use crate::session::Session;
use crate::value::flex_u64;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use homestat_core::{DecodeError, MetricRecord, PollError, RecordContext};
use homestat_transport::{DeviceClient, RawPayload, RequestSpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

const LOGIN_PATH: &str = "/api/v4/login/";
const SESSION_PATH: &str = "/api/v4/login/session/";
const CONNECTION_PATH: &str = "/api/v4/connection/";
const SYSTEM_PATH: &str = "/api/v4/system/";
const SWITCH_STATUS_PATH: &str = "/api/v4/switch/status/";
const AUTH_HEADER: &str = "X-Fbx-App-Auth";

/// Answer a login challenge with the app token.
///
/// # Errors
///
/// Never fails in practice, HMAC accepts keys of any length.
///
/// # Examples
///
/// ```
/// use homestat_devices::challenge_answer;
///
/// let answer = challenge_answer("Jefe", "what do ya want for nothing?").unwrap();
/// assert_eq!(answer, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
/// ```
pub fn challenge_answer(app_token: &str, challenge: &str) -> Result<String, InvalidLength> {
    let mut mac = Hmac::<Sha1>::new_from_slice(app_token.as_bytes())?;
    mac.update(challenge.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Freebox adaptor.
#[derive(Debug, Default)]
pub struct Freebox {
    auth_required: bool,
    session: Session,
}

/// Raw responses of one Freebox cycle.
#[derive(Debug, Clone, Default)]
pub struct FreeboxSnapshot {
    connection: Vec<u8>,
    system: Vec<u8>,
    switch_status: Vec<u8>,
    ports: Vec<(u64, Vec<u8>)>,
}

impl FreeboxSnapshot {
    /// Rebuild a snapshot from captured responses in fetch order:
    /// connection, system, switch status, then one port statistics response
    /// per port listed by the switch status.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if fewer than three payloads are given, the
    /// switch status cannot be read, or the number of port payloads does
    /// not match the listed ports.
    pub fn from_payloads(payloads: Vec<Vec<u8>>) -> Result<Self, DecodeError> {
        let mut payloads = payloads.into_iter();
        let (Some(connection), Some(system), Some(switch_status)) =
            (payloads.next(), payloads.next(), payloads.next())
        else {
            return Err(DecodeError::new(
                "expected connection, system and switch status payloads",
            ));
        };

        let ids = port_ids(&switch_status)?;
        let stats: Vec<Vec<u8>> = payloads.collect();
        if stats.len() != ids.len() {
            return Err(DecodeError::new(format!(
                "switch lists {} ports but {} port payloads were given",
                ids.len(),
                stats.len()
            )));
        }

        Ok(Self {
            connection,
            system,
            switch_status,
            ports: ids.into_iter().zip(stats).collect(),
        })
    }

    /// Port ids with captured statistics.
    pub fn port_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.ports.iter().map(|(id, _)| *id)
    }
}

impl Freebox {
    /// Create an adaptor; with `auth_required` data calls run behind a
    /// session token.
    #[must_use]
    pub fn new(auth_required: bool) -> Self {
        Self {
            auth_required,
            session: Session::default(),
        }
    }

    async fn login(&mut self, client: &DeviceClient) -> Result<(), PollError> {
        let credentials = client
            .source()
            .endpoint
            .credentials()
            .ok_or_else(|| PollError::Auth("no app id and token in endpoint URL".to_string()))?;

        let login = client.fetch(&RequestSpec::get(LOGIN_PATH)).await?;
        let challenge: Challenge = unwrap_result(&login.body, "login")?;

        let password = challenge_answer(credentials.password(), &challenge.challenge)
            .map_err(|e| PollError::Auth(e.to_string()))?;
        let body = serde_json::to_vec(&SessionRequest {
            app_id: credentials.username(),
            password,
        })
        .map_err(DecodeError::from)?;

        let response = client
            .fetch(&RequestSpec::post(SESSION_PATH).json_body(body))
            .await?;
        let grant: SessionGrant = unwrap_result(&response.body, "login session")?;
        self.session.store(grant.session_token);

        tracing::debug!(source = %client.source().id, "Freebox session opened");
        Ok(())
    }

    async fn call(&mut self, client: &DeviceClient, path: &str) -> Result<RawPayload, PollError> {
        loop {
            if self.auth_required && self.session.token().is_none() {
                self.login(client).await?;
            }

            let mut request = RequestSpec::get(path);
            if let Some(token) = self.session.token() {
                request = request.header(AUTH_HEADER, token);
            }

            match client.fetch(&request).await {
                Err(PollError::Auth(_)) if self.auth_required && self.session.invalidate() => {
                    tracing::debug!(source = %client.source().id, path, "Freebox session rejected, logging in again");
                }
                result => return result,
            }
        }
    }
}

impl DeviceAdaptor for Freebox {
    type Snapshot = FreeboxSnapshot;

    async fn fetch(&mut self, client: &DeviceClient) -> Result<FreeboxSnapshot, PollError> {
        self.session.begin_cycle();

        let connection = self.call(client, CONNECTION_PATH).await?.body;
        let system = self.call(client, SYSTEM_PATH).await?.body;
        let switch_status = self.call(client, SWITCH_STATUS_PATH).await?.body;

        let ids = port_ids(&switch_status)?;
        let mut ports = Vec::with_capacity(ids.len());
        for id in ids {
            let path = format!("/api/v4/switch/port/{id}/stats");
            ports.push((id, self.call(client, &path).await?.body));
        }

        Ok(FreeboxSnapshot {
            connection,
            system,
            switch_status,
            ports,
        })
    }

    fn normalize(
        &self,
        snapshot: &FreeboxSnapshot,
        ctx: &RecordContext,
    ) -> Result<Vec<MetricRecord>, DecodeError> {
        let connection: Connection = unwrap_result(&snapshot.connection, "connection")?;
        let system: System = unwrap_result(&snapshot.system, "system")?;
        let switch: Vec<SwitchPort> = unwrap_result(&snapshot.switch_status, "switch status")?;

        let mut out = RecordSet::new(ctx);

        if let Some(conn) = connection.kind.as_deref() {
            let tags = [("conn", conn)];
            out.push("connection_rx_bytes", connection.bytes_down, Some("B"), &tags);
            out.push("connection_tx_bytes", connection.bytes_up, Some("B"), &tags);
            out.push("connection_rx_rate", connection.rate_down, Some("B/s"), &tags);
            out.push("connection_tx_rate", connection.rate_up, Some("B/s"), &tags);
            out.push("connection_rx_bandwidth", connection.bandwidth_down, Some("bit/s"), &tags);
            out.push("connection_tx_bandwidth", connection.bandwidth_up, Some("bit/s"), &tags);
            let state = connection.state.as_deref().map(connection_state);
            out.push("connection_state", state, None, &tags);
        }

        if let Some(board) = system.board_name.as_deref() {
            let tags = [("board", board)];
            out.push("temperature_cpum", system.temp_cpum, Some("°C"), &tags);
            out.push("temperature_sw", system.temp_sw, Some("°C"), &tags);
            out.push("temperature_cpub", system.temp_cpub, Some("°C"), &tags);
            out.push("temperature_t1", system.temp_t1, Some("°C"), &tags);
            out.push("temperature_t2", system.temp_t2, Some("°C"), &tags);
            out.push("fan_rpm", system.fan_rpm, Some("rpm"), &tags);
        }

        for port in &switch {
            let Some(id) = port.id else {
                continue;
            };
            let id = id.to_string();
            let tags = [("port", id.as_str())];
            out.push("switch_port_link", port.link.as_deref().and_then(link_state), None, &tags);
            out.push("switch_port_speed", port.speed, Some("Mbit/s"), &tags);
        }

        for (id, payload) in &snapshot.ports {
            let stats: PortStats = unwrap_result(payload, &format!("switch port {id}"))?;
            let id = id.to_string();
            let tags = [("port", id.as_str())];
            out.push("switch_rx_bytes", stats.rx_good_bytes, Some("B"), &tags);
            out.push("switch_tx_bytes", stats.tx_bytes, Some("B"), &tags);
            out.push("switch_rx_packets", stats.rx_good_packets, None, &tags);
            out.push("switch_tx_packets", stats.tx_packets, None, &tags);
            out.push("switch_rx_errors", stats.rx_err_packets, None, &tags);
            out.push("switch_tx_collisions", stats.tx_collisions, None, &tags);
        }

        Ok(out.finish())
    }
}

/// `up` is 1, `down` is 0; other states carry no reading.
fn link_state(link: &str) -> Option<u64> {
    match link {
        "up" => Some(1),
        "down" => Some(0),
        _ => None,
    }
}

fn connection_state(state: &str) -> u64 {
    match state {
        "up" => 3,
        "going_up" => 2,
        "going_down" => 1,
        _ => 0,
    }
}

fn port_ids(switch_status: &[u8]) -> Result<Vec<u64>, DecodeError> {
    let ports: Vec<SwitchPort> = unwrap_result(switch_status, "switch status")?;
    Ok(ports.into_iter().filter_map(|p| p.id).collect())
}

/// Open the `{success, result}` envelope.
fn unwrap_result<T: DeserializeOwned>(payload: &[u8], what: &str) -> Result<T, DecodeError> {
    let envelope: Envelope<T> = serde_json::from_slice(payload)
        .map_err(|e| DecodeError::new(format!("{what}: {e}")))?;

    if !envelope.success {
        let reason = envelope
            .error_code
            .or(envelope.msg)
            .unwrap_or_else(|| "no reason given".to_string());
        return Err(DecodeError::new(format!("{what}: request failed ({reason})")));
    }

    envelope
        .result
        .ok_or_else(|| DecodeError::new(format!("{what}: missing result")))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    msg: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Challenge {
    challenge: String,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    app_id: &'a str,
    password: String,
}

#[derive(Deserialize)]
struct SessionGrant {
    session_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct Connection {
    #[serde(rename = "type")]
    kind: Option<String>,
    state: Option<String>,
    #[serde(default, deserialize_with = "flex_u64")]
    bytes_up: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    bytes_down: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    rate_up: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    rate_down: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    bandwidth_up: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    bandwidth_down: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct System {
    board_name: Option<String>,
    #[serde(default, deserialize_with = "flex_u64")]
    temp_cpum: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    temp_sw: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    temp_cpub: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    temp_t1: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    temp_t2: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    fan_rpm: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SwitchPort {
    #[serde(default, deserialize_with = "flex_u64")]
    id: Option<u64>,
    link: Option<String>,
    #[serde(default, deserialize_with = "flex_u64")]
    speed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PortStats {
    #[serde(default, deserialize_with = "flex_u64")]
    rx_good_bytes: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    tx_bytes: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    rx_good_packets: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    tx_packets: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    rx_err_packets: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    tx_collisions: Option<u64>,
}
