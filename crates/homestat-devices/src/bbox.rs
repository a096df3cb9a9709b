//! Bouygues Telecom BBox router.
//!
//! The BBox REST API answers every call with a JSON array of objects keyed
//! by section (`device`, `wan`, `lan`, `wireless`). Authenticated calls carry
//! the `BBOX_ID` cookie returned by `POST /api/v1/login`.

use crate::adaptor::DeviceAdaptor;
use crate::builder::RecordSet;
use crate::session::Session;
use crate::value::{as_label, flex_u64};
use homestat_core::{DecodeError, MetricRecord, PollError, RecordContext};
use homestat_transport::{cookie_value, form_urlencode, DeviceClient, RawPayload, RequestSpec};
use serde::Deserialize;
use serde_json::Value;

const LOGIN_PATH: &str = "/api/v1/login";
const SESSION_COOKIE: &str = "BBOX_ID";

/// Data calls of one cycle, in order.
const DATA_PATHS: [&str; 6] = [
    "/api/v1/device/cpu",
    "/api/v1/device/mem",
    "/api/v1/wan/ip/stats",
    "/api/v1/lan/stats",
    "/api/v1/wireless/24/stats",
    "/api/v1/wireless/5/stats",
];

/// BBox adaptor.
#[derive(Debug, Default)]
pub struct BBox {
    auth_required: bool,
    session: Session,
}

/// Raw responses of the BBox data calls.
#[derive(Debug, Clone, Default)]
pub struct BBoxSnapshot {
    payloads: Vec<Vec<u8>>,
}

impl BBoxSnapshot {
    /// Snapshot from response bodies.
    #[must_use]
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        Self { payloads }
    }

    /// Response bodies in call order.
    #[must_use]
    pub fn payloads(&self) -> &[Vec<u8>] {
        &self.payloads
    }
}

impl BBox {
    /// Create an adaptor; with `auth_required` every cycle runs behind a
    /// login session.
    #[must_use]
    pub fn new(auth_required: bool) -> Self {
        Self {
            auth_required,
            session: Session::default(),
        }
    }

    async fn login(&mut self, client: &DeviceClient) -> Result<(), PollError> {
        let password = client
            .source()
            .endpoint
            .credentials()
            .map(|c| c.password().to_string())
            .ok_or_else(|| PollError::Auth("no password in endpoint URL".to_string()))?;

        let request = RequestSpec::post(LOGIN_PATH)
            .form_body(form_urlencode(&[("password", password.as_str())]));
        let response = client.fetch(&request).await?;

        let token = cookie_value(response.cookies(), SESSION_COOKIE).ok_or_else(|| {
            PollError::Auth(format!("login response carried no {SESSION_COOKIE} cookie"))
        })?;
        self.session.store(token);

        tracing::debug!(source = %client.source().id, "BBox session opened");
        Ok(())
    }

    async fn call(&mut self, client: &DeviceClient, path: &str) -> Result<RawPayload, PollError> {
        loop {
            if self.auth_required && self.session.token().is_none() {
                self.login(client).await?;
            }

            let mut request = RequestSpec::get(path).header("Accept", "application/json");
            if let Some(token) = self.session.token() {
                request = request.header("Cookie", format!("{SESSION_COOKIE}={token}"));
            }

            match client.fetch(&request).await {
                Err(PollError::Auth(_)) if self.auth_required && self.session.invalidate() => {
                    tracing::debug!(source = %client.source().id, path, "BBox session rejected, logging in again");
                }
                result => return result,
            }
        }
    }
}

impl DeviceAdaptor for BBox {
    type Snapshot = BBoxSnapshot;

    async fn fetch(&mut self, client: &DeviceClient) -> Result<BBoxSnapshot, PollError> {
        self.session.begin_cycle();

        let mut payloads = Vec::with_capacity(DATA_PATHS.len());
        for path in DATA_PATHS {
            payloads.push(self.call(client, path).await?.body);
        }
        Ok(BBoxSnapshot::new(payloads))
    }

    fn normalize(
        &self,
        snapshot: &BBoxSnapshot,
        ctx: &RecordContext,
    ) -> Result<Vec<MetricRecord>, DecodeError> {
        let mut stats = Stats::default();
        for payload in &snapshot.payloads {
            let sections: Vec<Sections> = serde_json::from_slice(payload)?;
            for section in sections {
                stats.merge(section);
            }
        }
        Ok(stats.into_records(ctx))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Sections {
    device: Option<DeviceSection>,
    wan: Option<WanSection>,
    lan: Option<LanSection>,
    wireless: Option<WirelessSection>,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceSection {
    cpu: Option<Cpu>,
    mem: Option<Memory>,
}

#[derive(Debug, Default, Deserialize)]
struct Cpu {
    #[serde(default)]
    time: CpuTime,
    #[serde(default)]
    process: Processes,
    #[serde(default)]
    temperature: Temperature,
}

#[derive(Debug, Default, Deserialize)]
struct CpuTime {
    #[serde(default, deserialize_with = "flex_u64")]
    total: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    idle: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Processes {
    #[serde(default, deserialize_with = "flex_u64")]
    created: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    running: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    blocked: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Temperature {
    #[serde(default, deserialize_with = "flex_u64")]
    main: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Memory {
    #[serde(default, deserialize_with = "flex_u64")]
    total: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    free: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    cached: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WanSection {
    ip: Option<WanIp>,
}

#[derive(Debug, Default, Deserialize)]
struct WanIp {
    stats: Option<Traffic>,
}

#[derive(Debug, Default, Deserialize)]
struct LanSection {
    stats: Option<LanStats>,
}

#[derive(Debug, Default, Deserialize)]
struct LanStats {
    #[serde(default)]
    port: Vec<Traffic>,
}

#[derive(Debug, Default, Deserialize)]
struct WirelessSection {
    ssid: Option<Ssid>,
}

#[derive(Debug, Default, Deserialize)]
struct Ssid {
    id: Option<Value>,
    stats: Option<Traffic>,
}

#[derive(Debug, Default, Deserialize)]
struct Traffic {
    #[serde(default)]
    rx: Flow,
    #[serde(default)]
    tx: Flow,
}

#[derive(Debug, Default, Deserialize)]
struct Flow {
    #[serde(default, deserialize_with = "flex_u64")]
    bytes: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    packets: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    packetserrors: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    packetsdiscards: Option<u64>,
    #[serde(default, deserialize_with = "flex_u64")]
    bandwidth: Option<u64>,
}

/// Sections gathered across the calls of one cycle.
#[derive(Debug, Default)]
struct Stats {
    cpu: Option<Cpu>,
    mem: Option<Memory>,
    wan: Option<Traffic>,
    lan: Vec<Traffic>,
    wireless: Vec<(String, Traffic)>,
}

impl Stats {
    fn merge(&mut self, sections: Sections) {
        if let Some(device) = sections.device {
            if device.cpu.is_some() {
                self.cpu = device.cpu;
            }
            if device.mem.is_some() {
                self.mem = device.mem;
            }
        }
        if let Some(stats) = sections.wan.and_then(|w| w.ip).and_then(|ip| ip.stats) {
            self.wan = Some(stats);
        }
        if let Some(stats) = sections.lan.and_then(|l| l.stats) {
            self.lan = stats.port;
        }
        if let Some(Ssid {
            id: Some(id),
            stats: Some(stats),
        }) = sections.wireless.and_then(|w| w.ssid)
        {
            if let Some(band) = as_label(&id) {
                self.wireless.retain(|(existing, _)| *existing != band);
                self.wireless.push((band, stats));
            }
        }
    }

    fn into_records(self, ctx: &RecordContext) -> Vec<MetricRecord> {
        let mut out = RecordSet::new(ctx);

        if let Some(cpu) = &self.cpu {
            out.push("cpu_time_total", cpu.time.total, None, &[]);
            out.push("cpu_time_idle", cpu.time.idle, None, &[]);
            out.push("process_created", cpu.process.created, None, &[]);
            out.push("process_running", cpu.process.running, None, &[]);
            out.push("process_blocked", cpu.process.blocked, None, &[]);
            out.push("temperature_main", cpu.temperature.main, Some("°C"), &[]);
        }

        if let Some(mem) = &self.mem {
            out.push("memory_total", mem.total, None, &[]);
            out.push("memory_free", mem.free, None, &[]);
            out.push("memory_cached", mem.cached, None, &[]);
        }

        if let Some(wan) = &self.wan {
            push_traffic(&mut out, "wan", wan, &[]);
        }

        for (index, port) in self.lan.iter().enumerate() {
            let index = index.to_string();
            push_traffic(&mut out, "lan", port, &[("port", index.as_str())]);
        }

        for (band, stats) in &self.wireless {
            push_traffic(&mut out, "wifi", stats, &[("band", band.as_str())]);
        }

        out.finish()
    }
}

fn push_traffic(out: &mut RecordSet<'_>, prefix: &str, traffic: &Traffic, tags: &[(&str, &str)]) {
    for (direction, flow) in [("rx", &traffic.rx), ("tx", &traffic.tx)] {
        let name = |suffix: &str| format!("{prefix}_{direction}_{suffix}");
        out.push(&name("bytes"), flow.bytes, Some("B"), tags);
        out.push(&name("packets"), flow.packets, None, tags);
        out.push(&name("packets_errors"), flow.packetserrors, None, tags);
        out.push(&name("packets_discards"), flow.packetsdiscards, None, tags);
        out.push(&name("bandwidth"), flow.bandwidth, None, tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use homestat_core::{Endpoint, MetricValue, SourceConfig, SourceKind};
    use homestat_transport::stub::{StubResponse, StubServer};
    use std::sync::Arc;

    const CPU: &str = r#"[{"device":{"cpu":{"time":{"total":"8213450","idle":7990021},
        "process":{"created":51234,"running":"2","blocked":0},
        "temperature":{"main":67}}}}]"#;
    const MEM: &str = r#"[{"device":{"mem":{"total":"492792","free":"120340","cached":98232}}}]"#;
    const WAN: &str = r#"[{"wan":{"ip":{"stats":{
        "rx":{"bytes":"912345678","packets":812345,"packetserrors":0,"packetsdiscards":"3","bandwidth":1520},
        "tx":{"bytes":123456789,"packets":"412345","packetserrors":"1","packetsdiscards":0,"bandwidth":"310"}}}}}]"#;
    const LAN: &str = r#"[{"lan":{"stats":{"port":[
        {"rx":{"bytes":1000,"packets":10,"bandwidth":5},"tx":{"bytes":2000,"packets":20,"bandwidth":6}},
        {"rx":{"bytes":"0","packets":"0"},"tx":{"bytes":"0","packets":"0"},"unknown":"dropped"}]}}}]"#;
    const WIFI_24: &str = r#"[{"wireless":{"ssid":{"id":24,"enable":1,
        "stats":{"rx":{"bytes":5000,"packets":50,"packetserrors":1,"packetsdiscards":2},
                 "tx":{"bytes":6000,"packets":60,"packetserrors":3,"packetsdiscards":4}}}}}]"#;
    const WIFI_5: &str = r#"[{"wireless":{"ssid":{"id":"5",
        "stats":{"rx":{"bytes":7000},"tx":{"bytes":8000}}}}}]"#;

    fn snapshot() -> BBoxSnapshot {
        BBoxSnapshot::new(
            [CPU, MEM, WAN, LAN, WIFI_24, WIFI_5]
                .iter()
                .map(|p| p.as_bytes().to_vec())
                .collect(),
        )
    }

    fn row(record: &MetricRecord) -> (String, Vec<(String, String)>, MetricValue) {
        (
            record.metric_name().to_string(),
            record
                .tags()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            record.value().clone(),
        )
    }

    fn expected(name: &str, tags: &[(&str, &str)], value: u64) -> (String, Vec<(String, String)>, MetricValue) {
        (
            name.to_string(),
            tags.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
            MetricValue::Unsigned(value),
        )
    }

    #[test]
    fn fabricated_payload_decodes_to_expected_table() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let ctx = RecordContext::new("bbox", ts);

        let records = BBox::new(true).normalize(&snapshot(), &ctx).unwrap();
        let rows: Vec<_> = records.iter().map(row).collect();

        let p0 = [("port", "0")];
        let p1 = [("port", "1")];
        let b24 = [("band", "24")];
        let b5 = [("band", "5")];
        let table = vec![
            expected("cpu_time_total", &[], 8_213_450),
            expected("cpu_time_idle", &[], 7_990_021),
            expected("process_created", &[], 51_234),
            expected("process_running", &[], 2),
            expected("process_blocked", &[], 0),
            expected("temperature_main", &[], 67),
            expected("memory_total", &[], 492_792),
            expected("memory_free", &[], 120_340),
            expected("memory_cached", &[], 98_232),
            expected("wan_rx_bytes", &[], 912_345_678),
            expected("wan_rx_packets", &[], 812_345),
            expected("wan_rx_packets_errors", &[], 0),
            expected("wan_rx_packets_discards", &[], 3),
            expected("wan_rx_bandwidth", &[], 1520),
            expected("wan_tx_bytes", &[], 123_456_789),
            expected("wan_tx_packets", &[], 412_345),
            expected("wan_tx_packets_errors", &[], 1),
            expected("wan_tx_packets_discards", &[], 0),
            expected("wan_tx_bandwidth", &[], 310),
            expected("lan_rx_bytes", &p0, 1000),
            expected("lan_rx_packets", &p0, 10),
            expected("lan_rx_bandwidth", &p0, 5),
            expected("lan_tx_bytes", &p0, 2000),
            expected("lan_tx_packets", &p0, 20),
            expected("lan_tx_bandwidth", &p0, 6),
            expected("lan_rx_bytes", &p1, 0),
            expected("lan_rx_packets", &p1, 0),
            expected("lan_tx_bytes", &p1, 0),
            expected("lan_tx_packets", &p1, 0),
            expected("wifi_rx_bytes", &b24, 5000),
            expected("wifi_rx_packets", &b24, 50),
            expected("wifi_rx_packets_errors", &b24, 1),
            expected("wifi_rx_packets_discards", &b24, 2),
            expected("wifi_tx_bytes", &b24, 6000),
            expected("wifi_tx_packets", &b24, 60),
            expected("wifi_tx_packets_errors", &b24, 3),
            expected("wifi_tx_packets_discards", &b24, 4),
            expected("wifi_rx_bytes", &b5, 7000),
            expected("wifi_tx_bytes", &b5, 8000),
        ];

        assert_eq!(rows, table);
        assert!(records.iter().all(|r| r.timestamp() == ts));
        assert!(records.iter().all(|r| r.source_id() == "bbox"));
        assert_eq!(records[0].unit(), None);
        assert_eq!(records[5].unit(), Some("°C"));
        assert_eq!(records[9].unit(), Some("B"));
    }

    #[test]
    fn non_json_payload_is_decode_error() {
        let ctx = RecordContext::new("bbox", Utc::now());
        let snapshot = BBoxSnapshot::new(vec![b"<html>maintenance</html>".to_vec()]);
        assert!(BBox::new(false).normalize(&snapshot, &ctx).is_err());
    }

    fn client(url: &str, auth_required: bool) -> DeviceClient {
        let source = SourceConfig::new("bbox", SourceKind::BBox, Endpoint::parse(url).unwrap())
            .with_auth_required(auth_required);
        DeviceClient::new(Arc::new(source)).unwrap()
    }

    fn data_responses() -> Vec<StubResponse> {
        [CPU, MEM, WAN, LAN, WIFI_24, WIFI_5]
            .iter()
            .map(|p| StubResponse::json(*p))
            .collect()
    }

    #[tokio::test]
    async fn login_then_data_calls_with_cookie() {
        let mut script = vec![StubResponse::new(200).header("Set-Cookie", "BBOX_ID=feedface; Path=/api")];
        script.extend(data_responses());
        let server = StubServer::start(script).await;
        let url = server.url().replace("http://", "http://:p%40ss%20w@");
        let client = client(&url, true);

        let mut bbox = BBox::new(true);
        let snapshot = bbox.fetch(&client).await.unwrap();
        assert_eq!(snapshot.payloads().len(), 6);

        let requests = server.requests();
        assert_eq!(requests.len(), 7);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/api/v1/login");
        assert_eq!(requests[0].body_text(), "password=p%40ss+w");
        let paths: Vec<&str> = requests[1..].iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, DATA_PATHS);
        assert!(requests[1..]
            .iter()
            .all(|r| r.header("cookie") == Some("BBOX_ID=feedface")));
    }

    #[tokio::test]
    async fn expired_session_relogs_once() {
        let mut script = vec![
            StubResponse::new(200).header("Set-Cookie", "BBOX_ID=old"),
            StubResponse::new(401),
            StubResponse::new(200).header("Set-Cookie", "BBOX_ID=new"),
        ];
        script.extend(data_responses());
        let server = StubServer::start(script).await;
        let client = client(&server.url().replace("http://", "http://:pw@"), true);

        let snapshot = BBox::new(true).fetch(&client).await.unwrap();
        assert_eq!(snapshot.payloads().len(), 6);

        let requests = server.requests();
        assert_eq!(requests[2].path, "/api/v1/login");
        assert_eq!(requests[3].path, "/api/v1/device/cpu");
        assert_eq!(requests[3].header("cookie"), Some("BBOX_ID=new"));
    }

    #[tokio::test]
    async fn second_rejection_fails_with_auth() {
        let server = StubServer::start(vec![
            StubResponse::new(200).header("Set-Cookie", "BBOX_ID=a"),
            StubResponse::new(401),
            StubResponse::new(200).header("Set-Cookie", "BBOX_ID=b"),
            StubResponse::new(401),
        ])
        .await;
        let client = client(&server.url().replace("http://", "http://:pw@"), true);

        let err = BBox::new(true).fetch(&client).await.unwrap_err();
        assert!(matches!(err, PollError::Auth(_)));
        assert_eq!(server.requests().len(), 4);
    }

    #[tokio::test]
    async fn unauthorized_without_login_is_auth() {
        let server = StubServer::start(vec![StubResponse::new(401)]).await;
        let client = client(&server.url(), false);

        let err = BBox::new(false).fetch(&client).await.unwrap_err();
        assert!(matches!(err, PollError::Auth(_)));
        assert_eq!(server.requests().len(), 1);
    }
}
