//! Deye solar micro-inverter.
//!
//! The inverter's embedded web server exposes `/status.html`, an HTML page
//! whose readings live in script variables:
//!
//! ```text
//! var webdata_sn = "2106123456";
//! var webdata_now_p = "312";
//! var webdata_today_e = "1.7";
//! ```
//!
//! The server keeps the connection busy after the status block, so the body
//! is read up to the `var status_c = ` line only.

use crate::adaptor::DeviceAdaptor;
use crate::builder::RecordSet;
use homestat_core::{DecodeError, MetricRecord, PollError, RecordContext};
use homestat_transport::{DeviceClient, RequestSpec};

const STATUS_PATH: &str = "/status.html";
const END_MARKER: &str = "var status_c = ";

/// Deye adaptor.
#[derive(Debug, Default)]
pub struct Deye;

impl Deye {
    /// Create an adaptor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Status page captured from the inverter.
#[derive(Debug, Clone, Default)]
pub struct DeyeSnapshot {
    body: Vec<u8>,
}

impl DeyeSnapshot {
    /// Snapshot from page bytes.
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }

    /// Page bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Readings of the status page.
#[derive(Debug, Clone, PartialEq)]
pub struct DeyeStatus {
    /// Inverter serial number
    pub serial_number: String,
    /// Instant power output (W)
    pub power_now: u64,
    /// Energy produced today (kWh)
    pub yield_today: f64,
    /// Energy produced since install (kWh)
    pub yield_total: f64,
    /// SSID of the access point the inverter is attached to
    pub ssid: String,
    /// Wi-Fi signal quality (%)
    pub signal_quality: u8,
}

impl DeyeStatus {
    /// Parse the script variables of a status page.
    ///
    /// Readings the inverter leaves blank (at dawn, for instance) count as
    /// zero.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] naming the first missing variable.
    pub fn parse(page: &str) -> Result<Self, DecodeError> {
        let mut serial_number = None;
        let mut power_now = None;
        let mut yield_today = None;
        let mut yield_total = None;
        let mut ssid = None;
        let mut signal_quality = None;

        for (name, value) in page.lines().filter_map(script_variable) {
            match name {
                "webdata_sn" => serial_number = Some(value.trim().to_string()),
                "webdata_now_p" => power_now = Some(value.trim().parse().unwrap_or_default()),
                "webdata_today_e" => yield_today = Some(value.trim().parse().unwrap_or_default()),
                "webdata_total_e" => yield_total = Some(value.trim().parse().unwrap_or_default()),
                "cover_sta_ssid" => ssid = Some(value.to_string()),
                "cover_sta_rssi" => {
                    signal_quality = Some(
                        value
                            .trim()
                            .trim_end_matches('%')
                            .parse()
                            .unwrap_or_default(),
                    );
                }
                _ => {}
            }
        }

        let missing = |name: &str| DecodeError::new(format!("missing variable {name}"));
        Ok(Self {
            serial_number: serial_number.ok_or_else(|| missing("webdata_sn"))?,
            power_now: power_now.ok_or_else(|| missing("webdata_now_p"))?,
            yield_today: yield_today.ok_or_else(|| missing("webdata_today_e"))?,
            yield_total: yield_total.ok_or_else(|| missing("webdata_total_e"))?,
            ssid: ssid.ok_or_else(|| missing("cover_sta_ssid"))?,
            signal_quality: signal_quality.ok_or_else(|| missing("cover_sta_rssi"))?,
        })
    }
}

/// Split `var name = "value";` into `(name, value)`.
fn script_variable(line: &str) -> Option<(&str, &str)> {
    let declaration = line.trim().strip_prefix("var ")?;
    let (name, value) = declaration.split_once('=')?;
    let value = value.trim().trim_end_matches(';').trim_end();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((name.trim(), value))
}

impl DeviceAdaptor for Deye {
    type Snapshot = DeyeSnapshot;

    async fn fetch(&mut self, client: &DeviceClient) -> Result<DeyeSnapshot, PollError> {
        let request = RequestSpec::get(STATUS_PATH)
            .header("Accept", "text/html")
            .with_basic_auth()
            .read_until(END_MARKER);
        let payload = client.fetch(&request).await?;
        Ok(DeyeSnapshot::new(payload.body))
    }

    fn normalize(
        &self,
        snapshot: &DeyeSnapshot,
        ctx: &RecordContext,
    ) -> Result<Vec<MetricRecord>, DecodeError> {
        let page = std::str::from_utf8(&snapshot.body)
            .map_err(|e| DecodeError::new(format!("status page is not UTF-8: {e}")))?;
        let status = DeyeStatus::parse(page)?;

        let sn = [("sn", status.serial_number.as_str())];
        let mut out = RecordSet::new(ctx);
        out.push("power_now", Some(status.power_now), Some("W"), &sn);
        out.push(
            "yield_today",
            Some(status.yield_today).filter(|v| *v > 0.0),
            Some("kWh"),
            &sn,
        );
        out.push(
            "yield_total",
            Some(status.yield_total).filter(|v| *v > 0.0),
            Some("kWh"),
            &sn,
        );
        out.push(
            "wifi_signal_quality",
            Some(u64::from(status.signal_quality)),
            Some("%"),
            &[("sn", status.serial_number.as_str()), ("ssid", status.ssid.as_str())],
        );

        Ok(out.finish())
    }
}
