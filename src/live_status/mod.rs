pub mod classify;
pub mod types;

pub use classify::{classify, Classification, SHORT_BODY_MAX};
pub use types::{DayScheduleEntry, LiveStatus};

use crate::config::UpstreamConfig;
use chrono::NaiveDate;
use leaky_bucket::RateLimiter;
use rand::seq::IndexedRandom;
use rand::RngCore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const BASE_URL: &str = "https://whereismytrain.in/cache/live_status";
const APP_VERSION: &str = "7.1.5.802422502";
const STATIC_UID: &str = "caea2ea591b5446f82acbf4db26b7c13";
const X_REQUESTED_WITH: &str = "com.whereismytrain.android";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// android user-agents for various popular devices in india
static USER_AGENTS: &[&str] = &[
    // samsung
    "Dalvik/2.1.0 (Linux; U; Android 13; SM-A135F Build/TP1A.220624.014)",
    "Dalvik/2.1.0 (Linux; U; Android 12; SM-M32 Build/SP1A.210812.016)",
    "Dalvik/2.1.0 (Linux; U; Android 13; SM-A235F Build/TP1A.220624.014)",
    "Dalvik/2.1.0 (Linux; U; Android 11; SM-A125F Build/RP1A.200720.012)",
    "Dalvik/2.1.0 (Linux; U; Android 12; SM-A52s Build/SP1A.210812.016)",
    "Dalvik/2.1.0 (Linux; U; Android 13; SM-M33 Build/TP1A.220624.014)",
    "Dalvik/2.1.0 (Linux; U; Android 12; SM-F127G Build/SP1A.210812.016)",
    "Dalvik/2.1.0 (Linux; U; Android 11; SM-A31 Build/RP1A.200720.012)",
    // xiaomi/redmi
    "Dalvik/2.1.0 (Linux; U; Android 13; Redmi Note 12 Build/TKQ1.221114.001)",
    "Dalvik/2.1.0 (Linux; U; Android 12; Redmi Note 11 Build/SKQ1.211006.001)",
    "Dalvik/2.1.0 (Linux; U; Android 11; Redmi 9 Power Build/RP1A.200720.011)",
    "Dalvik/2.1.0 (Linux; U; Android 13; POCO M5 Build/TKQ1.221114.001)",
    "Dalvik/2.1.0 (Linux; U; Android 12; Redmi 10 Build/SKQ1.211006.001)",
    "Dalvik/2.1.0 (Linux; U; Android 13; Redmi Note 12 Pro Build/TKQ1.221114.001)",
    "Dalvik/2.1.0 (Linux; U; Android 11; Redmi 9A Build/RP1A.200720.011)",
    "Dalvik/2.1.0 (Linux; U; Android 12; POCO X4 Pro Build/SKQ1.211006.001)",
    // vivo
    "Dalvik/2.1.0 (Linux; U; Android 13; vivo Y22 Build/TP1A.220624.014)",
    "Dalvik/2.1.0 (Linux; U; Android 12; vivo Y75 Build/SP1A.210812.016)",
    "Dalvik/2.1.0 (Linux; U; Android 11; vivo Y20 Build/RP1A.200720.012)",
    "Dalvik/2.1.0 (Linux; U; Android 13; vivo V27 Build/TP1A.220624.014)",
    // oppo
    "Dalvik/2.1.0 (Linux; U; Android 13; CPH2465 Build/TP1A.220624.014)",
    "Dalvik/2.1.0 (Linux; U; Android 12; CPH2219 Build/SP1A.210812.016)",
    "Dalvik/2.1.0 (Linux; U; Android 11; CPH2185 Build/RP1A.200720.012)",
    "Dalvik/2.1.0 (Linux; U; Android 13; CPH2531 Build/TP1A.220624.014)",
    // realme
    "Dalvik/2.1.0 (Linux; U; Android 13; RMX3511 Build/TP1A.220624.014)",
    "Dalvik/2.1.0 (Linux; U; Android 12; RMX3231 Build/SP1A.210812.016)",
    "Dalvik/2.1.0 (Linux; U; Android 11; RMX2185 Build/RP1A.200720.012)",
    // oneplus
    "Dalvik/2.1.0 (Linux; U; Android 13; CPH2449 Build/TP1A.220624.014)",
    // motorola
    "Dalvik/2.1.0 (Linux; U; Android 12; moto g52 Build/S1RTS32.38-132-9)",
    // google pixel
    "Dalvik/2.1.0 (Linux; U; Android 14; Pixel 7 Build/UP1A.231005.007)",
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    Status(u16),
}

/// Client for the upstream live-status endpoint. One instance is shared by
/// every poll task; the leaky bucket inside it is the global rate budget.
pub struct LiveStatusClient {
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl LiveStatusClient {
    pub fn new(
        upstream: &UpstreamConfig,
        proxy_url: Option<&str>,
    ) -> Result<LiveStatusClient, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .deflate(true)
            .gzip(true)
            .brotli(true);

        if let Some(proxy_url) = proxy_url {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(err) => {
                    tracing::warn!("ignoring unparseable proxy url {}: {}", proxy_url, err)
                }
            }
        }

        let limiter = RateLimiter::builder()
            .initial(upstream.rate_burst)
            .max(upstream.rate_burst)
            .refill(1)
            .interval(upstream.rate_period)
            .build();

        Ok(LiveStatusClient {
            client: builder.build()?,
            limiter,
        })
    }

    /// One GET against the status endpoint. Waits on the shared rate budget
    /// first; the wait is an await point and cancels cleanly.
    pub async fn fetch_status(
        &self,
        train_no: i64,
        from_station: &str,
        to_station: &str,
        run_date: NaiveDate,
    ) -> Result<Vec<u8>, FetchError> {
        self.limiter.acquire_one().await;

        let train_no_str = format!("{:05}", train_no);
        let date_str = run_date.format("%d-%m-%Y").to_string();
        let qid = generate_hex_id(16);
        let wid = compute_wid(&qid, &train_no_str, from_station, to_station, &date_str);
        let cb = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
            .to_string();

        let user_agent = USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("train_no", train_no_str.as_str()),
                ("date", date_str.as_str()),
                ("appVersion", APP_VERSION),
                ("from_day", "1"),
                ("wid", wid.as_str()),
                ("from", from_station),
                ("to", to_station),
                ("lang", "en"),
                ("user", STATIC_UID),
                ("qid", qid.as_str()),
                ("flow", "regular"),
                ("cb", cb.as_str()),
            ])
            .header("User-Agent", user_agent)
            .header("X-Requested-With", X_REQUESTED_WITH)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// `wid` is the decimal Adler-32 checksum of the concatenated request
/// identity; the upstream rejects requests where it does not match.
fn compute_wid(qid: &str, train_no: &str, from: &str, to: &str, date: &str) -> String {
    let input = format!(
        "{}{}{}{}{}{}{}{}",
        STATIC_UID, APP_VERSION, qid, train_no, from, to, date, "1"
    );
    adler32::RollingAdler32::from_buffer(input.as_bytes())
        .hash()
        .to_string()
}

fn generate_hex_id(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_known_vectors() {
        assert_eq!(adler32::RollingAdler32::from_buffer(b"").hash(), 1);
        assert_eq!(adler32::RollingAdler32::from_buffer(b"abc").hash(), 38600999);
    }

    #[test]
    fn wid_matches_manual_concatenation() {
        let qid = "00112233445566778899aabbccddeeff";
        let expected_input = format!(
            "{}{}{}{}{}{}{}{}",
            STATIC_UID, APP_VERSION, qid, "00539", "NDLS", "BCT", "10-05-2025", "1"
        );
        let expected = adler32::RollingAdler32::from_buffer(expected_input.as_bytes())
            .hash()
            .to_string();
        assert_eq!(
            compute_wid(qid, "00539", "NDLS", "BCT", "10-05-2025"),
            expected
        );
    }

    #[test]
    fn qid_is_32_hex_chars() {
        let qid = generate_hex_id(16);
        assert_eq!(qid.len(), 32);
        assert!(qid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn request_date_format_is_day_first() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        assert_eq!(date.format("%d-%m-%Y").to_string(), "10-05-2025");
    }
}
