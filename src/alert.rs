//! Operational alerts.
//!
//! Alerts are fire-and-forget: [`Alerter::notify`] never blocks the caller and
//! delivery failures are only logged.

use std::{fmt, time::Duration};

use reqwest::Client;
use serde::Deserialize;
use tracing::{error, warn};
use url::Url;

use crate::types::{MarketKey, SeqNum};

/// Network the indexer runs against, used to label alerts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Devnet,
}

impl Network {
    pub fn label(&self) -> &'static str {
        match self {
            Network::Mainnet => "MAIN-NET",
            Network::Devnet => "DEV-NET",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Error => "ERROR",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Alert {
    /// Account source returned a queue behind the checkpoint.
    StaleRead {
        market: MarketKey,
        seq_num: SeqNum,
        last_seq_num: SeqNum,
    },

    /// Queue records between the checkpoint and the live window were
    /// overwritten and skipped.
    GapDetected {
        market: MarketKey,
        last_seq_num: SeqNum,
        seq_num: SeqNum,
    },

    /// Market cycle failed, `kind` names the failed step.
    CycleFailed {
        market: MarketKey,
        kind: &'static str,
        error: String,
    },

    /// Checkpoints could not be persisted within the retry budget.
    CheckpointFailed { error: String },
}

impl Alert {
    pub fn severity(&self) -> Severity {
        match self {
            Alert::StaleRead { .. } => Severity::Info,
            Alert::GapDetected { .. } | Alert::CycleFailed { .. } | Alert::CheckpointFailed { .. } => {
                Severity::Error
            }
        }
    }

    pub fn market(&self) -> Option<&MarketKey> {
        match self {
            Alert::StaleRead { market, .. }
            | Alert::GapDetected { market, .. }
            | Alert::CycleFailed { market, .. } => Some(market),
            Alert::CheckpointFailed { .. } => None,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::StaleRead {
                market,
                seq_num,
                last_seq_num,
            } => write!(
                f,
                "{market}: stale read, queue seq_num {seq_num} behind checkpoint {last_seq_num}"
            ),
            Alert::GapDetected {
                market,
                last_seq_num,
                seq_num,
            } => write!(
                f,
                "{market}: events {}..={seq_num} overwritten before read, checkpoint advanced to {seq_num}",
                last_seq_num + 1
            ),
            Alert::CycleFailed {
                market,
                kind,
                error,
            } => write!(f, "{market}: {kind}: {error}"),
            Alert::CheckpointFailed { error } => write!(f, "checkpoint save failed: {error}"),
        }
    }
}

/// Receiver of operational alerts.
pub trait Alerter: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Alerter reporting to the log only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn notify(&self, alert: Alert) {
        match alert.severity() {
            Severity::Info => warn!(target: "alert", "{alert}"),
            Severity::Error => error!(target: "alert", "{alert}"),
        }
    }
}

/// Sends alerts to a Telegram chat via the Bot API.
#[derive(Clone, Debug)]
pub struct TelegramAlerter {
    http: Client,
    url: Url,
    chat_id: String,
    network: Network,
}

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("invalid bot url: {0}")]
    Url(#[from] url::ParseError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl TelegramAlerter {
    const SERVICE: &'static str = "ZETA-TRADE-INDEXER";

    pub fn new(token: &str, chat_id: impl Into<String>, network: Network) -> Result<Self, TelegramError> {
        let url = Url::parse(&format!("https://api.telegram.org/bot{token}/sendMessage"))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            url,
            chat_id: chat_id.into(),
            network,
        })
    }

    /// Text of the message sent for the alert.
    pub fn message(&self, alert: &Alert) -> String {
        format!(
            "[{}] [{}] [{}]: {alert}",
            self.network.label(),
            Self::SERVICE,
            alert.severity()
        )
    }
}

impl Alerter for TelegramAlerter {
    fn notify(&self, alert: Alert) {
        LogAlerter.notify(alert.clone());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime to deliver telegram alert");
            return;
        };
        let text = self.message(&alert);
        let request = self
            .http
            .post(self.url.clone())
            .query(&[("chat_id", self.chat_id.as_str()), ("text", text.as_str())]);
        runtime.spawn(async move {
            let result = request
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(err) = result {
                warn!(%err, "failed to deliver telegram alert");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Asset;

    fn sol() -> MarketKey {
        MarketKey::new(Asset::new("SOL"), 137)
    }

    #[test]
    fn test_alert_messages() {
        let stale = Alert::StaleRead {
            market: sol(),
            seq_num: 90,
            last_seq_num: 100,
        };
        assert_eq!(
            stale.to_string(),
            "SOL/137: stale read, queue seq_num 90 behind checkpoint 100"
        );
        assert_eq!(stale.severity(), Severity::Info);

        let gap = Alert::GapDetected {
            market: sol(),
            last_seq_num: 0,
            seq_num: 10,
        };
        assert_eq!(
            gap.to_string(),
            "SOL/137: events 1..=10 overwritten before read, checkpoint advanced to 10"
        );
        assert_eq!(gap.severity(), Severity::Error);
    }

    #[test]
    fn test_telegram_message_format() {
        let alerter = TelegramAlerter::new("123:abc", "-100", Network::Devnet).unwrap();
        let alert = Alert::CycleFailed {
            market: sol(),
            kind: "sink_error",
            error: "1 of 2 chunks failed".to_string(),
        };

        assert_eq!(
            alerter.message(&alert),
            "[DEV-NET] [ZETA-TRADE-INDEXER] [ERROR]: SOL/137: sink_error: 1 of 2 chunks failed"
        );
        assert_eq!(alerter.url.path(), "/bot123:abc/sendMessage");
    }
}
